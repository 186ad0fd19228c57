use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{lock_order, CardStore, CardTransaction, StoreError, UserDirectory};
use crate::models::{Card, CardStatus, NewCard, Page, Role, User};

/// Process-local card store and user directory.
///
/// Mutation rights are per identifier, so units of work on disjoint cards run
/// in parallel. Lock entries are never evicted.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    users: Mutex<HashMap<Uuid, User>>,
    cards: Mutex<HashMap<Uuid, Card>>,
    row_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user, or returns the existing one with that username.
    pub async fn add_user(&self, username: &str, role: Role) -> User {
        let mut users = self.inner.users.lock().await;

        if let Some(existing) = users.values().find(|u| u.username == username) {
            return existing.clone();
        }

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            role,
            created_at: Utc::now(),
        };
        users.insert(user.id, user.clone());
        user
    }

    /// Sum of all balances, for conservation checks.
    pub async fn total_balance(&self) -> rust_decimal::Decimal {
        self.inner.cards.lock().await.values().map(|c| c.balance).sum()
    }

    async fn username_of(&self, owner_id: Uuid) -> Option<String> {
        self.inner
            .users
            .lock()
            .await
            .get(&owner_id)
            .map(|u| u.username.clone())
    }
}

fn identifier_taken(cards: &HashMap<Uuid, Card>, identifier: &str, except: Uuid) -> bool {
    cards
        .values()
        .any(|c| c.identifier == identifier && c.id != except)
}

fn page_of(mut cards: Vec<Card>, page: Page) -> Vec<Card> {
    cards.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    cards
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .collect()
}

#[async_trait]
impl CardStore for InMemoryStore {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Card>, StoreError> {
        let cards = self.inner.cards.lock().await;
        Ok(cards.values().find(|c| c.identifier == identifier).cloned())
    }

    async fn find_by_owner(&self, owner: &User, page: Page) -> Result<Vec<Card>, StoreError> {
        let cards = self.inner.cards.lock().await;
        let owned = cards
            .values()
            .filter(|c| c.owner_id == owner.id)
            .cloned()
            .collect();
        Ok(page_of(owned, page))
    }

    async fn find_by_status(
        &self,
        status: CardStatus,
        page: Page,
    ) -> Result<Vec<Card>, StoreError> {
        let cards = self.inner.cards.lock().await;
        let matching = cards
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        Ok(page_of(matching, page))
    }

    async fn insert(&self, card: NewCard) -> Result<Card, StoreError> {
        let owner_username = self
            .username_of(card.owner_id)
            .await
            .ok_or(StoreError::UnknownOwner(card.owner_id))?;

        let mut cards = self.inner.cards.lock().await;
        if identifier_taken(&cards, &card.identifier, card.id) {
            return Err(StoreError::DuplicateIdentifier);
        }

        let now = Utc::now();
        let stored = Card {
            id: card.id,
            identifier: card.identifier,
            owner_id: card.owner_id,
            owner_username,
            expiration_month: card.expiration_month,
            expiration_year: card.expiration_year,
            status: card.status,
            balance: card.balance,
            created_at: now,
            updated_at: now,
        };
        cards.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn begin(&self, identifiers: &[&str]) -> Result<Box<dyn CardTransaction>, StoreError> {
        let mut guards = Vec::new();
        for identifier in lock_order(identifiers) {
            let row_lock = {
                let mut row_locks = self.inner.row_locks.lock().await;
                row_locks
                    .entry(identifier.to_string())
                    .or_default()
                    .clone()
            };
            guards.push(row_lock.lock_owned().await);
        }

        let locked = {
            let cards = self.inner.cards.lock().await;
            identifiers
                .iter()
                .filter_map(|identifier| {
                    cards
                        .values()
                        .find(|c| c.identifier == *identifier)
                        .map(|c| (identifier.to_string(), c.clone()))
                })
                .collect()
        };

        Ok(Box::new(InMemoryTransaction {
            store: self.clone(),
            _guards: guards,
            locked,
            staged: Vec::new(),
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let users = self.inner.users.lock().await;
        Ok(users.values().find(|u| u.username == username).cloned())
    }
}

enum Staged {
    Save(Card),
    Delete(Uuid),
}

struct InMemoryTransaction {
    store: InMemoryStore,
    _guards: Vec<OwnedMutexGuard<()>>,
    locked: HashMap<String, Card>,
    staged: Vec<Staged>,
}

#[async_trait]
impl CardTransaction for InMemoryTransaction {
    fn card(&self, identifier: &str) -> Option<Card> {
        self.locked.get(identifier).cloned()
    }

    async fn save(&mut self, card: &Card) -> Result<Card, StoreError> {
        let owner_username = self
            .store
            .username_of(card.owner_id)
            .await
            .ok_or(StoreError::UnknownOwner(card.owner_id))?;

        {
            let cards = self.store.inner.cards.lock().await;
            if identifier_taken(&cards, &card.identifier, card.id) {
                return Err(StoreError::DuplicateIdentifier);
            }
        }

        let saved = Card {
            owner_username,
            updated_at: Utc::now(),
            ..card.clone()
        };

        for locked in self.locked.values_mut() {
            if locked.id == saved.id {
                *locked = saved.clone();
            }
        }
        self.staged.push(Staged::Save(saved.clone()));

        Ok(saved)
    }

    async fn delete(&mut self, card: &Card) -> Result<(), StoreError> {
        self.locked.retain(|_, locked| locked.id != card.id);
        self.staged.push(Staged::Delete(card.id));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let mut cards = this.store.inner.cards.lock().await;

        for staged in &this.staged {
            if let Staged::Save(card) = staged {
                if identifier_taken(&cards, &card.identifier, card.id) {
                    return Err(StoreError::DuplicateIdentifier);
                }
            }
        }

        for staged in this.staged {
            match staged {
                Staged::Save(card) => {
                    cards.insert(card.id, card);
                }
                Staged::Delete(id) => {
                    cards.remove(&id);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::time::Duration;

    async fn seed(store: &InMemoryStore, owner: &str, identifier: &str, balance: Decimal) -> Card {
        let user = store.add_user(owner, Role::User).await;
        store
            .insert(NewCard {
                id: Uuid::new_v4(),
                identifier: identifier.to_string(),
                owner_id: user.id,
                expiration_month: 12,
                expiration_year: 2030,
                status: CardStatus::Active,
                balance,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = InMemoryStore::new();
        let card = seed(&store, "alice", "id-1", Decimal::new(1000, 2)).await;

        let found = store.find_by_identifier("id-1").await.unwrap().unwrap();
        assert_eq!(found, card);
        assert_eq!(found.owner_username, "alice");
        assert!(store.find_by_identifier("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_identifier() {
        let store = InMemoryStore::new();
        let card = seed(&store, "alice", "id-1", Decimal::ZERO).await;

        let result = store
            .insert(NewCard {
                id: Uuid::new_v4(),
                identifier: "id-1".to_string(),
                owner_id: card.owner_id,
                expiration_month: 1,
                expiration_year: 2031,
                status: CardStatus::Active,
                balance: Decimal::ZERO,
            })
            .await;

        assert!(matches!(result, Err(StoreError::DuplicateIdentifier)));
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_discarded() {
        let store = InMemoryStore::new();
        seed(&store, "alice", "id-1", Decimal::new(1000, 2)).await;

        {
            let mut tx = store.begin(&["id-1"]).await.unwrap();
            let mut card = tx.card("id-1").unwrap();
            card.balance = Decimal::ZERO;
            tx.save(&card).await.unwrap();
            assert_eq!(tx.card("id-1").unwrap().balance, Decimal::ZERO);
        }

        let card = store.find_by_identifier("id-1").await.unwrap().unwrap();
        assert_eq!(card.balance, Decimal::new(1000, 2));
    }

    #[tokio::test]
    async fn test_commit_applies_saves_and_deletes() {
        let store = InMemoryStore::new();
        seed(&store, "alice", "id-1", Decimal::new(1000, 2)).await;
        seed(&store, "bob", "id-2", Decimal::ZERO).await;

        let mut tx = store.begin(&["id-2", "id-1"]).await.unwrap();
        let mut first = tx.card("id-1").unwrap();
        first.balance = Decimal::new(500, 2);
        tx.save(&first).await.unwrap();
        let second = tx.card("id-2").unwrap();
        tx.delete(&second).await.unwrap();
        assert!(tx.card("id-2").is_none());
        tx.commit().await.unwrap();

        let first = store.find_by_identifier("id-1").await.unwrap().unwrap();
        assert_eq!(first.balance, Decimal::new(500, 2));
        assert!(store.find_by_identifier("id-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_begin_on_missing_row_yields_none() {
        let store = InMemoryStore::new();
        let tx = store.begin(&["nope"]).await.unwrap();
        assert!(tx.card("nope").is_none());
    }

    #[tokio::test]
    async fn test_row_lock_blocks_second_unit_of_work() {
        let store = InMemoryStore::new();
        seed(&store, "alice", "id-1", Decimal::ZERO).await;

        let held = store.begin(&["id-1"]).await.unwrap();

        let contender = store.clone();
        let waiting = tokio::spawn(async move { contender.begin(&["id-1"]).await.map(|_| ()) });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_listing_by_owner_and_status() {
        let store = InMemoryStore::new();
        let a = seed(&store, "alice", "id-1", Decimal::ZERO).await;
        seed(&store, "alice", "id-2", Decimal::ZERO).await;
        seed(&store, "bob", "id-3", Decimal::ZERO).await;

        let alice = store.find_by_username("alice").await.unwrap().unwrap();
        let owned = store.find_by_owner(&alice, Page::new(0, 10)).await.unwrap();
        assert_eq!(owned.len(), 2);
        assert!(owned.iter().all(|c| c.owner_username == "alice"));

        let first_page = store.find_by_owner(&alice, Page::new(0, 1)).await.unwrap();
        let second_page = store.find_by_owner(&alice, Page::new(1, 1)).await.unwrap();
        assert_eq!(first_page.len(), 1);
        assert_eq!(second_page.len(), 1);
        assert_ne!(first_page[0].id, second_page[0].id);

        let mut tx = store.begin(&["id-1"]).await.unwrap();
        tx.save(&Card {
            status: CardStatus::BlockRequested,
            ..a
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let requested = store
            .find_by_status(CardStatus::BlockRequested, Page::default())
            .await
            .unwrap();
        assert_eq!(requested.len(), 1);
        assert_eq!(requested[0].identifier, "id-1");
    }
}

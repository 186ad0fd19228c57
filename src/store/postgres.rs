use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;

use super::{lock_order, CardStore, CardTransaction, StoreError, UserDirectory};
use crate::models::{Card, CardStatus, NewCard, Page, User};

/// PostgreSQL-backed card store and user directory.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Maps unique-constraint violations on `cards.identifier` to `DuplicateIdentifier`.
fn write_error(e: sqlx::Error) -> StoreError {
    let duplicate = e
        .as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false);

    if duplicate {
        StoreError::DuplicateIdentifier
    } else {
        StoreError::Database(e)
    }
}

#[async_trait]
impl CardStore for PgStore {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Card>, StoreError> {
        Ok(Card::find_by_identifier(&self.pool, identifier).await?)
    }

    async fn find_by_owner(&self, owner: &User, page: Page) -> Result<Vec<Card>, StoreError> {
        Ok(Card::list_by_owner(&self.pool, owner.id, page).await?)
    }

    async fn find_by_status(
        &self,
        status: CardStatus,
        page: Page,
    ) -> Result<Vec<Card>, StoreError> {
        Ok(Card::list_by_status(&self.pool, status, page).await?)
    }

    async fn insert(&self, card: NewCard) -> Result<Card, StoreError> {
        Card::create(&self.pool, &card).await.map_err(write_error)
    }

    async fn begin(&self, identifiers: &[&str]) -> Result<Box<dyn CardTransaction>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut locked = HashMap::new();

        for identifier in lock_order(identifiers) {
            if let Some(card) = Card::lock_by_identifier(&mut *tx, identifier).await? {
                locked.insert(identifier.to_string(), card);
            }
        }

        tracing::debug!(rows = locked.len(), "Card rows locked");

        Ok(Box::new(PgCardTransaction { tx, locked }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(User::find_by_username(&self.pool, username).await?)
    }
}

/// Row locks held by an open database transaction. Rolled back on drop.
struct PgCardTransaction {
    tx: Transaction<'static, Postgres>,
    locked: HashMap<String, Card>, // keyed by the identifier the row was locked under
}

#[async_trait]
impl CardTransaction for PgCardTransaction {
    fn card(&self, identifier: &str) -> Option<Card> {
        self.locked.get(identifier).cloned()
    }

    async fn save(&mut self, card: &Card) -> Result<Card, StoreError> {
        let saved = Card::update(&mut *self.tx, card).await.map_err(write_error)?;

        for locked in self.locked.values_mut() {
            if locked.id == saved.id {
                *locked = saved.clone();
            }
        }

        Ok(saved)
    }

    async fn delete(&mut self, card: &Card) -> Result<(), StoreError> {
        Card::delete(&mut *self.tx, card.id).await?;
        self.locked.retain(|_, locked| locked.id != card.id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

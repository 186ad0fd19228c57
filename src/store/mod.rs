//! Storage contracts for cards and users.
//!
//! Business logic talks to these traits only, so the engine runs the same
//! against PostgreSQL and against the in-memory store used in tests.

use async_trait::async_trait;

use crate::models::{Card, CardStatus, NewCard, Page, User};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Card identifier already in use")]
    DuplicateIdentifier,

    #[error("Owner {0} does not exist")]
    UnknownOwner(uuid::Uuid),
}

/// Durable card storage.
#[async_trait]
pub trait CardStore: Send + Sync {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Card>, StoreError>;

    async fn find_by_owner(&self, owner: &User, page: Page) -> Result<Vec<Card>, StoreError>;

    async fn find_by_status(
        &self,
        status: CardStatus,
        page: Page,
    ) -> Result<Vec<Card>, StoreError>;

    /// Stores a new row. Fails with `DuplicateIdentifier` if the identifier is taken.
    async fn insert(&self, card: NewCard) -> Result<Card, StoreError>;

    /// Opens a unit of work holding exclusive mutation rights on the named rows.
    ///
    /// Rows are locked in ascending identifier order. Identifiers with no row
    /// are still reserved but `CardTransaction::card` returns `None` for them.
    async fn begin(&self, identifiers: &[&str]) -> Result<Box<dyn CardTransaction>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Writes staged against rows locked by [`CardStore::begin`].
///
/// Nothing becomes visible until `commit`. Dropping the transaction discards
/// every staged write and releases the locks.
#[async_trait]
pub trait CardTransaction: Send {
    /// The locked row for an identifier passed to `begin`, as last staged.
    fn card(&self, identifier: &str) -> Option<Card>;

    async fn save(&mut self, card: &Card) -> Result<Card, StoreError>;

    async fn delete(&mut self, card: &Card) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// User lookup by the principal's username.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
}

/// Sorted, de-duplicated lock order for a set of identifiers.
pub(crate) fn lock_order<'a>(identifiers: &[&'a str]) -> Vec<&'a str> {
    let mut ordered = identifiers.to_vec();
    ordered.sort_unstable();
    ordered.dedup();
    ordered
}

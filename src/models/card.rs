use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use std::fmt;
use uuid::Uuid;

/// Card status lifecycle. Users may only move ACTIVE → BLOCK_REQUESTED;
/// administrators may set any status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardStatus {
    #[default]
    Active,
    Blocked,
    BlockRequested,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown card status: {0}")]
pub struct UnknownStatus(pub String);

impl CardStatus {
    pub const ALL: [CardStatus; 3] = [
        CardStatus::Active,
        CardStatus::Blocked,
        CardStatus::BlockRequested,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CardStatus::Active => "ACTIVE",
            CardStatus::Blocked => "BLOCKED",
            CardStatus::BlockRequested => "BLOCK_REQUESTED",
        }
    }

    /// Case-insensitive parse of a status name.
    pub fn parse(name: &str) -> Result<Self, UnknownStatus> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| UnknownStatus(name.to_string()))
    }
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for CardStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CardStatus::parse(&value)
    }
}

/// A card row joined with its owner's username.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Card {
    pub id: Uuid,
    pub identifier: String, // Codec output, never the plain number
    pub owner_id: Uuid,
    pub owner_username: String,
    pub expiration_month: i32,
    pub expiration_year: i32,
    #[sqlx(try_from = "String")]
    pub status: CardStatus,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCard {
    pub id: Uuid,
    pub identifier: String,
    pub owner_id: Uuid,
    pub expiration_month: i32,
    pub expiration_year: i32,
    pub status: CardStatus,
    pub balance: Decimal,
}

/// Page request for listing queries. Pages are zero-based, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Page {
    pub fn new(number: u32, size: u32) -> Self {
        Self { number, size }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.number) * i64::from(self.size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { number: 0, size: 6 }
    }
}

/// Outward representation of a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardView {
    pub number: String, // masked unless revealed to an administrator
    pub owner_username: String,
    pub expiration_month: i32,
    pub expiration_year: i32,
    pub status: CardStatus,
    pub balance: Decimal,
}

const CARD_COLUMNS: &str = r#"
    c.id, c.identifier, c.owner_id, u.username AS owner_username,
    c.expiration_month, c.expiration_year, c.status, c.balance,
    c.created_at, c.updated_at
"#;

impl Card {
    /// Inserts a new card and returns the stored row
    pub async fn create<'e, E: PgExecutor<'e>>(
        executor: E,
        data: &NewCard,
    ) -> Result<Self, sqlx::Error> {
        let card = sqlx::query_as::<_, Self>(&format!(
            r#"
            WITH c AS (
                INSERT INTO cards (
                    id, identifier, owner_id, expiration_month, expiration_year, status, balance
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING *
            )
            SELECT {CARD_COLUMNS}
            FROM c JOIN users u ON u.id = c.owner_id
            "#
        ))
        .bind(data.id)
        .bind(&data.identifier)
        .bind(data.owner_id)
        .bind(data.expiration_month)
        .bind(data.expiration_year)
        .bind(data.status.as_str())
        .bind(data.balance)
        .fetch_one(executor)
        .await?;

        Ok(card)
    }

    /// Finds a card by its codec identifier
    pub async fn find_by_identifier<'e, E: PgExecutor<'e>>(
        executor: E,
        identifier: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let card = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {CARD_COLUMNS}
            FROM cards c JOIN users u ON u.id = c.owner_id
            WHERE c.identifier = $1
            "#
        ))
        .bind(identifier)
        .fetch_optional(executor)
        .await?;

        Ok(card)
    }

    /// Finds a card by identifier and takes a row lock for the rest of the transaction
    pub async fn lock_by_identifier<'e, E: PgExecutor<'e>>(
        executor: E,
        identifier: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let card = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {CARD_COLUMNS}
            FROM cards c JOIN users u ON u.id = c.owner_id
            WHERE c.identifier = $1
            FOR UPDATE OF c
            "#
        ))
        .bind(identifier)
        .fetch_optional(executor)
        .await?;

        Ok(card)
    }

    /// Lists cards owned by a user, newest first
    pub async fn list_by_owner<'e, E: PgExecutor<'e>>(
        executor: E,
        owner_id: Uuid,
        page: Page,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let cards = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {CARD_COLUMNS}
            FROM cards c JOIN users u ON u.id = c.owner_id
            WHERE c.owner_id = $1
            ORDER BY c.created_at DESC, c.id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(owner_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(executor)
        .await?;

        Ok(cards)
    }

    /// Lists cards in a given status, newest first
    pub async fn list_by_status<'e, E: PgExecutor<'e>>(
        executor: E,
        status: CardStatus,
        page: Page,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let cards = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {CARD_COLUMNS}
            FROM cards c JOIN users u ON u.id = c.owner_id
            WHERE c.status = $1
            ORDER BY c.created_at DESC, c.id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(status.as_str())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(executor)
        .await?;

        Ok(cards)
    }

    /// Writes every mutable column of the card back to its row
    pub async fn update<'e, E: PgExecutor<'e>>(
        executor: E,
        card: &Card,
    ) -> Result<Self, sqlx::Error> {
        let updated = sqlx::query_as::<_, Self>(&format!(
            r#"
            WITH c AS (
                UPDATE cards
                SET
                    identifier = $2,
                    owner_id = $3,
                    expiration_month = $4,
                    expiration_year = $5,
                    status = $6,
                    balance = $7,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING *
            )
            SELECT {CARD_COLUMNS}
            FROM c JOIN users u ON u.id = c.owner_id
            "#
        ))
        .bind(card.id)
        .bind(&card.identifier)
        .bind(card.owner_id)
        .bind(card.expiration_month)
        .bind(card.expiration_year)
        .bind(card.status.as_str())
        .bind(card.balance)
        .fetch_one(executor)
        .await?;

        Ok(updated)
    }

    /// Permanently removes a card
    pub async fn delete<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            DELETE FROM cards WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(executor)
        .await?;

        Ok(())
    }
}

//! Card lifecycle and transfer engine.
//!
//! Every operation that names a card by number resolves it through the
//! [`CardCodec`], checks ownership and status, and persists through a
//! [`CardStore`] unit of work so concurrent operations on the same card
//! serialize. Administrative operations skip the ownership check.

use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{CardError, CardRef, Result};
use crate::models::{Card, CardStatus, CardView, NewCard};
use crate::services::card_codec::{self, CardCodec};
use crate::store::{CardStore, CardTransaction, UserDirectory};

/// Fractional digits carried by balances and amounts.
pub const MONEY_SCALE: u32 = 2;

/// Request to issue a new card
#[derive(Debug, Clone)]
pub struct CreateCardRequest {
    pub owner_username: String,
    pub card_number: String,
    pub expiration_month: i32,
    pub expiration_year: i32,
    pub status: Option<CardStatus>,
    pub balance: Option<Decimal>,
}

/// Partial update of a card. Absent, blank or non-positive fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct CardPatch {
    pub card_number: Option<String>,
    pub expiration_month: Option<i32>,
    pub expiration_year: Option<i32>,
    pub status: Option<CardStatus>,
    pub balance: Option<Decimal>,
    pub owner_username: Option<String>,
}

pub struct CardEngine {
    cards: Arc<dyn CardStore>,
    users: Arc<dyn UserDirectory>,
    codec: CardCodec,
}

impl CardEngine {
    pub fn new(cards: Arc<dyn CardStore>, users: Arc<dyn UserDirectory>, codec: CardCodec) -> Self {
        Self {
            cards,
            users,
            codec,
        }
    }

    /// Balance of a card owned by `username`. Read-only.
    #[tracing::instrument(skip_all, fields(principal = %username))]
    pub async fn get_balance(&self, username: &str, card_number: &str) -> Result<Decimal> {
        let identifier = self.codec.encode(card_number)?;

        let card = self
            .cards
            .find_by_identifier(&identifier)
            .await?
            .ok_or(CardError::CardNotFound(CardRef::Card))?;

        ensure_owner(&card, username)?;

        Ok(card.balance)
    }

    /// Owner asks for their card to be blocked: ACTIVE → BLOCK_REQUESTED.
    #[tracing::instrument(skip_all, fields(principal = %username))]
    pub async fn request_block(&self, username: &str, card_number: &str) -> Result<()> {
        let identifier = self.codec.encode(card_number)?;
        let mut tx = self.cards.begin(&[identifier.as_str()]).await?;

        let mut card = locked(&*tx, &identifier, CardRef::Card)?;
        ensure_owner(&card, username)?;

        match card.status {
            CardStatus::BlockRequested => {
                return Err(CardError::WrongStatus(
                    "block request already pending".to_string(),
                ))
            }
            CardStatus::Blocked => {
                return Err(CardError::WrongStatus("card already blocked".to_string()))
            }
            CardStatus::Active => {}
        }

        card.status = CardStatus::BlockRequested;
        tx.save(&card).await?;
        tx.commit().await?;

        Ok(())
    }

    /// Administrative status overwrite. Any status may move to any other.
    #[tracing::instrument(skip_all, fields(status = %status_name))]
    pub async fn set_status(&self, card_number: &str, status_name: &str) -> Result<()> {
        let identifier = self.codec.encode(card_number)?;
        let mut tx = self.cards.begin(&[identifier.as_str()]).await?;

        let mut card = locked(&*tx, &identifier, CardRef::Card)?;

        card.status = CardStatus::parse(status_name).map_err(|e| CardError::WrongStatus(e.0))?;

        tx.save(&card).await?;
        tx.commit().await?;

        Ok(())
    }

    /// Moves `amount` from a card owned by `username` to any active card.
    ///
    /// Both rows are locked for the whole check-and-apply sequence; any
    /// failure before commit leaves both balances untouched.
    #[tracing::instrument(skip_all, fields(principal = %username, amount = %amount))]
    pub async fn transfer(
        &self,
        username: &str,
        from_card_number: &str,
        to_card_number: &str,
        amount: Decimal,
    ) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(CardError::InvalidArgument(
                "transfer amount must be greater than 0".to_string(),
            ));
        }
        ensure_money_scale(amount, "transfer amount")?;

        let from_identifier = self.codec.encode(from_card_number)?;
        let to_identifier = self.codec.encode(to_card_number)?;

        if from_identifier == to_identifier {
            return Err(CardError::InvalidArgument(
                "source and destination cards must differ".to_string(),
            ));
        }

        let mut tx = self
            .cards
            .begin(&[from_identifier.as_str(), to_identifier.as_str()])
            .await?;

        let mut from = locked(&*tx, &from_identifier, CardRef::Source)?;
        let mut to = locked(&*tx, &to_identifier, CardRef::Destination)?;

        ensure_owner(&from, username)?;

        if from.status != CardStatus::Active || to.status != CardStatus::Active {
            return Err(CardError::WrongStatus(format!(
                "source: {}, destination: {}",
                from.status, to.status
            )));
        }

        if from.balance < amount {
            return Err(CardError::InsufficientFunds {
                available: from.balance,
                requested: amount,
            });
        }

        let credited = to.balance.checked_add(amount).ok_or_else(|| {
            CardError::InvalidArgument("destination balance overflow".to_string())
        })?;

        from.balance -= amount;
        to.balance = credited;

        tx.save(&from).await?;
        tx.save(&to).await?;
        tx.commit().await?;

        Ok(())
    }

    /// Issues a card to an existing user.
    #[tracing::instrument(skip_all, fields(owner = %request.owner_username))]
    pub async fn create_card(&self, request: CreateCardRequest) -> Result<CardView> {
        let owner = self
            .users
            .find_by_username(&request.owner_username)
            .await?
            .ok_or_else(|| CardError::UserNotFound(request.owner_username.clone()))?;

        if request.card_number.trim().is_empty() {
            return Err(CardError::InvalidArgument(
                "card number must not be blank".to_string(),
            ));
        }

        if request.expiration_month <= 0 || request.expiration_year <= 0 {
            return Err(CardError::InvalidArgument(
                "expiration month and year must be positive".to_string(),
            ));
        }

        let balance = request.balance.unwrap_or(Decimal::ZERO);
        ensure_money_scale(balance, "balance")?;

        let card = self
            .cards
            .insert(NewCard {
                id: Uuid::new_v4(),
                identifier: self.codec.encode(&request.card_number)?,
                owner_id: owner.id,
                expiration_month: request.expiration_month,
                expiration_year: request.expiration_year,
                status: request.status.unwrap_or_default(),
                balance,
            })
            .await?;

        self.view(&card, false)
    }

    /// Administrative partial update.
    ///
    /// A new card number re-encodes the identifier of the existing row rather
    /// than issuing a new card.
    #[tracing::instrument(skip_all)]
    pub async fn update_card(&self, card_number: &str, patch: CardPatch) -> Result<CardView> {
        let identifier = self.codec.encode(card_number)?;
        let mut tx = self.cards.begin(&[identifier.as_str()]).await?;

        let mut card = locked(&*tx, &identifier, CardRef::Card)?;

        if let Some(number) = patch.card_number.filter(|n| !n.trim().is_empty()) {
            card.identifier = self.codec.encode(&number)?;
        }

        if let Some(month) = patch.expiration_month.filter(|m| *m > 0) {
            card.expiration_month = month;
        }

        if let Some(year) = patch.expiration_year.filter(|y| *y > 0) {
            card.expiration_year = year;
        }

        if let Some(status) = patch.status {
            card.status = status;
        }

        if let Some(balance) = patch.balance {
            ensure_money_scale(balance, "balance")?;
            card.balance = balance;
        }

        if let Some(username) = patch.owner_username {
            let owner = self
                .users
                .find_by_username(&username)
                .await?
                .ok_or(CardError::UserNotFound(username))?;
            card.owner_id = owner.id;
            card.owner_username = owner.username;
        }

        let saved = tx.save(&card).await?;
        tx.commit().await?;

        self.view(&saved, false)
    }

    /// Permanently removes a card.
    #[tracing::instrument(skip_all)]
    pub async fn delete_card(&self, card_number: &str) -> Result<()> {
        let identifier = self.codec.encode(card_number)?;
        let mut tx = self.cards.begin(&[identifier.as_str()]).await?;

        let card = locked(&*tx, &identifier, CardRef::Card)?;

        tx.delete(&card).await?;
        tx.commit().await?;

        Ok(())
    }

    /// Outward view of a card; `reveal` shows the full number (administrators only).
    pub fn view(&self, card: &Card, reveal: bool) -> Result<CardView> {
        let number = self.codec.decode(&card.identifier)?;

        Ok(CardView {
            number: if reveal {
                number
            } else {
                card_codec::mask(&number)
            },
            owner_username: card.owner_username.clone(),
            expiration_month: card.expiration_month,
            expiration_year: card.expiration_year,
            status: card.status,
            balance: card.balance,
        })
    }
}

fn locked(tx: &dyn CardTransaction, identifier: &str, side: CardRef) -> Result<Card> {
    tx.card(identifier).ok_or(CardError::CardNotFound(side))
}

fn ensure_owner(card: &Card, username: &str) -> Result<()> {
    if card.owner_username != username {
        return Err(CardError::IncorrectOwner(username.to_string()));
    }
    Ok(())
}

fn ensure_money_scale(value: Decimal, what: &str) -> Result<()> {
    if value.normalize().scale() > MONEY_SCALE {
        return Err(CardError::InvalidArgument(format!(
            "{} must have at most {} fractional digits",
            what, MONEY_SCALE
        )));
    }
    Ok(())
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::services::card_codec::CodecError;
use crate::store::StoreError;

/// Which card of an operation failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardRef {
    Card,
    Source,
    Destination,
}

impl fmt::Display for CardRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CardRef::Card => "card",
            CardRef::Source => "source card",
            CardRef::Destination => "destination card",
        })
    }
}

#[derive(Error, Debug)]
pub enum CardError {
    #[error("Not found: {0}")]
    CardNotFound(CardRef),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Card does not belong to {0}")]
    IncorrectOwner(String),

    #[error("Wrong card status: {0}")]
    WrongStatus(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },

    #[error("Card number codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for CardError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateIdentifier => {
                CardError::InvalidArgument("card number already issued".to_string())
            }
            other => CardError::Storage(other),
        }
    }
}

impl CardError {
    /// Stable machine-readable code for the failure kind.
    pub fn code(&self) -> &'static str {
        match self {
            CardError::CardNotFound(_) | CardError::UserNotFound(_) => "not_found",
            CardError::IncorrectOwner(_) => "incorrect_owner",
            CardError::WrongStatus(_) => "wrong_status",
            CardError::InvalidArgument(_) => "invalid_argument",
            CardError::InsufficientFunds { .. } => "insufficient_funds",
            CardError::Codec(_) | CardError::Storage(_) => "internal_error",
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, CardError::Codec(_) | CardError::Storage(_))
    }
}

impl IntoResponse for CardError {
    fn into_response(self) -> Response {
        let status = match &self {
            CardError::CardNotFound(_) | CardError::UserNotFound(_) => StatusCode::NOT_FOUND,
            CardError::IncorrectOwner(_) => StatusCode::FORBIDDEN,
            CardError::WrongStatus(_) => StatusCode::CONFLICT,
            CardError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            CardError::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CardError::Codec(_) | CardError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if self.is_internal() {
            tracing::error!(error = %self, "Card operation failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": self.code(),
            "message": message,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, CardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_identifier_is_a_validation_failure() {
        let err = CardError::from(StoreError::DuplicateIdentifier);
        assert!(matches!(err, CardError::InvalidArgument(_)));
        assert!(!err.is_internal());
    }

    #[test]
    fn test_database_failure_is_internal() {
        let err = CardError::from(StoreError::Database(sqlx::Error::PoolTimedOut));
        assert!(err.is_internal());
        assert_eq!(err.code(), "internal_error");
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (CardError::CardNotFound(CardRef::Source), StatusCode::NOT_FOUND),
            (CardError::UserNotFound("x".into()), StatusCode::NOT_FOUND),
            (CardError::IncorrectOwner("x".into()), StatusCode::FORBIDDEN),
            (CardError::WrongStatus("x".into()), StatusCode::CONFLICT),
            (CardError::InvalidArgument("x".into()), StatusCode::BAD_REQUEST),
            (
                CardError::InsufficientFunds {
                    available: Decimal::ONE,
                    requested: Decimal::TWO,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                CardError::Codec(CodecError::InvalidFormat),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_not_found_message_names_the_side() {
        assert_eq!(
            CardError::CardNotFound(CardRef::Destination).to_string(),
            "Not found: destination card"
        );
    }
}

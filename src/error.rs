//! Core error taxonomy
//! Typed errors surfaced by the settlement core; handlers map them to HTTP.

use axum::http::StatusCode;
use thiserror::Error;

use crate::models::TransactionStatus;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Caller supplied bad input (offer out of range, missing card token...).
    /// Never retried.
    #[error("{0}")]
    Validation(String),

    /// Listing / offer / transaction absent.
    #[error("{0}")]
    NotFound(String),

    /// Precondition state no longer holds (listing not active, offer not
    /// accepted, transaction in the wrong status).
    #[error("{0}")]
    StateConflict(String),

    /// Lifecycle transition requested from a disallowed status.
    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Card decline or EFT initiation failure. Checkout aborts with no
    /// persisted side effects.
    #[error("payment rail error: {0}")]
    PaymentRail(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl CoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::StateConflict(_) => StatusCode::CONFLICT,
            CoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
            CoreError::PaymentRail(_) => StatusCode::PAYMENT_REQUIRED,
            CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// True when a storage error is the live-transaction unique index firing,
/// i.e. a concurrent duplicate checkout lost the race.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation)
        }
        _ => false,
    }
}

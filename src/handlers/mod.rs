//! API Handlers
//! Thin route layer over the settlement core

pub mod checkout;
pub mod instant;
pub mod listings;
pub mod offers;
pub mod transactions;

use axum::{http::StatusCode, response::Json};
use serde::Serialize;
use tracing::warn;

use crate::error::CoreError;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

pub fn error_response(status: StatusCode, message: String) -> (StatusCode, Json<ErrorResponse>) {
    warn!("API Error: {}", message);
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: message,
        }),
    )
}

/// Map a core error onto its HTTP shape.
pub fn reject(e: CoreError) -> (StatusCode, Json<ErrorResponse>) {
    error_response(e.status_code(), e.to_string())
}

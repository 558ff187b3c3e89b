//! Checkout API Handlers
//! /api/checkout endpoints (buy-now, accepted-offer and cart checkout)

use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use std::sync::Arc;

use crate::handlers::{reject, ErrorResponse};
use crate::models::{CartCheckoutRequest, CheckoutRequest, Transaction};
use crate::AppState;

// ========================================
// Response Types
// ========================================

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub success: bool,
    pub transaction: Transaction,
}

#[derive(Serialize)]
pub struct CartCheckoutResponse {
    pub success: bool,
    pub transactions: Vec<Transaction>,
    pub total_cents: i64,
    pub failed_sellers: Vec<String>,
}

// ========================================
// Handlers
// ========================================

/// POST /api/checkout - single-listing checkout. Safe to retry: the same
/// (listing, buyer) pair always lands on the same live transaction.
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, (StatusCode, Json<ErrorResponse>)> {
    let transaction = state.lifecycle.create_or_reuse(&req).await.map_err(reject)?;
    Ok(Json(CheckoutResponse {
        success: true,
        transaction,
    }))
}

/// POST /api/checkout/cart - multi-seller cart checkout
pub async fn checkout_cart(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CartCheckoutRequest>,
) -> Result<Json<CartCheckoutResponse>, (StatusCode, Json<ErrorResponse>)> {
    let outcome = state
        .checkout
        .checkout_cart(
            &req.listing_ids,
            &req.buyer_id,
            req.payment_method,
            req.card_token.as_deref(),
        )
        .await
        .map_err(reject)?;

    Ok(Json(CartCheckoutResponse {
        success: true,
        transactions: outcome.transactions,
        total_cents: outcome.total_cents,
        failed_sellers: outcome.failed_sellers,
    }))
}

//! Transactions API Handlers
//! /api/transactions endpoints (lifecycle transitions)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::handlers::{error_response, reject, ErrorResponse};
use crate::models::{DisputeRequest, ShipRequest, Transaction, TransactionItem};
use crate::AppState;

// ========================================
// Response Types
// ========================================

#[derive(Serialize)]
pub struct TransactionResponse {
    pub success: bool,
    pub transaction: Transaction,
}

#[derive(Serialize)]
pub struct TransactionDetailResponse {
    pub success: bool,
    pub transaction: Transaction,
    pub items: Vec<TransactionItem>,
}

// ========================================
// Handlers
// ========================================

/// GET /api/transactions/:transaction_id - transaction detail with line items
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
) -> Result<Json<TransactionDetailResponse>, (StatusCode, Json<ErrorResponse>)> {
    let transaction = state.lifecycle.get(&transaction_id).await.map_err(reject)?;

    let items: Vec<TransactionItem> =
        sqlx::query_as("SELECT * FROM transaction_items WHERE transaction_id = ? ORDER BY id")
            .bind(&transaction_id)
            .fetch_all(&state.db)
            .await
            .map_err(|e| {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {}", e))
            })?;

    Ok(Json(TransactionDetailResponse {
        success: true,
        transaction,
        items,
    }))
}

/// POST /api/transactions/:transaction_id/ship - seller marks shipped
pub async fn ship(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
    Json(req): Json<ShipRequest>,
) -> Result<Json<TransactionResponse>, (StatusCode, Json<ErrorResponse>)> {
    if req.tracking_number.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "tracking_number is required".to_string(),
        ));
    }
    let transaction = state
        .lifecycle
        .mark_shipped(&transaction_id, &req.tracking_number, req.courier.as_deref())
        .await
        .map_err(reject)?;
    Ok(Json(TransactionResponse {
        success: true,
        transaction,
    }))
}

/// POST /api/transactions/:transaction_id/deliver - courier/webhook marks
/// delivered; starts the inspection window
pub async fn deliver(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
) -> Result<Json<TransactionResponse>, (StatusCode, Json<ErrorResponse>)> {
    let transaction = state
        .lifecycle
        .mark_delivered(&transaction_id)
        .await
        .map_err(reject)?;
    Ok(Json(TransactionResponse {
        success: true,
        transaction,
    }))
}

/// POST /api/transactions/:transaction_id/confirm - buyer confirms, funds
/// release to the seller
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
) -> Result<Json<TransactionResponse>, (StatusCode, Json<ErrorResponse>)> {
    let transaction = state
        .lifecycle
        .confirm_delivery(&transaction_id)
        .await
        .map_err(reject)?;
    Ok(Json(TransactionResponse {
        success: true,
        transaction,
    }))
}

/// POST /api/transactions/:transaction_id/dispute - buyer disputes
pub async fn dispute(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
    Json(req): Json<DisputeRequest>,
) -> Result<Json<TransactionResponse>, (StatusCode, Json<ErrorResponse>)> {
    let transaction = state
        .lifecycle
        .dispute(&transaction_id, req.reason.as_deref())
        .await
        .map_err(reject)?;
    Ok(Json(TransactionResponse {
        success: true,
        transaction,
    }))
}

/// POST /api/transactions/:transaction_id/cancel - abandon an unpaid EFT
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
) -> Result<Json<TransactionResponse>, (StatusCode, Json<ErrorResponse>)> {
    let transaction = state
        .lifecycle
        .cancel(&transaction_id)
        .await
        .map_err(reject)?;
    Ok(Json(TransactionResponse {
        success: true,
        transaction,
    }))
}

/// POST /api/transactions/:transaction_id/refund - refund a paid sale
pub async fn refund(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
) -> Result<Json<TransactionResponse>, (StatusCode, Json<ErrorResponse>)> {
    let transaction = state
        .lifecycle
        .refund(&transaction_id)
        .await
        .map_err(reject)?;
    Ok(Json(TransactionResponse {
        success: true,
        transaction,
    }))
}

//! Instant Offers API Handlers
//! /api/instant-buyers and /api/listings/:id/instant-offers endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::handlers::{error_response, reject, ErrorResponse};
use crate::models::{
    CreateInstantBuyerRequest, GenerateInstantOffersRequest, InstantBuyer, InstantOffer,
};
use crate::pricing::parse_condition_rules;
use crate::AppState;

// ========================================
// Response Types
// ========================================

#[derive(Serialize)]
pub struct InstantBuyerListResponse {
    pub success: bool,
    pub buyers: Vec<InstantBuyer>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct InstantBuyerCreateResponse {
    pub success: bool,
    pub instant_buyer_id: String,
}

#[derive(Serialize)]
pub struct InstantOfferListResponse {
    pub success: bool,
    pub offers: Vec<InstantOffer>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub offers: Vec<InstantOffer>,
    pub skipped: usize,
}

// ========================================
// Handlers
// ========================================

/// GET /api/instant-buyers - list instant buyers
pub async fn list_instant_buyers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<InstantBuyerListResponse>, (StatusCode, Json<ErrorResponse>)> {
    let buyers: Vec<InstantBuyer> =
        sqlx::query_as("SELECT * FROM instant_buyers ORDER BY created_at_ms DESC")
            .fetch_all(&state.db)
            .await
            .map_err(|e| {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {}", e))
            })?;

    let total = buyers.len();
    Ok(Json(InstantBuyerListResponse {
        success: true,
        buyers,
        total,
    }))
}

/// POST /api/instant-buyers - register an instant buyer
pub async fn create_instant_buyer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateInstantBuyerRequest>,
) -> Result<Json<InstantBuyerCreateResponse>, (StatusCode, Json<ErrorResponse>)> {
    if !(0.0..=1.0).contains(&req.base_offer_rate) {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "base_offer_rate must be within [0, 1]".to_string(),
        ));
    }

    // Validate the rule blob up front; unknown keys are tolerated later,
    // malformed JSON is not
    let condition_rules = match &req.condition_rules {
        Some(value) => {
            let raw = value.to_string();
            parse_condition_rules(&raw).map_err(|e| {
                error_response(StatusCode::BAD_REQUEST, format!("condition_rules: {}", e))
            })?;
            Some(raw)
        }
        None => None,
    };

    let instant_buyer_id = Uuid::new_v4().to_string();
    let categories_json = serde_json::to_string(&req.categories)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("categories: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO instant_buyers (
            instant_buyer_id, name, base_offer_rate, condition_rules,
            categories, active, approved, created_at_ms
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    "#,
    )
    .bind(&instant_buyer_id)
    .bind(&req.name)
    .bind(req.base_offer_rate)
    .bind(&condition_rules)
    .bind(&categories_json)
    .bind(req.active as i64)
    .bind(req.approved as i64)
    .bind(chrono::Utc::now().timestamp_millis())
    .execute(&state.db)
    .await
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {}", e)))?;

    info!(
        "Instant buyer created: instant_buyer_id={}, name={}",
        instant_buyer_id, req.name
    );

    Ok(Json(InstantBuyerCreateResponse {
        success: true,
        instant_buyer_id,
    }))
}

/// GET /api/listings/:listing_id/instant-offers - standing offers on a listing
pub async fn list_instant_offers(
    State(state): State<Arc<AppState>>,
    Path(listing_id): Path<String>,
) -> Result<Json<InstantOfferListResponse>, (StatusCode, Json<ErrorResponse>)> {
    let offers = state
        .instant
        .list_for_listing(&listing_id)
        .await
        .map_err(reject)?;

    let total = offers.len();
    Ok(Json(InstantOfferListResponse {
        success: true,
        offers,
        total,
    }))
}

/// POST /api/listings/:listing_id/instant-offers - fan the listing out to
/// all eligible instant buyers
pub async fn generate_instant_offers(
    State(state): State<Arc<AppState>>,
    Path(listing_id): Path<String>,
    Json(req): Json<GenerateInstantOffersRequest>,
) -> Result<Json<GenerateResponse>, (StatusCode, Json<ErrorResponse>)> {
    let outcome = state
        .instant
        .generate(&listing_id, req.market_price_cents, req.condition)
        .await
        .map_err(reject)?;

    Ok(Json(GenerateResponse {
        success: true,
        offers: outcome.offers,
        skipped: outcome.skipped,
    }))
}

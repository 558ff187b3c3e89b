//! Listings API Handlers
//! /api/listings endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::handlers::{error_response, ErrorResponse};
use crate::models::{CreateListingRequest, Listing, ListingStatus};
use crate::AppState;

// ========================================
// Response Types
// ========================================

#[derive(Serialize)]
pub struct ListingListResponse {
    pub success: bool,
    pub listings: Vec<Listing>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct ListingDetailResponse {
    pub success: bool,
    pub listing: Listing,
}

#[derive(Serialize)]
pub struct ListingCreateResponse {
    pub success: bool,
    pub listing: Listing,
}

// ========================================
// Query Parameters
// ========================================

#[derive(Debug, Deserialize)]
pub struct ListListingsQuery {
    pub seller_id: Option<String>,
    pub status: Option<ListingStatus>,
}

// ========================================
// Handlers
// ========================================

/// GET /api/listings - list listings
pub async fn list_listings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListListingsQuery>,
) -> Result<Json<ListingListResponse>, (StatusCode, Json<ErrorResponse>)> {
    let listings: Vec<Listing> = if let Some(seller_id) = &query.seller_id {
        sqlx::query_as(
            "SELECT * FROM listings WHERE seller_id = ? ORDER BY created_at_ms DESC",
        )
        .bind(seller_id)
        .fetch_all(&state.db)
        .await
    } else {
        sqlx::query_as("SELECT * FROM listings ORDER BY created_at_ms DESC")
            .fetch_all(&state.db)
            .await
    }
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {}", e)))?;

    let listings: Vec<Listing> = listings
        .into_iter()
        .filter(|l| query.status.map_or(true, |s| l.status == s))
        .collect();

    let total = listings.len();
    Ok(Json(ListingListResponse {
        success: true,
        listings,
        total,
    }))
}

/// GET /api/listings/:listing_id - listing detail
pub async fn get_listing(
    State(state): State<Arc<AppState>>,
    Path(listing_id): Path<String>,
) -> Result<Json<ListingDetailResponse>, (StatusCode, Json<ErrorResponse>)> {
    let listing: Option<Listing> = sqlx::query_as("SELECT * FROM listings WHERE listing_id = ?")
        .bind(&listing_id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {}", e))
        })?;

    match listing {
        Some(listing) => Ok(Json(ListingDetailResponse {
            success: true,
            listing,
        })),
        None => Err(error_response(
            StatusCode::NOT_FOUND,
            "Listing not found".to_string(),
        )),
    }
}

/// POST /api/listings - create a listing
pub async fn create_listing(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateListingRequest>,
) -> Result<Json<ListingCreateResponse>, (StatusCode, Json<ErrorResponse>)> {
    if req.asking_price_cents < 0 {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "asking_price_cents must be non-negative".to_string(),
        ));
    }
    if req.shipping_cents.map_or(false, |s| s < 0) {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "shipping_cents must be non-negative".to_string(),
        ));
    }

    let now = chrono::Utc::now().timestamp_millis();
    let listing = Listing {
        listing_id: Uuid::new_v4().to_string(),
        seller_id: req.seller_id,
        title: req.title,
        category: req.category,
        condition: req.condition,
        asking_price_cents: req.asking_price_cents,
        shipping_cents: req.shipping_cents,
        status: req.status,
        created_at_ms: now,
        updated_at_ms: now,
    };

    sqlx::query(
        r#"
        INSERT INTO listings (
            listing_id, seller_id, title, category, condition,
            asking_price_cents, shipping_cents, status, created_at_ms, updated_at_ms
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    "#,
    )
    .bind(&listing.listing_id)
    .bind(&listing.seller_id)
    .bind(&listing.title)
    .bind(&listing.category)
    .bind(listing.condition)
    .bind(listing.asking_price_cents)
    .bind(listing.shipping_cents)
    .bind(listing.status)
    .bind(listing.created_at_ms)
    .bind(listing.updated_at_ms)
    .execute(&state.db)
    .await
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {}", e)))?;

    info!(
        "Listing created: listing_id={}, seller_id={}",
        listing.listing_id, listing.seller_id
    );

    Ok(Json(ListingCreateResponse {
        success: true,
        listing,
    }))
}

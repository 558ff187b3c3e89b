//! Offers API Handlers
//! /api/offers endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::handlers::{reject, ErrorResponse};
use crate::models::{CreateOfferRequest, Offer, RespondOfferRequest};
use crate::AppState;

// ========================================
// Response Types
// ========================================

#[derive(Serialize)]
pub struct OfferResponse {
    pub success: bool,
    pub offer: Offer,
}

// ========================================
// Handlers
// ========================================

/// POST /api/offers - submit a buyer offer
pub async fn create_offer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOfferRequest>,
) -> Result<Json<OfferResponse>, (StatusCode, Json<ErrorResponse>)> {
    let offer = state.offers.create_offer(&req).await.map_err(reject)?;
    Ok(Json(OfferResponse {
        success: true,
        offer,
    }))
}

/// GET /api/offers/:offer_id - offer detail
pub async fn get_offer(
    State(state): State<Arc<AppState>>,
    Path(offer_id): Path<String>,
) -> Result<Json<OfferResponse>, (StatusCode, Json<ErrorResponse>)> {
    let offer = state.offers.get(&offer_id).await.map_err(reject)?;
    Ok(Json(OfferResponse {
        success: true,
        offer,
    }))
}

/// POST /api/offers/:offer_id/respond - seller accepts or rejects
pub async fn respond_to_offer(
    State(state): State<Arc<AppState>>,
    Path(offer_id): Path<String>,
    Json(req): Json<RespondOfferRequest>,
) -> Result<Json<OfferResponse>, (StatusCode, Json<ErrorResponse>)> {
    let offer = state
        .offers
        .respond_to_offer(&offer_id, &req.seller_id, req.action)
        .await
        .map_err(reject)?;
    Ok(Json(OfferResponse {
        success: true,
        offer,
    }))
}

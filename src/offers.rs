//! Offer Negotiation Flow
//! Buyer offers against a listing's asking price, bounded to a sane range,
//! convertible into a transaction only after explicit seller acceptance.

use tracing::info;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::CoreError;
use crate::events::{EventSender, NotificationEvent};
use crate::fees::round_half_up;
use crate::models::{
    CreateOfferRequest, Listing, ListingStatus, Offer, OfferAction, OfferStatus,
};

#[derive(Clone)]
pub struct OfferService {
    db: DbPool,
    events: EventSender,
    /// Lower bound as a fraction of asking price (0.5)
    min_ratio: f64,
    /// Upper bound as a fraction of asking price (1.1 — over-asking is
    /// allowed up to 10%, covers bidding wars)
    max_ratio: f64,
    expiry_hours: i64,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl OfferService {
    pub fn new(db: DbPool, events: EventSender, min_ratio: f64, max_ratio: f64, expiry_hours: i64) -> Self {
        Self {
            db,
            events,
            min_ratio,
            max_ratio,
            expiry_hours,
        }
    }

    pub async fn get(&self, offer_id: &str) -> Result<Offer, CoreError> {
        let offer: Option<Offer> = sqlx::query_as("SELECT * FROM offers WHERE offer_id = ?")
            .bind(offer_id)
            .fetch_optional(&self.db)
            .await?;
        offer.ok_or_else(|| CoreError::NotFound(format!("Offer not found: {}", offer_id)))
    }

    /// Submit a buyer offer. Amount must fall inside
    /// [min_ratio, max_ratio] x asking price, bounds inclusive.
    pub async fn create_offer(&self, req: &CreateOfferRequest) -> Result<Offer, CoreError> {
        let listing: Option<Listing> =
            sqlx::query_as("SELECT * FROM listings WHERE listing_id = ?")
                .bind(&req.listing_id)
                .fetch_optional(&self.db)
                .await?;
        let listing = listing.ok_or_else(|| {
            CoreError::NotFound(format!("Listing not found: {}", req.listing_id))
        })?;

        if listing.status != ListingStatus::Active {
            return Err(CoreError::StateConflict(format!(
                "Listing is not active: {}",
                req.listing_id
            )));
        }
        if req.buyer_id == listing.seller_id {
            return Err(CoreError::Validation(
                "cannot make an offer on your own listing".to_string(),
            ));
        }

        let min_cents = round_half_up(listing.asking_price_cents as f64 * self.min_ratio);
        let max_cents = round_half_up(listing.asking_price_cents as f64 * self.max_ratio);
        if req.amount_cents < min_cents || req.amount_cents > max_cents {
            return Err(CoreError::Validation(format!(
                "offer amount {} is outside the allowed range [{}, {}]",
                req.amount_cents, min_cents, max_cents
            )));
        }

        let now = now_ms();
        let offer = Offer {
            offer_id: Uuid::new_v4().to_string(),
            listing_id: req.listing_id.clone(),
            buyer_id: req.buyer_id.clone(),
            amount_cents: req.amount_cents,
            message: req.message.clone(),
            status: OfferStatus::Pending,
            expires_at_ms: now + self.expiry_hours * 3_600_000,
            created_at_ms: now,
            updated_at_ms: now,
        };

        sqlx::query(
            r#"
            INSERT INTO offers (
                offer_id, listing_id, buyer_id, amount_cents, message,
                status, expires_at_ms, created_at_ms, updated_at_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&offer.offer_id)
        .bind(&offer.listing_id)
        .bind(&offer.buyer_id)
        .bind(offer.amount_cents)
        .bind(&offer.message)
        .bind(offer.status)
        .bind(offer.expires_at_ms)
        .bind(offer.created_at_ms)
        .bind(offer.updated_at_ms)
        .execute(&self.db)
        .await?;

        info!(
            "Offer created: offer_id={}, listing_id={}, amount={}c",
            offer.offer_id, offer.listing_id, offer.amount_cents
        );
        self.events.emit(NotificationEvent::OfferReceived {
            offer_id: offer.offer_id.clone(),
            listing_id: offer.listing_id.clone(),
            seller_id: listing.seller_id,
        });

        Ok(offer)
    }

    /// Seller accepts or rejects a pending, unexpired offer. Acceptance does
    /// NOT create a transaction — the buyer checks out separately against
    /// the accepted offer.
    pub async fn respond_to_offer(
        &self,
        offer_id: &str,
        seller_id: &str,
        action: OfferAction,
    ) -> Result<Offer, CoreError> {
        let offer = self.get(offer_id).await?;

        let listing: Option<Listing> =
            sqlx::query_as("SELECT * FROM listings WHERE listing_id = ?")
                .bind(&offer.listing_id)
                .fetch_optional(&self.db)
                .await?;
        let listing = listing.ok_or_else(|| {
            CoreError::NotFound(format!("Listing not found: {}", offer.listing_id))
        })?;

        if listing.seller_id != seller_id {
            return Err(CoreError::Validation(
                "only the listing's seller can respond to this offer".to_string(),
            ));
        }
        if offer.status != OfferStatus::Pending {
            return Err(CoreError::StateConflict(format!(
                "Offer is not pending, currently {:?}",
                offer.status
            )));
        }

        let now = now_ms();
        if offer.is_expired(now) {
            // Record the expiry while we're here; it never becomes Accepted
            sqlx::query("UPDATE offers SET status = ?, updated_at_ms = ? WHERE offer_id = ?")
                .bind(OfferStatus::Expired)
                .bind(now)
                .bind(offer_id)
                .execute(&self.db)
                .await?;
            return Err(CoreError::StateConflict(format!(
                "Offer has expired: {}",
                offer_id
            )));
        }

        let new_status = match action {
            OfferAction::Accept => OfferStatus::Accepted,
            OfferAction::Reject => OfferStatus::Rejected,
        };

        sqlx::query("UPDATE offers SET status = ?, updated_at_ms = ? WHERE offer_id = ?")
            .bind(new_status)
            .bind(now)
            .bind(offer_id)
            .execute(&self.db)
            .await?;

        info!(
            "Offer {}: offer_id={}, listing_id={}",
            match action {
                OfferAction::Accept => "accepted",
                OfferAction::Reject => "rejected",
            },
            offer_id,
            offer.listing_id
        );
        match action {
            OfferAction::Accept => self.events.emit(NotificationEvent::OfferAccepted {
                offer_id: offer_id.to_string(),
                buyer_id: offer.buyer_id.clone(),
            }),
            OfferAction::Reject => self.events.emit(NotificationEvent::OfferRejected {
                offer_id: offer_id.to_string(),
                buyer_id: offer.buyer_id.clone(),
            }),
        }

        self.get(offer_id).await
    }
}

// ========================================
// Tests
// ========================================

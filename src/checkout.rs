//! Multi-Seller Checkout Orchestrator
//! Fans a cart of listings from multiple sellers into one transaction per
//! seller group. Pre-flight availability is all-or-nothing; group settlement
//! is best-effort (committed groups never roll back).

use tracing::{info, warn};

use crate::db::DbPool;
use crate::error::CoreError;
use crate::lifecycle::{LifecycleManager, SettlementInput};
use crate::models::{Listing, ListingStatus, PaymentMethod, Transaction};

// ========================================
// Result types
// ========================================

#[derive(Debug)]
pub struct CartOutcome {
    pub transactions: Vec<Transaction>,
    pub total_cents: i64,
    /// Sellers whose group failed after the pre-flight (logged, skipped)
    pub failed_sellers: Vec<String>,
}

/// One seller's slice of the cart.
struct SellerGroup {
    seller_id: String,
    listings: Vec<Listing>,
}

// ========================================
// Orchestrator
// ========================================

#[derive(Clone)]
pub struct CheckoutOrchestrator {
    db: DbPool,
    lifecycle: LifecycleManager,
}

impl CheckoutOrchestrator {
    pub fn new(db: DbPool, lifecycle: LifecycleManager) -> Self {
        Self { db, lifecycle }
    }

    /// Check out a whole cart. One rail charge and one transaction per
    /// seller; a buyer purchasing from three sellers in one card checkout
    /// produces three separate captures.
    pub async fn checkout_cart(
        &self,
        listing_ids: &[String],
        buyer_id: &str,
        payment_method: PaymentMethod,
        card_token: Option<&str>,
    ) -> Result<CartOutcome, CoreError> {
        if listing_ids.is_empty() {
            return Err(CoreError::Validation("cart is empty".to_string()));
        }

        let listings = self.load_all_active(listing_ids).await?;
        let groups = group_by_seller(listings);

        info!(
            "Cart checkout: buyer_id={}, {} listing(s) across {} seller(s)",
            buyer_id,
            listing_ids.len(),
            groups.len()
        );

        let mut transactions = Vec::new();
        let mut failed_sellers = Vec::new();

        for group in groups {
            let input = settlement_input(&group);
            match self
                .lifecycle
                .settle(input, buyer_id, payment_method, card_token)
                .await
            {
                Ok(tx) => transactions.push(tx),
                Err(e) => {
                    // Committed groups stay committed; this seller is
                    // reported back as failed and the loop moves on.
                    warn!(
                        "Cart group failed: seller_id={}, buyer_id={}, error={}",
                        group.seller_id, buyer_id, e
                    );
                    failed_sellers.push(group.seller_id);
                }
            }
        }

        let total_cents = transactions.iter().map(|t| t.total_cents).sum();
        Ok(CartOutcome {
            transactions,
            total_cents,
            failed_sellers,
        })
    }

    /// Pre-flight: every requested listing must exist and be active, or the
    /// whole checkout fails before anything is charged or written. Stricter
    /// than the single-item path on purpose.
    async fn load_all_active(&self, listing_ids: &[String]) -> Result<Vec<Listing>, CoreError> {
        let mut listings = Vec::with_capacity(listing_ids.len());
        for listing_id in listing_ids {
            let listing: Option<Listing> =
                sqlx::query_as("SELECT * FROM listings WHERE listing_id = ?")
                    .bind(listing_id)
                    .fetch_optional(&self.db)
                    .await?;
            let listing = listing.ok_or_else(|| {
                CoreError::NotFound(format!("Listing not found: {}", listing_id))
            })?;
            if listing.status != ListingStatus::Active {
                return Err(CoreError::StateConflict(format!(
                    "Listing is not active: {}",
                    listing_id
                )));
            }
            listings.push(listing);
        }
        Ok(listings)
    }
}

/// Group cart listings by seller, preserving cart order.
fn group_by_seller(listings: Vec<Listing>) -> Vec<SellerGroup> {
    let mut groups: Vec<SellerGroup> = Vec::new();
    for listing in listings {
        match groups.iter_mut().find(|g| g.seller_id == listing.seller_id) {
            Some(group) => group.listings.push(listing),
            None => groups.push(SellerGroup {
                seller_id: listing.seller_id.clone(),
                listings: vec![listing],
            }),
        }
    }
    groups
}

fn settlement_input(group: &SellerGroup) -> SettlementInput {
    let item_subtotal_cents = group.listings.iter().map(|l| l.asking_price_cents).sum();
    let shipping_subtotal_cents = group
        .listings
        .iter()
        .map(|l| l.shipping_cents.unwrap_or(0))
        .sum();
    SettlementInput {
        seller_id: group.seller_id.clone(),
        primary_listing_id: group.listings[0].listing_id.clone(),
        offer_id: None,
        items: group
            .listings
            .iter()
            .map(|l| (l.listing_id.clone(), l.asking_price_cents))
            .collect(),
        item_subtotal_cents,
        shipping_subtotal_cents,
    }
}

// ========================================
// Tests
// ========================================

//! Shared test fixtures: seeded rows, fake payment rails, wired-up services.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::db::DbPool;
use crate::error::CoreError;
use crate::events::EventSender;
use crate::fees::FeeConfig;
use crate::lifecycle::LifecycleManager;
use crate::models::ListingStatus;
use crate::offers::OfferService;
use crate::payments::{CardCapture, EftInitiation, PaymentRail};

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ========================================
// Fake rails
// ========================================

/// Rail where every call fails, for atomicity tests.
pub struct FailingRail;

impl PaymentRail for FailingRail {
    fn process_eft(&self, _amount_cents: i64, _reference: &str) -> Result<EftInitiation, CoreError> {
        Err(CoreError::PaymentRail("eft rail unavailable".to_string()))
    }

    fn process_card(&self, _amount_cents: i64, _token: &str) -> Result<CardCapture, CoreError> {
        Err(CoreError::PaymentRail("card declined".to_string()))
    }
}

/// Rail that counts calls, for one-charge-per-group assertions.
#[derive(Default)]
pub struct CountingRail {
    eft: AtomicUsize,
    card: AtomicUsize,
}

impl CountingRail {
    pub fn eft_calls(&self) -> usize {
        self.eft.load(Ordering::SeqCst)
    }

    pub fn card_calls(&self) -> usize {
        self.card.load(Ordering::SeqCst)
    }
}

impl PaymentRail for CountingRail {
    fn process_eft(&self, _amount_cents: i64, reference: &str) -> Result<EftInitiation, CoreError> {
        self.eft.fetch_add(1, Ordering::SeqCst);
        Ok(EftInitiation {
            reference: reference.to_string(),
        })
    }

    fn process_card(&self, _amount_cents: i64, _token: &str) -> Result<CardCapture, CoreError> {
        self.card.fetch_add(1, Ordering::SeqCst);
        Ok(CardCapture {
            gateway_transaction_id: format!("CARD-{}", self.card_calls()),
        })
    }
}

/// Rail that succeeds N times and then fails, for partial-success tests.
pub struct FlakyRail {
    allowed: usize,
    calls: AtomicUsize,
}

impl FlakyRail {
    pub fn fail_after(allowed: usize) -> Self {
        Self {
            allowed,
            calls: AtomicUsize::new(0),
        }
    }

    fn take_slot(&self) -> Result<(), CoreError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.allowed {
            Ok(())
        } else {
            Err(CoreError::PaymentRail("rail exhausted".to_string()))
        }
    }
}

impl PaymentRail for FlakyRail {
    fn process_eft(&self, _amount_cents: i64, reference: &str) -> Result<EftInitiation, CoreError> {
        self.take_slot()?;
        Ok(EftInitiation {
            reference: reference.to_string(),
        })
    }

    fn process_card(&self, _amount_cents: i64, _token: &str) -> Result<CardCapture, CoreError> {
        self.take_slot()?;
        Ok(CardCapture {
            gateway_transaction_id: "CARD-flaky".to_string(),
        })
    }
}

// ========================================
// Service construction
// ========================================

pub fn manager_with_rail(pool: &DbPool, rail: Arc<dyn PaymentRail>) -> LifecycleManager {
    let (events, _rx) = EventSender::channel();
    LifecycleManager::new(pool.clone(), rail, FeeConfig::default(), events, 48)
}

pub fn offer_service(pool: &DbPool) -> OfferService {
    let (events, _rx) = EventSender::channel();
    OfferService::new(pool.clone(), events, 0.5, 1.1, 48)
}

// ========================================
// Fixture rows
// ========================================

pub async fn insert_listing(
    pool: &DbPool,
    listing_id: &str,
    seller_id: &str,
    asking_price_cents: i64,
    shipping_cents: Option<i64>,
) {
    let now = now_ms();
    sqlx::query(
        r#"
        INSERT INTO listings (
            listing_id, seller_id, title, category, condition,
            asking_price_cents, shipping_cents, status, created_at_ms, updated_at_ms
        ) VALUES (?, ?, ?, 'electronics', 'good', ?, ?, ?, ?, ?)
    "#,
    )
    .bind(listing_id)
    .bind(seller_id)
    .bind(format!("Test listing {}", listing_id))
    .bind(asking_price_cents)
    .bind(shipping_cents)
    .bind(ListingStatus::Active)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .expect("insert listing");
}

pub async fn listing_status(pool: &DbPool, listing_id: &str) -> ListingStatus {
    let (status,): (ListingStatus,) =
        sqlx::query_as("SELECT status FROM listings WHERE listing_id = ?")
            .bind(listing_id)
            .fetch_one(pool)
            .await
            .expect("listing status");
    status
}

pub async fn accepted_offer(
    pool: &DbPool,
    offer_id: &str,
    listing_id: &str,
    buyer_id: &str,
    amount_cents: i64,
) {
    let now = now_ms();
    sqlx::query(
        r#"
        INSERT INTO offers (
            offer_id, listing_id, buyer_id, amount_cents, message,
            status, expires_at_ms, created_at_ms, updated_at_ms
        ) VALUES (?, ?, ?, ?, NULL, 'accepted', ?, ?, ?)
    "#,
    )
    .bind(offer_id)
    .bind(listing_id)
    .bind(buyer_id)
    .bind(amount_cents)
    .bind(now + 48 * 3_600_000)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .expect("insert offer");
}

pub async fn insert_instant_buyer(
    pool: &DbPool,
    instant_buyer_id: &str,
    base_offer_rate: f64,
    condition_rules: Option<&str>,
    categories: &[&str],
    active: bool,
    approved: bool,
) {
    let categories_json = serde_json::to_string(categories).expect("categories json");
    sqlx::query(
        r#"
        INSERT INTO instant_buyers (
            instant_buyer_id, name, base_offer_rate, condition_rules,
            categories, active, approved, created_at_ms
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    "#,
    )
    .bind(instant_buyer_id)
    .bind(format!("Buyer {}", instant_buyer_id))
    .bind(base_offer_rate)
    .bind(condition_rules)
    .bind(categories_json)
    .bind(active as i64)
    .bind(approved as i64)
    .bind(now_ms())
    .execute(pool)
    .await
    .expect("insert instant buyer");
}

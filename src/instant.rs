//! Instant-Offer Generation
//! Fans a new listing out to every eligible instant buyer. Per-buyer
//! failures are logged and skipped — one misconfigured buyer must never
//! block the others' offers.

use tracing::{info, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::CoreError;
use crate::fees::FeeConfig;
use crate::models::{Condition, InstantBuyer, InstantOffer, InstantOfferStatus, Listing};
use crate::pricing::{calculate_instant_offer, parse_condition_rules};

#[derive(Debug)]
pub struct GenerationOutcome {
    pub offers: Vec<InstantOffer>,
    /// Buyers excluded by a bad configuration or pricing failure
    pub skipped: usize,
}

#[derive(Clone)]
pub struct InstantOfferGenerator {
    db: DbPool,
    fees: FeeConfig,
    expiry_hours: i64,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl InstantOfferGenerator {
    pub fn new(db: DbPool, fees: FeeConfig, expiry_hours: i64) -> Self {
        Self {
            db,
            fees,
            expiry_hours,
        }
    }

    pub async fn list_for_listing(&self, listing_id: &str) -> Result<Vec<InstantOffer>, CoreError> {
        let offers: Vec<InstantOffer> = sqlx::query_as(
            "SELECT * FROM instant_offers WHERE listing_id = ? ORDER BY buyer_pays_cents DESC",
        )
        .bind(listing_id)
        .fetch_all(&self.db)
        .await?;
        Ok(offers)
    }

    /// Generate standing offers for one listing from every active, approved
    /// instant buyer covering its category. market_price and condition are
    /// structured inputs from the pricing subsystem.
    pub async fn generate(
        &self,
        listing_id: &str,
        market_price_cents: i64,
        condition: Condition,
    ) -> Result<GenerationOutcome, CoreError> {
        let listing: Option<Listing> =
            sqlx::query_as("SELECT * FROM listings WHERE listing_id = ?")
                .bind(listing_id)
                .fetch_optional(&self.db)
                .await?;
        let listing = listing
            .ok_or_else(|| CoreError::NotFound(format!("Listing not found: {}", listing_id)))?;

        let buyers: Vec<InstantBuyer> = sqlx::query_as(
            "SELECT * FROM instant_buyers WHERE active = 1 AND approved = 1",
        )
        .fetch_all(&self.db)
        .await?;

        let now = now_ms();
        let expires_at_ms = now + self.expiry_hours * 3_600_000;
        let mut offers = Vec::new();
        let mut skipped = 0usize;

        for buyer in buyers {
            let categories = match buyer.category_list() {
                Ok(c) => c,
                Err(e) => {
                    warn!(
                        "Skipping instant buyer with malformed categories: instant_buyer_id={}, error={}",
                        buyer.instant_buyer_id, e
                    );
                    skipped += 1;
                    continue;
                }
            };
            if !categories.iter().any(|c| c == &listing.category) {
                continue;
            }

            let quote = self.quote_for_buyer(&buyer, market_price_cents, condition);
            let quote = match quote {
                Ok(q) => q,
                Err(e) => {
                    warn!(
                        "Skipping instant buyer: instant_buyer_id={}, error={}",
                        buyer.instant_buyer_id, e
                    );
                    skipped += 1;
                    continue;
                }
            };

            let offer = InstantOffer {
                instant_offer_id: Uuid::new_v4().to_string(),
                listing_id: listing_id.to_string(),
                instant_buyer_id: buyer.instant_buyer_id.clone(),
                seller_receives_cents: quote.seller_receives_cents,
                buyer_pays_cents: quote.buyer_pays_cents,
                platform_fee_cents: quote.platform_fee_cents,
                status: InstantOfferStatus::Pending,
                expires_at_ms,
                created_at_ms: now,
            };

            sqlx::query(
                r#"
                INSERT INTO instant_offers (
                    instant_offer_id, listing_id, instant_buyer_id,
                    seller_receives_cents, buyer_pays_cents, platform_fee_cents,
                    status, expires_at_ms, created_at_ms
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            )
            .bind(&offer.instant_offer_id)
            .bind(&offer.listing_id)
            .bind(&offer.instant_buyer_id)
            .bind(offer.seller_receives_cents)
            .bind(offer.buyer_pays_cents)
            .bind(offer.platform_fee_cents)
            .bind(offer.status)
            .bind(offer.expires_at_ms)
            .bind(offer.created_at_ms)
            .execute(&self.db)
            .await?;

            offers.push(offer);
        }

        info!(
            "Instant offers generated: listing_id={}, offers={}, skipped={}",
            listing_id,
            offers.len(),
            skipped
        );
        Ok(GenerationOutcome { offers, skipped })
    }

    fn quote_for_buyer(
        &self,
        buyer: &InstantBuyer,
        market_price_cents: i64,
        condition: Condition,
    ) -> Result<crate::pricing::InstantOfferQuote, CoreError> {
        let rules = match &buyer.condition_rules {
            Some(raw) => Some(parse_condition_rules(raw)?),
            None => None,
        };
        calculate_instant_offer(
            market_price_cents,
            condition,
            buyer.base_offer_rate,
            rules.as_ref(),
            &self.fees,
        )
    }
}

// ========================================
// Tests
// ========================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::testutil::{insert_instant_buyer, insert_listing};

    fn generator(pool: &DbPool) -> InstantOfferGenerator {
        InstantOfferGenerator::new(pool.clone(), FeeConfig::default(), 48)
    }

    #[tokio::test]
    async fn generates_one_offer_per_eligible_buyer() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 900_000, None).await;
        insert_instant_buyer(&pool, "ib1", 0.60, None, &["electronics"], true, true).await;
        insert_instant_buyer(&pool, "ib2", 0.55, None, &["electronics", "appliances"], true, true)
            .await;
        // Wrong category, inactive, unapproved: all excluded
        insert_instant_buyer(&pool, "ib3", 0.70, None, &["furniture"], true, true).await;
        insert_instant_buyer(&pool, "ib4", 0.70, None, &["electronics"], false, true).await;
        insert_instant_buyer(&pool, "ib5", 0.70, None, &["electronics"], true, false).await;

        let outcome = generator(&pool)
            .generate("l1", 800_000, Condition::Good)
            .await
            .unwrap();
        assert_eq!(outcome.offers.len(), 2);
        assert_eq!(outcome.skipped, 0);

        let ib1 = outcome
            .offers
            .iter()
            .find(|o| o.instant_buyer_id == "ib1")
            .unwrap();
        // 800,000 * 0.60 * 1.0 -> R4,800, 5% fee R240
        assert_eq!(ib1.seller_receives_cents, 480_000);
        assert_eq!(ib1.platform_fee_cents, 24_000);
        assert_eq!(ib1.buyer_pays_cents, 504_000);
        assert_eq!(ib1.status, InstantOfferStatus::Pending);
        assert_eq!(ib1.expires_at_ms - ib1.created_at_ms, 48 * 3_600_000);
    }

    #[tokio::test]
    async fn condition_rules_shift_the_quote() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 900_000, None).await;
        insert_instant_buyer(
            &pool,
            "ib1",
            0.60,
            Some(r#"{"good": 0.5}"#),
            &["electronics"],
            true,
            true,
        )
        .await;

        let outcome = generator(&pool)
            .generate("l1", 800_000, Condition::Good)
            .await
            .unwrap();
        assert_eq!(outcome.offers[0].seller_receives_cents, 240_000);
    }

    #[tokio::test]
    async fn misconfigured_buyer_is_skipped_not_fatal() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 900_000, None).await;
        insert_instant_buyer(
            &pool,
            "bad",
            0.60,
            Some("{broken json"),
            &["electronics"],
            true,
            true,
        )
        .await;
        insert_instant_buyer(&pool, "good", 0.60, None, &["electronics"], true, true).await;

        let outcome = generator(&pool)
            .generate("l1", 800_000, Condition::Good)
            .await
            .unwrap();
        assert_eq!(outcome.offers.len(), 1);
        assert_eq!(outcome.offers[0].instant_buyer_id, "good");
        assert_eq!(outcome.skipped, 1);
    }

    #[tokio::test]
    async fn malformed_categories_blob_is_skipped_and_counted() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 900_000, None).await;
        // The fixture only writes valid JSON; seed the bad row directly
        sqlx::query(
            r#"
            INSERT INTO instant_buyers (
                instant_buyer_id, name, base_offer_rate, condition_rules,
                categories, active, approved, created_at_ms
            ) VALUES ('bad', 'Bad Buyer', 0.60, NULL, 'not json', 1, 1, 0)
        "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        insert_instant_buyer(&pool, "good", 0.60, None, &["electronics"], true, true).await;

        let outcome = generator(&pool)
            .generate("l1", 800_000, Condition::Good)
            .await
            .unwrap();
        assert_eq!(outcome.offers.len(), 1);
        assert_eq!(outcome.offers[0].instant_buyer_id, "good");
        assert_eq!(outcome.skipped, 1);
    }

    #[tokio::test]
    async fn unknown_keys_in_rules_do_not_skip_the_buyer() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 900_000, None).await;
        insert_instant_buyer(
            &pool,
            "ib1",
            0.60,
            Some(r#"{"mint_in_box": 1.5, "poor": 0.4}"#),
            &["electronics"],
            true,
            true,
        )
        .await;

        // Good is not in the rules: neutral 1.0 multiplier applies
        let outcome = generator(&pool)
            .generate("l1", 800_000, Condition::Good)
            .await
            .unwrap();
        assert_eq!(outcome.skipped, 0);
        assert_eq!(outcome.offers[0].seller_receives_cents, 480_000);
    }

    #[tokio::test]
    async fn unknown_listing_is_not_found() {
        let pool = init_test_db().await;
        let err = generator(&pool)
            .generate("ghost", 800_000, Condition::Good)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}

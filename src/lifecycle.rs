//! Transaction Lifecycle Manager
//! Owns transaction creation (idempotent), status transitions, and the
//! inspection/payment-release protocol. All settlement writes for one sale
//! commit as a single database transaction.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{live_status_sql, DbPool};
use crate::error::{is_unique_violation, CoreError};
use crate::events::{EventSender, NotificationEvent};
use crate::fees::{calculate_fees, FeeConfig};
use crate::models::{
    CheckoutRequest, DeliveryStatus, Listing, ListingStatus, Offer, OfferStatus, PaymentMethod,
    PaymentStatus, Transaction, TransactionStatus,
};
use crate::payments::{generate_eft_reference, PaymentRail};

// ========================================
// Settlement input
// ========================================

/// One seller-group sale about to be settled. Built from a single listing
/// (buy-now / accepted offer) or from a cart group by the orchestrator.
#[derive(Debug, Clone)]
pub(crate) struct SettlementInput {
    pub seller_id: String,
    /// The transaction's listing_id column; line items carry the full set.
    pub primary_listing_id: String,
    pub offer_id: Option<String>,
    /// (listing_id, item_price_cents) per listing in the group
    pub items: Vec<(String, i64)>,
    pub item_subtotal_cents: i64,
    pub shipping_subtotal_cents: i64,
}

// ========================================
// Manager
// ========================================

#[derive(Clone)]
pub struct LifecycleManager {
    db: DbPool,
    rail: Arc<dyn PaymentRail>,
    fees: FeeConfig,
    events: EventSender,
    inspection_hours: i64,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl LifecycleManager {
    pub fn new(
        db: DbPool,
        rail: Arc<dyn PaymentRail>,
        fees: FeeConfig,
        events: EventSender,
        inspection_hours: i64,
    ) -> Self {
        Self {
            db,
            rail,
            fees,
            events,
            inspection_hours,
        }
    }

    pub async fn get(&self, transaction_id: &str) -> Result<Transaction, CoreError> {
        let tx: Option<Transaction> =
            sqlx::query_as("SELECT * FROM transactions WHERE transaction_id = ?")
                .bind(transaction_id)
                .fetch_optional(&self.db)
                .await?;
        tx.ok_or_else(|| CoreError::NotFound(format!("Transaction not found: {}", transaction_id)))
    }

    /// Look up the live transaction for (listing, buyer), if one exists.
    pub async fn find_live(
        &self,
        listing_id: &str,
        buyer_id: &str,
    ) -> Result<Option<Transaction>, CoreError> {
        let tx: Option<Transaction> = sqlx::query_as(&format!(
            "SELECT * FROM transactions WHERE listing_id = ? AND buyer_id = ? AND status IN ({})",
            live_status_sql()
        ))
        .bind(listing_id)
        .bind(buyer_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(tx)
    }

    // ========================================
    // Creation
    // ========================================

    /// Single-listing checkout entry point. Re-entry with the same
    /// (listing, buyer) returns the existing live transaction unchanged, so
    /// a client retry or back-button never double-charges.
    pub async fn create_or_reuse(&self, req: &CheckoutRequest) -> Result<Transaction, CoreError> {
        if let Some(existing) = self.find_live(&req.listing_id, &req.buyer_id).await? {
            info!(
                "Reusing live transaction: transaction_id={}, listing_id={}, buyer_id={}",
                existing.transaction_id, req.listing_id, req.buyer_id
            );
            return Ok(existing);
        }

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

        // An accepted offer overrides the asking price
        let item_price_cents = match &req.offer_id {
            Some(offer_id) => {
                let offer = self.load_checkout_offer(offer_id, req).await?;
                offer.amount_cents
            }
            None => listing.asking_price_cents,
        };

        let input = SettlementInput {
            seller_id: listing.seller_id.clone(),
            primary_listing_id: listing.listing_id.clone(),
            offer_id: req.offer_id.clone(),
            items: vec![(listing.listing_id.clone(), item_price_cents)],
            item_subtotal_cents: item_price_cents,
            shipping_subtotal_cents: listing.shipping_cents.unwrap_or(0),
        };

        self.settle(input, &req.buyer_id, req.payment_method, req.card_token.as_deref())
            .await
    }

    /// Validate an offer used as a checkout source: right listing, right
    /// buyer, Accepted and unexpired. Pending or expired offers are rejected
    /// here, never silently coerced.
    async fn load_checkout_offer(
        &self,
        offer_id: &str,
        req: &CheckoutRequest,
    ) -> Result<Offer, CoreError> {
        let offer: Option<Offer> = sqlx::query_as("SELECT * FROM offers WHERE offer_id = ?")
            .bind(offer_id)
            .fetch_optional(&self.db)
            .await?;
        let offer = offer
            .ok_or_else(|| CoreError::NotFound(format!("Offer not found: {}", offer_id)))?;

        if offer.listing_id != req.listing_id {
            return Err(CoreError::Validation(format!(
                "Offer {} does not belong to listing {}",
                offer_id, req.listing_id
            )));
        }
        if offer.buyer_id != req.buyer_id {
            return Err(CoreError::Validation(format!(
                "Offer {} does not belong to buyer {}",
                offer_id, req.buyer_id
            )));
        }
        if offer.status != OfferStatus::Accepted {
            return Err(CoreError::StateConflict(format!(
                "Offer must be accepted before checkout, currently {:?}",
                offer.status
            )));
        }
        if offer.is_expired(now_ms()) {
            return Err(CoreError::StateConflict(format!(
                "Offer has expired: {}",
                offer_id
            )));
        }
        Ok(offer)
    }

    /// Settle one seller-group sale: fee calc, rail call, then one database
    /// transaction covering the transaction insert, line items, listing
    /// flips and offer acceptance. The rail call comes first — if it fails,
    /// nothing is written.
    pub(crate) async fn settle(
        &self,
        input: SettlementInput,
        buyer_id: &str,
        method: PaymentMethod,
        card_token: Option<&str>,
    ) -> Result<Transaction, CoreError> {
        let now = now_ms();
        let fees = calculate_fees(input.item_subtotal_cents, method, &self.fees)?;
        let total_cents = input.item_subtotal_cents + input.shipping_subtotal_cents;

        let (status, payment_status, paid_at_ms, payment_reference) = match method {
            PaymentMethod::Eft => {
                let reference = generate_eft_reference();
                let initiation = self.rail.process_eft(total_cents, &reference)?;
                (
                    TransactionStatus::PaymentPending,
                    PaymentStatus::Pending,
                    None,
                    initiation.reference,
                )
            }
            PaymentMethod::Card => {
                let token = card_token.ok_or_else(|| {
                    CoreError::Validation("card_token is required for card payments".to_string())
                })?;
                let capture = self.rail.process_card(total_cents, token)?;
                (
                    TransactionStatus::Paid,
                    PaymentStatus::Verified,
                    Some(now),
                    capture.gateway_transaction_id,
                )
            }
        };

        let transaction_id = Uuid::new_v4().to_string();
        let mut dbtx = self.db.begin().await?;

        let insert = sqlx::query(
            r#"
            INSERT INTO transactions (
                transaction_id, listing_id, seller_id, buyer_id, offer_id,
                item_price_cents, shipping_cents, total_cents,
                platform_fee_cents, card_fee_cents, seller_receives_cents,
                payment_method, payment_reference,
                status, payment_status, delivery_status,
                paid_at_ms, created_at_ms, updated_at_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&transaction_id)
        .bind(&input.primary_listing_id)
        .bind(&input.seller_id)
        .bind(buyer_id)
        .bind(&input.offer_id)
        .bind(input.item_subtotal_cents)
        .bind(input.shipping_subtotal_cents)
        .bind(total_cents)
        .bind(fees.platform_fee_cents)
        .bind(fees.card_fee_cents)
        .bind(fees.seller_receives_cents)
        .bind(method)
        .bind(&payment_reference)
        .bind(status)
        .bind(payment_status)
        .bind(DeliveryStatus::Pending)
        .bind(paid_at_ms)
        .bind(now)
        .bind(now)
        .execute(&mut *dbtx)
        .await;

        if let Err(e) = insert {
            // Concurrent duplicate lost the race on the live-transaction
            // unique index: return the winner instead.
            if is_unique_violation(&e) {
                drop(dbtx);
                warn!(
                    "Concurrent checkout detected: listing_id={}, buyer_id={}",
                    input.primary_listing_id, buyer_id
                );
                if let Some(existing) =
                    self.find_live(&input.primary_listing_id, buyer_id).await?
                {
                    return Ok(existing);
                }
            }
            return Err(CoreError::Storage(e));
        }

        for (listing_id, item_price_cents) in &input.items {
            sqlx::query(
                r#"
                INSERT INTO transaction_items (transaction_id, listing_id, item_price_cents)
                VALUES (?, ?, ?)
            "#,
            )
            .bind(&transaction_id)
            .bind(listing_id)
            .bind(item_price_cents)
            .execute(&mut *dbtx)
            .await?;

            // Compare-and-set: only an active listing can be sold, and only
            // once. Anything else rolls the whole group back.
            let flipped = sqlx::query(
                "UPDATE listings SET status = ?, updated_at_ms = ? WHERE listing_id = ? AND status = ?",
            )
            .bind(ListingStatus::Sold)
            .bind(now)
            .bind(listing_id)
            .bind(ListingStatus::Active)
            .execute(&mut *dbtx)
            .await?;

            if flipped.rows_affected() == 0 {
                return Err(CoreError::StateConflict(format!(
                    "Listing is no longer active: {}",
                    listing_id
                )));
            }
        }

        if let Some(offer_id) = &input.offer_id {
            // Idempotent: re-accepting an already-accepted offer is a no-op
            sqlx::query("UPDATE offers SET status = ?, updated_at_ms = ? WHERE offer_id = ?")
                .bind(OfferStatus::Accepted)
                .bind(now)
                .bind(offer_id)
                .execute(&mut *dbtx)
                .await?;
        }

        dbtx.commit().await?;

        info!(
            "Transaction created: transaction_id={}, seller_id={}, buyer_id={}, total={}c, method={:?}",
            transaction_id, input.seller_id, buyer_id, total_cents, method
        );

        match method {
            PaymentMethod::Eft => self.events.emit(NotificationEvent::EftInitiated {
                transaction_id: transaction_id.clone(),
                buyer_id: buyer_id.to_string(),
                reference: payment_reference.clone(),
            }),
            PaymentMethod::Card => self.events.emit(NotificationEvent::PaymentReceived {
                transaction_id: transaction_id.clone(),
                seller_id: input.seller_id.clone(),
            }),
        }

        Ok(Transaction {
            transaction_id,
            listing_id: input.primary_listing_id,
            seller_id: input.seller_id,
            buyer_id: buyer_id.to_string(),
            offer_id: input.offer_id,
            item_price_cents: input.item_subtotal_cents,
            shipping_cents: input.shipping_subtotal_cents,
            total_cents,
            platform_fee_cents: fees.platform_fee_cents,
            card_fee_cents: fees.card_fee_cents,
            seller_receives_cents: fees.seller_receives_cents,
            payment_method: method,
            payment_reference: Some(payment_reference),
            status,
            payment_status,
            delivery_status: DeliveryStatus::Pending,
            tracking_number: None,
            courier: None,
            paid_at_ms,
            shipped_at_ms: None,
            delivered_at_ms: None,
            completed_at_ms: None,
            created_at_ms: now,
            updated_at_ms: now,
        })
    }

    // ========================================
    // Transitions
    // ========================================

    /// Paid -> Shipped. Rejected from any other status.
    pub async fn mark_shipped(
        &self,
        transaction_id: &str,
        tracking_number: &str,
        courier: Option<&str>,
    ) -> Result<Transaction, CoreError> {
        let tx = self.get(transaction_id).await?;
        self.require_from(&tx, &[TransactionStatus::Paid], TransactionStatus::Shipped)?;

        let now = now_ms();
        let updated = sqlx::query(
            r#"
            UPDATE transactions SET
                status = ?, delivery_status = ?,
                tracking_number = ?, courier = ?,
                shipped_at_ms = ?, updated_at_ms = ?
            WHERE transaction_id = ? AND status = ?
        "#,
        )
        .bind(TransactionStatus::Shipped)
        .bind(DeliveryStatus::Shipped)
        .bind(tracking_number)
        .bind(courier)
        .bind(now)
        .bind(now)
        .bind(transaction_id)
        .bind(TransactionStatus::Paid)
        .execute(&self.db)
        .await?;

        if updated.rows_affected() == 0 {
            let current = self.get(transaction_id).await?;
            return Err(CoreError::InvalidTransition {
                from: current.status,
                to: TransactionStatus::Shipped,
            });
        }

        info!(
            "Transaction shipped: transaction_id={}, tracking={}",
            transaction_id, tracking_number
        );
        self.events.emit(NotificationEvent::Shipped {
            transaction_id: transaction_id.to_string(),
            buyer_id: tx.buyer_id.clone(),
            tracking_number: tracking_number.to_string(),
        });

        self.get(transaction_id).await
    }

    /// Shipped -> InspectionPeriod. `delivered_at_ms` anchors the 48-hour
    /// inspection window; the buyer may dispute inside it, after which the
    /// sweep auto-releases.
    pub async fn mark_delivered(&self, transaction_id: &str) -> Result<Transaction, CoreError> {
        let tx = self.get(transaction_id).await?;
        self.require_from(
            &tx,
            &[TransactionStatus::Shipped],
            TransactionStatus::InspectionPeriod,
        )?;

        let now = now_ms();
        let updated = sqlx::query(
            r#"
            UPDATE transactions SET
                status = ?, delivery_status = ?,
                delivered_at_ms = ?, updated_at_ms = ?
            WHERE transaction_id = ? AND status = ?
        "#,
        )
        .bind(TransactionStatus::InspectionPeriod)
        .bind(DeliveryStatus::Delivered)
        .bind(now)
        .bind(now)
        .bind(transaction_id)
        .bind(TransactionStatus::Shipped)
        .execute(&self.db)
        .await?;

        if updated.rows_affected() == 0 {
            let current = self.get(transaction_id).await?;
            return Err(CoreError::InvalidTransition {
                from: current.status,
                to: TransactionStatus::InspectionPeriod,
            });
        }

        info!("Transaction delivered: transaction_id={}", transaction_id);
        self.events.emit(NotificationEvent::Delivered {
            transaction_id: transaction_id.to_string(),
            buyer_id: tx.buyer_id.clone(),
        });

        self.get(transaction_id).await
    }

    /// Delivered/InspectionPeriod -> Completed. This is the trigger that
    /// releases escrowed funds to the seller.
    pub async fn confirm_delivery(&self, transaction_id: &str) -> Result<Transaction, CoreError> {
        let tx = self.get(transaction_id).await?;
        self.complete(&tx).await
    }

    async fn complete(&self, tx: &Transaction) -> Result<Transaction, CoreError> {
        let from = [
            TransactionStatus::Delivered,
            TransactionStatus::InspectionPeriod,
        ];
        self.require_from(tx, &from, TransactionStatus::Completed)?;

        let now = now_ms();
        let updated = sqlx::query(&format!(
            r#"
            UPDATE transactions SET
                status = ?, completed_at_ms = ?, updated_at_ms = ?
            WHERE transaction_id = ? AND status IN ({})
        "#,
            status_sql_list(&from)
        ))
        .bind(TransactionStatus::Completed)
        .bind(now)
        .bind(now)
        .bind(&tx.transaction_id)
        .execute(&self.db)
        .await?;

        if updated.rows_affected() == 0 {
            let current = self.get(&tx.transaction_id).await?;
            return Err(CoreError::InvalidTransition {
                from: current.status,
                to: TransactionStatus::Completed,
            });
        }

        info!(
            "Transaction completed: transaction_id={}, releasing {}c to seller {}",
            tx.transaction_id, tx.seller_receives_cents, tx.seller_id
        );
        self.events.emit(NotificationEvent::FundsReleased {
            transaction_id: tx.transaction_id.clone(),
            seller_id: tx.seller_id.clone(),
            amount_cents: tx.seller_receives_cents,
        });

        self.get(&tx.transaction_id).await
    }

    /// Paid/Shipped/Delivered/InspectionPeriod -> Disputed (terminal;
    /// resolution is a back-office concern).
    pub async fn dispute(
        &self,
        transaction_id: &str,
        reason: Option<&str>,
    ) -> Result<Transaction, CoreError> {
        let tx = self.get(transaction_id).await?;
        let from = [
            TransactionStatus::Paid,
            TransactionStatus::Shipped,
            TransactionStatus::Delivered,
            TransactionStatus::InspectionPeriod,
        ];
        self.require_from(&tx, &from, TransactionStatus::Disputed)?;

        let now = now_ms();
        let updated = sqlx::query(&format!(
            "UPDATE transactions SET status = ?, updated_at_ms = ? WHERE transaction_id = ? AND status IN ({})",
            status_sql_list(&from)
        ))
        .bind(TransactionStatus::Disputed)
        .bind(now)
        .bind(transaction_id)
        .execute(&self.db)
        .await?;

        if updated.rows_affected() == 0 {
            let current = self.get(transaction_id).await?;
            return Err(CoreError::InvalidTransition {
                from: current.status,
                to: TransactionStatus::Disputed,
            });
        }

        warn!(
            "Transaction disputed: transaction_id={}, reason={:?}",
            transaction_id, reason
        );
        self.events.emit(NotificationEvent::Disputed {
            transaction_id: transaction_id.to_string(),
            seller_id: tx.seller_id.clone(),
        });

        self.get(transaction_id).await
    }

    /// PaymentPending -> Cancelled (EFT never arrived / buyer backed out).
    pub async fn cancel(&self, transaction_id: &str) -> Result<Transaction, CoreError> {
        self.terminal_transition(
            transaction_id,
            &[TransactionStatus::PaymentPending],
            TransactionStatus::Cancelled,
        )
        .await
    }

    /// Paid -> Refunded.
    pub async fn refund(&self, transaction_id: &str) -> Result<Transaction, CoreError> {
        self.terminal_transition(
            transaction_id,
            &[TransactionStatus::Paid],
            TransactionStatus::Refunded,
        )
        .await
    }

    async fn terminal_transition(
        &self,
        transaction_id: &str,
        from: &[TransactionStatus],
        to: TransactionStatus,
    ) -> Result<Transaction, CoreError> {
        let tx = self.get(transaction_id).await?;
        self.require_from(&tx, from, to)?;

        let now = now_ms();
        let updated = sqlx::query(&format!(
            "UPDATE transactions SET status = ?, updated_at_ms = ? WHERE transaction_id = ? AND status IN ({})",
            status_sql_list(from)
        ))
        .bind(to)
        .bind(now)
        .bind(transaction_id)
        .execute(&self.db)
        .await?;

        if updated.rows_affected() == 0 {
            let current = self.get(transaction_id).await?;
            return Err(CoreError::InvalidTransition {
                from: current.status,
                to,
            });
        }

        info!(
            "Transaction {}: transaction_id={}",
            to.as_str(),
            transaction_id
        );
        self.get(transaction_id).await
    }

    fn require_from(
        &self,
        tx: &Transaction,
        allowed: &[TransactionStatus],
        to: TransactionStatus,
    ) -> Result<(), CoreError> {
        if !allowed.contains(&tx.status) {
            return Err(CoreError::InvalidTransition {
                from: tx.status,
                to,
            });
        }
        Ok(())
    }

    // ========================================
    // Inspection sweep
    // ========================================

    /// Auto-release payouts for inspection periods that have lapsed without
    /// a dispute. Run periodically from a background task.
    pub async fn release_due(&self, now_ms: i64) -> Result<u64, CoreError> {
        let cutoff = now_ms - self.inspection_hours * 3_600_000;

        let due: Vec<Transaction> = sqlx::query_as(
            "SELECT * FROM transactions WHERE status = ? AND delivered_at_ms <= ?",
        )
        .bind(TransactionStatus::InspectionPeriod)
        .bind(cutoff)
        .fetch_all(&self.db)
        .await?;

        let mut released = 0u64;
        for tx in due {
            match self.complete(&tx).await {
                Ok(_) => released += 1,
                // A dispute can land between the select and the update;
                // skip and keep sweeping.
                Err(CoreError::InvalidTransition { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        if released > 0 {
            info!("Inspection sweep released {} payout(s)", released);
        }
        Ok(released)
    }
}

/// Quoted SQL list for a status set, e.g. `'paid', 'shipped'`.
fn status_sql_list(statuses: &[TransactionStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

// ========================================
// Tests
// ========================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::testutil::{
        accepted_offer, insert_listing, listing_status, manager_with_rail, now_ms, FailingRail,
    };
    use crate::payments::SimulatedRail;

    fn card_request(listing_id: &str, buyer_id: &str) -> CheckoutRequest {
        CheckoutRequest {
            listing_id: listing_id.to_string(),
            buyer_id: buyer_id.to_string(),
            offer_id: None,
            payment_method: PaymentMethod::Card,
            card_token: Some("tok_test".to_string()),
        }
    }

    #[tokio::test]
    async fn card_checkout_creates_paid_transaction_and_sells_listing() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 1_000_000, Some(5_000)).await;
        let mgr = manager_with_rail(&pool, Arc::new(SimulatedRail));

        let tx = mgr.create_or_reuse(&card_request("l1", "buyer1")).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Paid);
        assert_eq!(tx.payment_status, PaymentStatus::Verified);
        assert!(tx.paid_at_ms.is_some());
        assert_eq!(tx.item_price_cents, 1_000_000);
        assert_eq!(tx.total_cents, 1_005_000);
        assert_eq!(tx.platform_fee_cents, 55_000);
        assert_eq!(tx.card_fee_cents, 20_000);
        assert_eq!(tx.seller_receives_cents, 925_000);
        assert_eq!(listing_status(&pool, "l1").await, ListingStatus::Sold);
    }

    #[tokio::test]
    async fn eft_checkout_is_payment_pending_with_reference() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 100_000, None).await;
        let mgr = manager_with_rail(&pool, Arc::new(SimulatedRail));

        let req = CheckoutRequest {
            payment_method: PaymentMethod::Eft,
            card_token: None,
            ..card_request("l1", "buyer1")
        };
        let tx = mgr.create_or_reuse(&req).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::PaymentPending);
        assert_eq!(tx.payment_status, PaymentStatus::Pending);
        assert!(tx.paid_at_ms.is_none());
        assert!(tx.payment_reference.unwrap().starts_with("EFT-"));
        // R1,000 is under the free threshold: whole price goes to the seller
        assert_eq!(tx.platform_fee_cents, 0);
        assert_eq!(tx.card_fee_cents, 0);
        assert_eq!(tx.seller_receives_cents, 100_000);
    }

    #[tokio::test]
    async fn checkout_is_idempotent_per_listing_and_buyer() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 500_000, None).await;
        let mgr = manager_with_rail(&pool, Arc::new(SimulatedRail));

        let first = mgr.create_or_reuse(&card_request("l1", "buyer1")).await.unwrap();
        let second = mgr.create_or_reuse(&card_request("l1", "buyer1")).await.unwrap();
        assert_eq!(first.transaction_id, second.transaction_id);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn live_index_resolves_duplicate_settlement_to_the_winner() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 500_000, None).await;
        let mgr = manager_with_rail(&pool, Arc::new(SimulatedRail));
        let winner = mgr.create_or_reuse(&card_request("l1", "buyer1")).await.unwrap();

        // Drive settlement directly, skipping the live-transaction pre-check,
        // the way a second racing request would after both passed the lookup.
        // The insert must hit idx_transactions_live and resolve to the winner.
        let input = SettlementInput {
            seller_id: "seller1".to_string(),
            primary_listing_id: "l1".to_string(),
            offer_id: None,
            items: vec![("l1".to_string(), 500_000)],
            item_subtotal_cents: 500_000,
            shipping_subtotal_cents: 0,
        };
        let resolved = mgr
            .settle(input, "buyer1", PaymentMethod::Card, Some("tok_test"))
            .await
            .unwrap();
        assert_eq!(resolved.transaction_id, winner.transaction_id);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn rail_failure_persists_nothing() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 500_000, None).await;
        let mgr = manager_with_rail(&pool, Arc::new(FailingRail));

        let err = mgr.create_or_reuse(&card_request("l1", "buyer1")).await.unwrap_err();
        assert!(matches!(err, CoreError::PaymentRail(_)));

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(listing_status(&pool, "l1").await, ListingStatus::Active);
    }

    #[tokio::test]
    async fn missing_card_token_is_a_validation_error() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 500_000, None).await;
        let mgr = manager_with_rail(&pool, Arc::new(SimulatedRail));

        let req = CheckoutRequest {
            card_token: None,
            ..card_request("l1", "buyer1")
        };
        let err = mgr.create_or_reuse(&req).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn inactive_listing_is_a_state_conflict() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 500_000, None).await;
        sqlx::query("UPDATE listings SET status = 'removed' WHERE listing_id = 'l1'")
            .execute(&pool)
            .await
            .unwrap();
        let mgr = manager_with_rail(&pool, Arc::new(SimulatedRail));

        let err = mgr.create_or_reuse(&card_request("l1", "buyer1")).await.unwrap_err();
        assert!(matches!(err, CoreError::StateConflict(_)));
    }

    #[tokio::test]
    async fn accepted_offer_price_overrides_asking_price() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 1_000_000, None).await;
        accepted_offer(&pool, "o1", "l1", "buyer1", 800_000).await;
        let mgr = manager_with_rail(&pool, Arc::new(SimulatedRail));

        let req = CheckoutRequest {
            offer_id: Some("o1".to_string()),
            ..card_request("l1", "buyer1")
        };
        let tx = mgr.create_or_reuse(&req).await.unwrap();
        assert_eq!(tx.item_price_cents, 800_000);
        assert_eq!(tx.offer_id.as_deref(), Some("o1"));
    }

    #[tokio::test]
    async fn pending_offer_cannot_back_a_checkout() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 1_000_000, None).await;
        accepted_offer(&pool, "o1", "l1", "buyer1", 800_000).await;
        sqlx::query("UPDATE offers SET status = 'pending' WHERE offer_id = 'o1'")
            .execute(&pool)
            .await
            .unwrap();
        let mgr = manager_with_rail(&pool, Arc::new(SimulatedRail));

        let req = CheckoutRequest {
            offer_id: Some("o1".to_string()),
            ..card_request("l1", "buyer1")
        };
        let err = mgr.create_or_reuse(&req).await.unwrap_err();
        assert!(matches!(err, CoreError::StateConflict(_)));
    }

    #[tokio::test]
    async fn expired_accepted_offer_cannot_back_a_checkout() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 1_000_000, None).await;
        accepted_offer(&pool, "o1", "l1", "buyer1", 800_000).await;
        sqlx::query("UPDATE offers SET expires_at_ms = 1 WHERE offer_id = 'o1'")
            .execute(&pool)
            .await
            .unwrap();
        let mgr = manager_with_rail(&pool, Arc::new(SimulatedRail));

        let req = CheckoutRequest {
            offer_id: Some("o1".to_string()),
            ..card_request("l1", "buyer1")
        };
        let err = mgr.create_or_reuse(&req).await.unwrap_err();
        assert!(matches!(err, CoreError::StateConflict(_)));
        // Nothing settled at the stale offer price
        assert_eq!(listing_status(&pool, "l1").await, ListingStatus::Active);
    }

    #[tokio::test]
    async fn ship_deliver_confirm_walks_the_machine() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 500_000, None).await;
        let mgr = manager_with_rail(&pool, Arc::new(SimulatedRail));
        let tx = mgr.create_or_reuse(&card_request("l1", "buyer1")).await.unwrap();

        let shipped = mgr
            .mark_shipped(&tx.transaction_id, "TRK123", Some("courier-guy"))
            .await
            .unwrap();
        assert_eq!(shipped.status, TransactionStatus::Shipped);
        assert_eq!(shipped.delivery_status, DeliveryStatus::Shipped);
        assert_eq!(shipped.tracking_number.as_deref(), Some("TRK123"));
        assert!(shipped.shipped_at_ms.is_some());

        let delivered = mgr.mark_delivered(&tx.transaction_id).await.unwrap();
        assert_eq!(delivered.status, TransactionStatus::InspectionPeriod);
        assert_eq!(delivered.delivery_status, DeliveryStatus::Delivered);
        assert!(delivered.delivered_at_ms.is_some());

        let completed = mgr.confirm_delivery(&tx.transaction_id).await.unwrap();
        assert_eq!(completed.status, TransactionStatus::Completed);
        assert!(completed.completed_at_ms.is_some());
    }

    #[tokio::test]
    async fn ship_from_payment_pending_is_invalid() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 500_000, None).await;
        let mgr = manager_with_rail(&pool, Arc::new(SimulatedRail));
        let req = CheckoutRequest {
            payment_method: PaymentMethod::Eft,
            card_token: None,
            ..card_request("l1", "buyer1")
        };
        let tx = mgr.create_or_reuse(&req).await.unwrap();

        let err = mgr
            .mark_shipped(&tx.transaction_id, "TRK123", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransition {
                from: TransactionStatus::PaymentPending,
                to: TransactionStatus::Shipped
            }
        ));
    }

    #[tokio::test]
    async fn deliver_before_ship_is_invalid() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 500_000, None).await;
        let mgr = manager_with_rail(&pool, Arc::new(SimulatedRail));
        let tx = mgr.create_or_reuse(&card_request("l1", "buyer1")).await.unwrap();

        assert!(mgr.mark_delivered(&tx.transaction_id).await.is_err());
        assert!(mgr.confirm_delivery(&tx.transaction_id).await.is_err());
    }

    #[tokio::test]
    async fn dispute_from_inspection_blocks_completion() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 500_000, None).await;
        let mgr = manager_with_rail(&pool, Arc::new(SimulatedRail));
        let tx = mgr.create_or_reuse(&card_request("l1", "buyer1")).await.unwrap();
        mgr.mark_shipped(&tx.transaction_id, "TRK1", None).await.unwrap();
        mgr.mark_delivered(&tx.transaction_id).await.unwrap();

        let disputed = mgr
            .dispute(&tx.transaction_id, Some("item not as described"))
            .await
            .unwrap();
        assert_eq!(disputed.status, TransactionStatus::Disputed);
        assert!(mgr.confirm_delivery(&tx.transaction_id).await.is_err());
    }

    #[tokio::test]
    async fn cancel_only_from_payment_pending() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 500_000, None).await;
        let mgr = manager_with_rail(&pool, Arc::new(SimulatedRail));
        let tx = mgr.create_or_reuse(&card_request("l1", "buyer1")).await.unwrap();

        // tx is Paid: cancel must fail, refund must succeed
        assert!(mgr.cancel(&tx.transaction_id).await.is_err());
        let refunded = mgr.refund(&tx.transaction_id).await.unwrap();
        assert_eq!(refunded.status, TransactionStatus::Refunded);
    }

    #[tokio::test]
    async fn sweep_releases_lapsed_inspection_periods_only() {
        let pool = init_test_db().await;
        insert_listing(&pool, "l1", "seller1", 500_000, None).await;
        insert_listing(&pool, "l2", "seller2", 500_000, None).await;
        let mgr = manager_with_rail(&pool, Arc::new(SimulatedRail));

        let fresh = mgr.create_or_reuse(&card_request("l1", "buyer1")).await.unwrap();
        mgr.mark_shipped(&fresh.transaction_id, "T1", None).await.unwrap();
        mgr.mark_delivered(&fresh.transaction_id).await.unwrap();

        let lapsed = mgr.create_or_reuse(&card_request("l2", "buyer1")).await.unwrap();
        mgr.mark_shipped(&lapsed.transaction_id, "T2", None).await.unwrap();
        mgr.mark_delivered(&lapsed.transaction_id).await.unwrap();
        // Backdate l2's delivery past the 48h window
        sqlx::query("UPDATE transactions SET delivered_at_ms = ? WHERE transaction_id = ?")
            .bind(now_ms() - 49 * 3_600_000)
            .bind(&lapsed.transaction_id)
            .execute(&pool)
            .await
            .unwrap();

        let released = mgr.release_due(now_ms()).await.unwrap();
        assert_eq!(released, 1);
        assert_eq!(
            mgr.get(&lapsed.transaction_id).await.unwrap().status,
            TransactionStatus::Completed
        );
        assert_eq!(
            mgr.get(&fresh.transaction_id).await.unwrap().status,
            TransactionStatus::InspectionPeriod
        );
    }

    #[tokio::test]
    async fn transition_table_matches_operations() {
        use TransactionStatus::*;
        assert!(Paid.can_transition(Shipped));
        assert!(Shipped.can_transition(InspectionPeriod));
        assert!(InspectionPeriod.can_transition(Completed));
        assert!(InspectionPeriod.can_transition(Disputed));
        assert!(PaymentPending.can_transition(Cancelled));
        assert!(Paid.can_transition(Refunded));
        assert!(!Completed.can_transition(Disputed));
        assert!(!Created.can_transition(Shipped));
        assert!(Completed.is_terminal());
        assert!(InspectionPeriod.is_live());
    }
}

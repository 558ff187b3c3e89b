//! Data Models
//! Listing, Offer, Transaction, InstantBuyer, InstantOffer row and API types

use serde::{Deserialize, Serialize};

// ========================================
// Enums
// ========================================

/// Listing lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ListingStatus {
    Draft,
    PendingApproval,
    Active,
    Sold,
    Expired,
    Removed,
}

/// Item condition. Closed set: anything else in stored rule blobs is dropped
/// at the parse boundary, never passed into the pricing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Condition {
    New,
    LikeNew,
    Good,
    Fair,
    Poor,
}

impl Condition {
    /// Parse a condition key from a buyer's rule blob. Returns None for
    /// unrecognized keys instead of failing the caller.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "new" => Some(Condition::New),
            "like_new" => Some(Condition::LikeNew),
            "good" => Some(Condition::Good),
            "fair" => Some(Condition::Fair),
            "poor" => Some(Condition::Poor),
            _ => None,
        }
    }
}

/// Payment rail selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PaymentMethod {
    Eft,
    Card,
}

/// Transaction settlement status (the state machine)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TransactionStatus {
    Created,
    PaymentPending,
    Paid,
    Shipped,
    Delivered,
    InspectionPeriod,
    Completed,
    Disputed,
    Cancelled,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Created => "created",
            TransactionStatus::PaymentPending => "payment_pending",
            TransactionStatus::Paid => "paid",
            TransactionStatus::Shipped => "shipped",
            TransactionStatus::Delivered => "delivered",
            TransactionStatus::InspectionPeriod => "inspection_period",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Disputed => "disputed",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Refunded => "refunded",
        }
    }

    /// Statuses counted as "live" for the one-live-transaction-per
    /// (listing, buyer) uniqueness guarantee.
    pub const LIVE: [TransactionStatus; 6] = [
        TransactionStatus::Created,
        TransactionStatus::PaymentPending,
        TransactionStatus::Paid,
        TransactionStatus::Shipped,
        TransactionStatus::Delivered,
        TransactionStatus::InspectionPeriod,
    ];

    pub fn is_live(&self) -> bool {
        Self::LIVE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed
                | TransactionStatus::Disputed
                | TransactionStatus::Cancelled
                | TransactionStatus::Refunded
        )
    }

    /// Allowed next statuses per the settlement state machine.
    pub fn can_transition(&self, to: TransactionStatus) -> bool {
        use TransactionStatus::*;
        match (self, to) {
            (Created, PaymentPending) => true,
            (PaymentPending, Paid) | (PaymentPending, Cancelled) => true,
            (Paid, Shipped) | (Paid, Disputed) | (Paid, Refunded) => true,
            (Shipped, Delivered) | (Shipped, InspectionPeriod) | (Shipped, Disputed) => true,
            (Delivered, InspectionPeriod) | (Delivered, Completed) | (Delivered, Disputed) => true,
            (InspectionPeriod, Completed) | (InspectionPeriod, Disputed) => true,
            _ => false,
        }
    }
}

/// Payment verification status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Verified,
}

/// Delivery progress status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Shipped,
    Delivered,
}

/// Negotiated offer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
    Withdrawn,
}

/// Standing instant-buyer offer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum InstantOfferStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

/// Seller response to a negotiated offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferAction {
    Accept,
    Reject,
}

// ========================================
// Listing
// ========================================

/// Listing (DB row)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Listing {
    pub listing_id: String,
    pub seller_id: String,
    pub title: String,
    pub category: String,
    pub condition: Condition,
    pub asking_price_cents: i64,
    pub shipping_cents: Option<i64>,
    pub status: ListingStatus,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Listing creation request
#[derive(Debug, Deserialize)]
pub struct CreateListingRequest {
    pub seller_id: String,
    pub title: String,
    pub category: String,
    pub condition: Condition,
    pub asking_price_cents: i64,
    pub shipping_cents: Option<i64>,
    #[serde(default = "default_listing_status")]
    pub status: ListingStatus,
}

fn default_listing_status() -> ListingStatus {
    ListingStatus::Active
}

// ========================================
// Offer
// ========================================

/// Offer (DB row)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Offer {
    pub offer_id: String,
    pub listing_id: String,
    pub buyer_id: String,
    pub amount_cents: i64,
    pub message: Option<String>,
    pub status: OfferStatus,
    pub expires_at_ms: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Offer {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Offer creation request
#[derive(Debug, Deserialize)]
pub struct CreateOfferRequest {
    pub listing_id: String,
    pub buyer_id: String,
    pub amount_cents: i64,
    pub message: Option<String>,
}

/// Seller response request
#[derive(Debug, Deserialize)]
pub struct RespondOfferRequest {
    pub seller_id: String,
    pub action: OfferAction,
}

// ========================================
// Transaction
// ========================================

/// Transaction (DB row) — one per seller-group sale
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub transaction_id: String,
    pub listing_id: String,
    pub seller_id: String,
    pub buyer_id: String,
    pub offer_id: Option<String>,
    pub item_price_cents: i64,
    pub shipping_cents: i64,
    pub total_cents: i64,
    pub platform_fee_cents: i64,
    pub card_fee_cents: i64,
    pub seller_receives_cents: i64,
    pub payment_method: PaymentMethod,
    pub payment_reference: Option<String>,
    pub status: TransactionStatus,
    pub payment_status: PaymentStatus,
    pub delivery_status: DeliveryStatus,
    pub tracking_number: Option<String>,
    pub courier: Option<String>,
    pub paid_at_ms: Option<i64>,
    pub shipped_at_ms: Option<i64>,
    pub delivered_at_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Transaction line item (DB row) — the listings bundled into one
/// seller-group transaction
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransactionItem {
    pub id: i64,
    pub transaction_id: String,
    pub listing_id: String,
    pub item_price_cents: i64,
}

/// Single-listing checkout request (buy-now or accepted-offer checkout)
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub listing_id: String,
    pub buyer_id: String,
    pub offer_id: Option<String>,
    pub payment_method: PaymentMethod,
    pub card_token: Option<String>,
}

/// Cart checkout request (multi-seller)
#[derive(Debug, Deserialize)]
pub struct CartCheckoutRequest {
    pub listing_ids: Vec<String>,
    pub buyer_id: String,
    pub payment_method: PaymentMethod,
    pub card_token: Option<String>,
}

/// Mark-shipped request
#[derive(Debug, Deserialize)]
pub struct ShipRequest {
    pub tracking_number: String,
    pub courier: Option<String>,
}

/// Dispute request
#[derive(Debug, Deserialize)]
pub struct DisputeRequest {
    pub reason: Option<String>,
}

// ========================================
// Instant Buyer / Instant Offer
// ========================================

/// InstantBuyer (DB row) — pre-approved business entity receiving standing
/// offers on new listings in its categories
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InstantBuyer {
    pub instant_buyer_id: String,
    pub name: String,
    pub base_offer_rate: f64,
    pub condition_rules: Option<String>,
    pub categories: String,
    pub active: i64,
    pub approved: i64,
    pub created_at_ms: i64,
}

impl InstantBuyer {
    /// Parse the stored categories JSON array. Callers decide how to surface
    /// a malformed blob; it is never swallowed into an empty list.
    pub fn category_list(&self) -> Result<Vec<String>, serde_json::Error> {
        serde_json::from_str(&self.categories)
    }
}

/// InstantBuyer creation request
#[derive(Debug, Deserialize)]
pub struct CreateInstantBuyerRequest {
    pub name: String,
    pub base_offer_rate: f64,
    pub condition_rules: Option<serde_json::Value>,
    pub categories: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub approved: bool,
}

fn default_true() -> bool {
    true
}

/// InstantOffer (DB row)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InstantOffer {
    pub instant_offer_id: String,
    pub listing_id: String,
    pub instant_buyer_id: String,
    pub seller_receives_cents: i64,
    pub buyer_pays_cents: i64,
    pub platform_fee_cents: i64,
    pub status: InstantOfferStatus,
    pub expires_at_ms: i64,
    pub created_at_ms: i64,
}

/// Instant-offer generation request. market_price and condition come from
/// the pricing/vision subsystem as structured inputs.
#[derive(Debug, Deserialize)]
pub struct GenerateInstantOffersRequest {
    pub market_price_cents: i64,
    pub condition: Condition,
}

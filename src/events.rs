//! Notification events
//! Post-commit hand-off to the notification subsystem. Emission is
//! fire-and-forget: a dead notifier can never fail or roll back the state
//! transition that triggered it.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    OfferReceived {
        offer_id: String,
        listing_id: String,
        seller_id: String,
    },
    OfferAccepted {
        offer_id: String,
        buyer_id: String,
    },
    OfferRejected {
        offer_id: String,
        buyer_id: String,
    },
    EftInitiated {
        transaction_id: String,
        buyer_id: String,
        reference: String,
    },
    PaymentReceived {
        transaction_id: String,
        seller_id: String,
    },
    Shipped {
        transaction_id: String,
        buyer_id: String,
        tracking_number: String,
    },
    Delivered {
        transaction_id: String,
        buyer_id: String,
    },
    FundsReleased {
        transaction_id: String,
        seller_id: String,
        amount_cents: i64,
    },
    Disputed {
        transaction_id: String,
        seller_id: String,
    },
}

/// Sending half handed to the settlement components.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<NotificationEvent>,
}

impl EventSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<NotificationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit after a successful commit. Never surfaces an error to the caller.
    pub fn emit(&self, event: NotificationEvent) {
        if let Err(e) = self.tx.send(event) {
            warn!("Notification channel closed, event dropped: {:?}", e.0);
        }
    }
}

/// Background notifier loop. The real email collaborator sits behind this;
/// here each event is logged as its dispatch.
pub async fn run_notifier(mut rx: mpsc::UnboundedReceiver<NotificationEvent>) {
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(json) => info!("📨 Notification dispatched: {}", json),
            Err(e) => warn!("Failed to serialize notification: {}", e),
        }
    }
    info!("Notifier stopped");
}

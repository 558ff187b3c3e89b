use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

mod checkout;
mod db;
mod error;
mod events;
mod fees;
mod handlers;
mod instant;
mod lifecycle;
mod models;
mod offers;
mod payments;
mod pricing;
#[cfg(test)]
mod testutil;

use checkout::CheckoutOrchestrator;
use db::DbPool;
use events::EventSender;
use fees::FeeConfig;
use instant::InstantOfferGenerator;
use lifecycle::LifecycleManager;
use offers::OfferService;
use payments::SimulatedRail;

// ========================================
// Configuration
// ========================================

/// Built once from the environment in main; everything downstream receives
/// it explicitly so tests can swap in fixed values.
#[derive(Clone)]
struct AppConfig {
    bind_addr: String,
    db_path: String,
    fees: FeeConfig,
    offer_min_ratio: f64,
    offer_max_ratio: f64,
    offer_expiry_hours: i64,
    inspection_hours: i64,
    sweep_interval_secs: u64,
}

impl AppConfig {
    fn from_env() -> Self {
        Self {
            bind_addr: env_or("FLIPPIN_BIND_ADDR", "0.0.0.0:3000".to_string()),
            db_path: env_or("FLIPPIN_DB_PATH", "flippin.db".to_string()),
            fees: FeeConfig {
                platform_rate: env_or("FLIPPIN_PLATFORM_RATE", 0.055),
                card_rate: env_or("FLIPPIN_CARD_RATE", 0.02),
                free_threshold_cents: env_or("FLIPPIN_FREE_THRESHOLD_CENTS", 100_000),
                instant_fee_rate: env_or("FLIPPIN_INSTANT_FEE_RATE", 0.05),
            },
            offer_min_ratio: env_or("FLIPPIN_OFFER_MIN_RATIO", 0.5),
            offer_max_ratio: env_or("FLIPPIN_OFFER_MAX_RATIO", 1.1),
            offer_expiry_hours: env_or("FLIPPIN_OFFER_EXPIRY_HOURS", 48),
            inspection_hours: env_or("FLIPPIN_INSPECTION_HOURS", 48),
            sweep_interval_secs: env_or("FLIPPIN_SWEEP_INTERVAL_SECS", 600),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ========================================
// Application state
// ========================================

pub struct AppState {
    pub db: DbPool,
    pub offers: OfferService,
    pub lifecycle: LifecycleManager,
    pub checkout: CheckoutOrchestrator,
    pub instant: InstantOfferGenerator,
}

// ========================================
// Health check
// ========================================

#[derive(serde::Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
}

async fn health_check() -> axum::response::Json<HealthResponse> {
    axum::response::Json(HealthResponse {
        status: "ok".to_string(),
        service: "flippin-settlement-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ========================================
// Main
// ========================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AppConfig::from_env();
    let pool = db::init_db(&config.db_path).await?;

    let (events, notifications) = EventSender::channel();
    tokio::spawn(events::run_notifier(notifications));

    let rail = Arc::new(SimulatedRail);
    let lifecycle = LifecycleManager::new(
        pool.clone(),
        rail,
        config.fees.clone(),
        events.clone(),
        config.inspection_hours,
    );
    let state = Arc::new(AppState {
        db: pool.clone(),
        offers: OfferService::new(
            pool.clone(),
            events.clone(),
            config.offer_min_ratio,
            config.offer_max_ratio,
            config.offer_expiry_hours,
        ),
        checkout: CheckoutOrchestrator::new(pool.clone(), lifecycle.clone()),
        instant: InstantOfferGenerator::new(
            pool.clone(),
            config.fees.clone(),
            config.offer_expiry_hours,
        ),
        lifecycle,
    });

    // Inspection sweep: auto-release payouts once the dispute window lapses
    {
        let lifecycle = state.lifecycle.clone();
        let interval = Duration::from_secs(config.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = chrono::Utc::now().timestamp_millis();
                if let Err(e) = lifecycle.release_due(now).await {
                    error!("Inspection sweep failed: {}", e);
                }
            }
        });
    }

    let app = Router::new()
        .route("/api/health", get(health_check))
        .route(
            "/api/listings",
            get(handlers::listings::list_listings).post(handlers::listings::create_listing),
        )
        .route("/api/listings/:listing_id", get(handlers::listings::get_listing))
        .route(
            "/api/listings/:listing_id/instant-offers",
            get(handlers::instant::list_instant_offers)
                .post(handlers::instant::generate_instant_offers),
        )
        .route("/api/offers", post(handlers::offers::create_offer))
        .route("/api/offers/:offer_id", get(handlers::offers::get_offer))
        .route(
            "/api/offers/:offer_id/respond",
            post(handlers::offers::respond_to_offer),
        )
        .route("/api/checkout", post(handlers::checkout::checkout))
        .route("/api/checkout/cart", post(handlers::checkout::checkout_cart))
        .route(
            "/api/transactions/:transaction_id",
            get(handlers::transactions::get_transaction),
        )
        .route(
            "/api/transactions/:transaction_id/ship",
            post(handlers::transactions::ship),
        )
        .route(
            "/api/transactions/:transaction_id/deliver",
            post(handlers::transactions::deliver),
        )
        .route(
            "/api/transactions/:transaction_id/confirm",
            post(handlers::transactions::confirm),
        )
        .route(
            "/api/transactions/:transaction_id/dispute",
            post(handlers::transactions::dispute),
        )
        .route(
            "/api/transactions/:transaction_id/cancel",
            post(handlers::transactions::cancel),
        )
        .route(
            "/api/transactions/:transaction_id/refund",
            post(handlers::transactions::refund),
        )
        .route(
            "/api/instant-buyers",
            get(handlers::instant::list_instant_buyers)
                .post(handlers::instant::create_instant_buyer),
        )
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!("🚀 Flippin Settlement API listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

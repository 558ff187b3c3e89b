//! Database Module
//! SQLite-backed storage for listings/offers/transactions/instant buyers

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use tracing::info;

use crate::models::TransactionStatus;

/// Database connection pool
pub type DbPool = Pool<Sqlite>;

/// Quoted SQL list of the live transaction statuses, e.g.
/// `'created', 'payment_pending', ...` — used by the partial unique index
/// and the live-transaction lookup so the two can never disagree.
pub fn live_status_sql() -> String {
    TransactionStatus::LIVE
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Initialize the database
pub async fn init_db(db_path: &str) -> Result<DbPool> {
    let db_url = format!("sqlite:{}?mode=rwc", db_path);

    info!("Initializing database: {}", db_path);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    create_schema(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// In-memory database for tests. A single connection so every query sees the
/// same memory database.
#[cfg(test)]
pub async fn init_test_db() -> DbPool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    create_schema(&pool).await.expect("schema");
    pool
}

/// Schema creation
async fn create_schema(pool: &DbPool) -> Result<()> {
    // listings table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS listings (
            listing_id TEXT PRIMARY KEY,
            seller_id TEXT NOT NULL,
            title TEXT NOT NULL,
            category TEXT NOT NULL,
            condition TEXT NOT NULL,
            asking_price_cents INTEGER NOT NULL,
            shipping_cents INTEGER,
            status TEXT NOT NULL DEFAULT 'draft',
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL
        )
    "#,
    )
    .execute(pool)
    .await?;

    // offers table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS offers (
            offer_id TEXT PRIMARY KEY,
            listing_id TEXT NOT NULL,
            buyer_id TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            message TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            expires_at_ms INTEGER NOT NULL,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL,
            FOREIGN KEY (listing_id) REFERENCES listings(listing_id)
        )
    "#,
    )
    .execute(pool)
    .await?;

    // transactions table (one row per seller-group sale)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            transaction_id TEXT PRIMARY KEY,
            listing_id TEXT NOT NULL,
            seller_id TEXT NOT NULL,
            buyer_id TEXT NOT NULL,
            offer_id TEXT,
            item_price_cents INTEGER NOT NULL,
            shipping_cents INTEGER NOT NULL DEFAULT 0,
            total_cents INTEGER NOT NULL,
            platform_fee_cents INTEGER NOT NULL DEFAULT 0,
            card_fee_cents INTEGER NOT NULL DEFAULT 0,
            seller_receives_cents INTEGER NOT NULL,
            payment_method TEXT NOT NULL,
            payment_reference TEXT,
            status TEXT NOT NULL DEFAULT 'created',
            payment_status TEXT NOT NULL DEFAULT 'pending',
            delivery_status TEXT NOT NULL DEFAULT 'pending',
            tracking_number TEXT,
            courier TEXT,
            paid_at_ms INTEGER,
            shipped_at_ms INTEGER,
            delivered_at_ms INTEGER,
            completed_at_ms INTEGER,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL,
            FOREIGN KEY (listing_id) REFERENCES listings(listing_id)
        )
    "#,
    )
    .execute(pool)
    .await?;

    // At most one live transaction per (listing, buyer). The storage layer,
    // not the application check, is what makes duplicate concurrent checkouts
    // safe.
    sqlx::query(&format!(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_live
        ON transactions(listing_id, buyer_id)
        WHERE status IN ({})
    "#,
        live_status_sql()
    ))
    .execute(pool)
    .await?;

    // transaction_items table (line items of a seller-group sale)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transaction_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transaction_id TEXT NOT NULL,
            listing_id TEXT NOT NULL,
            item_price_cents INTEGER NOT NULL,
            FOREIGN KEY (transaction_id) REFERENCES transactions(transaction_id)
        )
    "#,
    )
    .execute(pool)
    .await?;

    // instant_buyers table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS instant_buyers (
            instant_buyer_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            base_offer_rate REAL NOT NULL,
            condition_rules TEXT,
            categories TEXT NOT NULL DEFAULT '[]',
            active INTEGER NOT NULL DEFAULT 1,
            approved INTEGER NOT NULL DEFAULT 0,
            created_at_ms INTEGER NOT NULL
        )
    "#,
    )
    .execute(pool)
    .await?;

    // instant_offers table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS instant_offers (
            instant_offer_id TEXT PRIMARY KEY,
            listing_id TEXT NOT NULL,
            instant_buyer_id TEXT NOT NULL,
            seller_receives_cents INTEGER NOT NULL,
            buyer_pays_cents INTEGER NOT NULL,
            platform_fee_cents INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            expires_at_ms INTEGER NOT NULL,
            created_at_ms INTEGER NOT NULL,
            FOREIGN KEY (listing_id) REFERENCES listings(listing_id),
            FOREIGN KEY (instant_buyer_id) REFERENCES instant_buyers(instant_buyer_id)
        )
    "#,
    )
    .execute(pool)
    .await?;

    // Indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_listings_seller ON listings(seller_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_listings_status ON listings(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_offers_listing ON offers(listing_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_offers_buyer ON offers(buyer_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_buyer ON transactions(buyer_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_seller ON transactions(seller_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_status ON transactions(status)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transaction_items_tx ON transaction_items(transaction_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_instant_offers_listing ON instant_offers(listing_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

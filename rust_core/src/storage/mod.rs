//! Persistence for catalog items, price snapshots and inventories.
//!
//! The engine talks to the [`Storage`] trait only; the Postgres backend is
//! what runs in production and the in-memory backend backs tests. Pool
//! creation uses consistent timeout and connection settings across
//! services.

use crate::types::{
    CanonicalItem, InventoryHolding, InventoryValuationSnapshot, MarketItemSnapshot,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::env;
use std::time::Duration;
use uuid::Uuid;

pub mod memory;
pub mod postgres;
pub mod retry;

pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;

/// Backend-agnostic persistence contract.
///
/// Snapshot writes carry cycle-timestamp precedence: a write whose
/// `last_cycle_at` is not newer than the stored row is discarded and the
/// call reports `false`. Valuation writes are windowed: at most one row
/// per profile per clock hour.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn upsert_item(&self, item: &CanonicalItem) -> Result<()>;
    async fn get_item(&self, id: Uuid) -> Result<Option<CanonicalItem>>;
    async fn get_item_by_name(&self, app_id: u64, name: &str) -> Result<Option<CanonicalItem>>;
    async fn list_items(&self, app_id: u64) -> Result<Vec<CanonicalItem>>;

    async fn get_snapshot(&self, item_id: Uuid) -> Result<Option<MarketItemSnapshot>>;
    /// Store a snapshot if its cycle timestamp beats the stored one.
    /// Returns whether the write took effect.
    async fn put_snapshot(&self, snapshot: &MarketItemSnapshot) -> Result<bool>;
    async fn list_snapshots(&self) -> Result<Vec<MarketItemSnapshot>>;

    /// Replace a profile's holdings wholesale.
    async fn replace_holdings(&self, profile_id: Uuid, holdings: &[InventoryHolding])
        -> Result<()>;
    async fn get_holdings(&self, profile_id: Uuid) -> Result<Vec<InventoryHolding>>;

    /// Append a valuation row unless one already exists for the profile in
    /// the clock hour containing `snapshot.timestamp`. Returns whether the
    /// row was written.
    async fn append_valuation(&self, snapshot: &InventoryValuationSnapshot) -> Result<bool>;
    async fn latest_valuation(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<InventoryValuationSnapshot>>;
}

/// Start of the clock hour containing `at`. Valuation snapshots are
/// windowed on this boundary.
pub fn hour_floor(at: DateTime<Utc>) -> DateTime<Utc> {
    let secs = at.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(3600), 0).unwrap_or(at)
}

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct DbPoolConfig {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections to maintain
    pub min_connections: u32,
    /// Timeout for acquiring a connection
    pub acquire_timeout: Duration,
    /// How long idle connections are kept alive
    pub idle_timeout: Duration,
    /// Maximum lifetime of a connection
    pub max_lifetime: Duration,
}

impl Default for DbPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300), // 5 minutes
            max_lifetime: Duration::from_secs(1800), // 30 minutes
        }
    }
}

impl DbPoolConfig {
    /// Create config from environment variables with fallback to provided defaults
    pub fn from_env_with_defaults(defaults: Self) -> Self {
        Self {
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.min_connections),
            acquire_timeout: env::var("DB_ACQUIRE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.acquire_timeout),
            idle_timeout: env::var("DB_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            max_lifetime: env::var("DB_MAX_LIFETIME_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_lifetime),
        }
    }
}

/// Create a database connection pool with the given configuration.
pub async fn create_pool(database_url: &str, config: &DbPoolConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await
        .context("Failed to create database connection pool")?;

    tracing::info!(
        "Database pool created: max={}, min={}, acquire_timeout={}s",
        config.max_connections,
        config.min_connections,
        config.acquire_timeout.as_secs()
    );

    Ok(pool)
}

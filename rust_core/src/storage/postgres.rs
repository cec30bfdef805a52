//! Postgres storage backend.
//!
//! Items and valuation rows use typed columns; the snapshot's nested
//! analytics (per-market prices, buckets, extremes) travel as one jsonb
//! payload with `last_cycle_at` surfaced as a column so write precedence
//! can be enforced in the upsert itself.

use crate::currency::CurrencyCode;
use crate::storage::{hour_floor, retry::execute_with_retry, Storage};
use crate::types::{
    CanonicalItem, InventoryHolding, InventoryValuationSnapshot, MarketItemSnapshot,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Duration;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const MAX_DB_ATTEMPTS: u32 = 3;

pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the schema when it does not exist yet.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id UUID PRIMARY KEY,
                app_id BIGINT NOT NULL,
                name TEXT NOT NULL,
                icon_url TEXT,
                is_tradable BOOLEAN NOT NULL DEFAULT TRUE,
                is_marketable BOOLEAN NOT NULL DEFAULT TRUE,
                subscriptions_lifetime BIGINT,
                supply JSONB NOT NULL DEFAULT '{}'::jsonb,
                first_seen_at TIMESTAMPTZ NOT NULL,
                UNIQUE (app_id, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create items table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS item_snapshots (
                item_id UUID PRIMARY KEY REFERENCES items(id),
                payload JSONB NOT NULL,
                last_cycle_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create item_snapshots table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS inventory_holdings (
                profile_id UUID NOT NULL,
                item_id UUID NOT NULL REFERENCES items(id),
                quantity BIGINT NOT NULL,
                acquisition_price BIGINT,
                acquisition_currency TEXT,
                PRIMARY KEY (profile_id, item_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create inventory_holdings table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS inventory_valuations (
                id BIGSERIAL PRIMARY KEY,
                profile_id UUID NOT NULL,
                ts TIMESTAMPTZ NOT NULL,
                currency TEXT NOT NULL,
                invested_value BIGINT,
                market_value BIGINT NOT NULL,
                total_items BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create inventory_valuations table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_valuations_profile_ts \
             ON inventory_valuations (profile_id, ts DESC)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create valuation index")?;

        Ok(())
    }

    fn row_to_item(row: &sqlx::postgres::PgRow) -> Result<CanonicalItem> {
        let supply_json: serde_json::Value = row.try_get("supply")?;
        Ok(CanonicalItem {
            id: row.try_get("id")?,
            app_id: row.try_get::<i64, _>("app_id")? as u64,
            name: row.try_get("name")?,
            icon_url: row.try_get("icon_url")?,
            is_tradable: row.try_get("is_tradable")?,
            is_marketable: row.try_get("is_marketable")?,
            subscriptions_lifetime: row
                .try_get::<Option<i64>, _>("subscriptions_lifetime")?
                .map(|v| v as u64),
            supply: serde_json::from_value(supply_json)
                .context("invalid supply payload in items row")?,
            first_seen_at: row.try_get("first_seen_at")?,
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn upsert_item(&self, item: &CanonicalItem) -> Result<()> {
        let supply = serde_json::to_value(item.supply)?;
        execute_with_retry(
            || async {
                sqlx::query(
                    r#"
                    INSERT INTO items
                        (id, app_id, name, icon_url, is_tradable, is_marketable,
                         subscriptions_lifetime, supply, first_seen_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    ON CONFLICT (app_id, name) DO UPDATE SET
                        icon_url = EXCLUDED.icon_url,
                        is_tradable = EXCLUDED.is_tradable,
                        is_marketable = EXCLUDED.is_marketable,
                        subscriptions_lifetime = EXCLUDED.subscriptions_lifetime,
                        supply = EXCLUDED.supply
                    "#,
                )
                .bind(item.id)
                .bind(item.app_id as i64)
                .bind(&item.name)
                .bind(&item.icon_url)
                .bind(item.is_tradable)
                .bind(item.is_marketable)
                .bind(item.subscriptions_lifetime.map(|v| v as i64))
                .bind(&supply)
                .bind(item.first_seen_at)
                .execute(&self.pool)
                .await
                .context("Failed to upsert item")
            },
            MAX_DB_ATTEMPTS,
        )
        .await?;
        Ok(())
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<CanonicalItem>> {
        let row = sqlx::query("SELECT * FROM items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch item")?;
        row.as_ref().map(Self::row_to_item).transpose()
    }

    async fn get_item_by_name(&self, app_id: u64, name: &str) -> Result<Option<CanonicalItem>> {
        let row = sqlx::query("SELECT * FROM items WHERE app_id = $1 AND name = $2")
            .bind(app_id as i64)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch item by name")?;
        row.as_ref().map(Self::row_to_item).transpose()
    }

    async fn list_items(&self, app_id: u64) -> Result<Vec<CanonicalItem>> {
        let rows = sqlx::query("SELECT * FROM items WHERE app_id = $1 ORDER BY name")
            .bind(app_id as i64)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list items")?;
        rows.iter().map(Self::row_to_item).collect()
    }

    async fn get_snapshot(&self, item_id: Uuid) -> Result<Option<MarketItemSnapshot>> {
        let row = sqlx::query("SELECT payload FROM item_snapshots WHERE item_id = $1")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch snapshot")?;
        match row {
            Some(row) => {
                let payload: serde_json::Value = row.try_get("payload")?;
                Ok(Some(
                    serde_json::from_value(payload).context("invalid snapshot payload")?,
                ))
            }
            None => Ok(None),
        }
    }

    async fn put_snapshot(&self, snapshot: &MarketItemSnapshot) -> Result<bool> {
        let payload = serde_json::to_value(snapshot)?;
        // Precedence lives in the upsert predicate so concurrent writers
        // cannot interleave a stale cycle over a newer one.
        let result = execute_with_retry(
            || async {
                sqlx::query(
                    r#"
                    INSERT INTO item_snapshots (item_id, payload, last_cycle_at)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (item_id) DO UPDATE SET
                        payload = EXCLUDED.payload,
                        last_cycle_at = EXCLUDED.last_cycle_at
                    WHERE item_snapshots.last_cycle_at IS NULL
                       OR EXCLUDED.last_cycle_at > item_snapshots.last_cycle_at
                    "#,
                )
                .bind(snapshot.item_id)
                .bind(&payload)
                .bind(snapshot.last_cycle_at)
                .execute(&self.pool)
                .await
                .context("Failed to upsert snapshot")
            },
            MAX_DB_ATTEMPTS,
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_snapshots(&self) -> Result<Vec<MarketItemSnapshot>> {
        let rows = sqlx::query("SELECT payload FROM item_snapshots")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list snapshots")?;
        rows.iter()
            .map(|row| {
                let payload: serde_json::Value = row.try_get("payload")?;
                serde_json::from_value(payload).context("invalid snapshot payload")
            })
            .collect()
    }

    async fn replace_holdings(
        &self,
        profile_id: Uuid,
        holdings: &[InventoryHolding],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin tx")?;

        sqlx::query("DELETE FROM inventory_holdings WHERE profile_id = $1")
            .bind(profile_id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear holdings")?;

        for holding in holdings {
            sqlx::query(
                r#"
                INSERT INTO inventory_holdings
                    (profile_id, item_id, quantity, acquisition_price, acquisition_currency)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (profile_id, item_id) DO UPDATE SET
                    quantity = inventory_holdings.quantity + EXCLUDED.quantity
                "#,
            )
            .bind(profile_id)
            .bind(holding.item_id)
            .bind(holding.quantity as i64)
            .bind(holding.acquisition_price.map(|p| p.minor()))
            .bind(holding.acquisition_currency.as_ref().map(|c| c.as_str()))
            .execute(&mut *tx)
            .await
            .context("Failed to insert holding")?;
        }

        tx.commit().await.context("Failed to commit holdings")?;
        Ok(())
    }

    async fn get_holdings(&self, profile_id: Uuid) -> Result<Vec<InventoryHolding>> {
        let rows = sqlx::query(
            "SELECT item_id, quantity, acquisition_price, acquisition_currency \
             FROM inventory_holdings WHERE profile_id = $1",
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch holdings")?;

        rows.iter()
            .map(|row| {
                Ok(InventoryHolding {
                    profile_id,
                    item_id: row.try_get("item_id")?,
                    quantity: row.try_get::<i64, _>("quantity")? as u32,
                    acquisition_price: row
                        .try_get::<Option<i64>, _>("acquisition_price")?
                        .map(crate::currency::Money::from_minor),
                    acquisition_currency: row
                        .try_get::<Option<String>, _>("acquisition_currency")?
                        .map(|c| CurrencyCode::new(&c)),
                })
            })
            .collect()
    }

    async fn append_valuation(&self, snapshot: &InventoryValuationSnapshot) -> Result<bool> {
        let window_start = hour_floor(snapshot.timestamp);
        let window_end = window_start + Duration::hours(1);

        let result = sqlx::query(
            r#"
            INSERT INTO inventory_valuations
                (profile_id, ts, currency, invested_value, market_value, total_items)
            SELECT $1, $2, $3, $4, $5, $6
            WHERE NOT EXISTS (
                SELECT 1 FROM inventory_valuations
                WHERE profile_id = $1 AND ts >= $7 AND ts < $8
            )
            "#,
        )
        .bind(snapshot.profile_id)
        .bind(snapshot.timestamp)
        .bind(snapshot.currency.as_str())
        .bind(snapshot.invested_value.map(|v| v.minor()))
        .bind(snapshot.market_value.minor())
        .bind(snapshot.total_items as i64)
        .bind(window_start)
        .bind(window_end)
        .execute(&self.pool)
        .await
        .context("Failed to append valuation")?;

        Ok(result.rows_affected() > 0)
    }

    async fn latest_valuation(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<InventoryValuationSnapshot>> {
        let row = sqlx::query(
            "SELECT ts, currency, invested_value, market_value, total_items \
             FROM inventory_valuations WHERE profile_id = $1 \
             ORDER BY ts DESC LIMIT 1",
        )
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest valuation")?;

        match row {
            Some(row) => {
                Ok(Some(InventoryValuationSnapshot {
                    profile_id,
                    timestamp: row.try_get("ts")?,
                    currency: CurrencyCode::new(&row.try_get::<String, _>("currency")?),
                    invested_value: row
                        .try_get::<Option<i64>, _>("invested_value")?
                        .map(crate::currency::Money::from_minor),
                    market_value: crate::currency::Money::from_minor(
                        row.try_get::<i64, _>("market_value")?,
                    ),
                    total_items: row.try_get::<i64, _>("total_items")? as u64,
                }))
            }
            None => Ok(None),
        }
    }
}

//! In-memory storage backend.
//!
//! Honors the same write-precedence rules as the Postgres backend so the
//! engine's concurrency behavior can be tested without a database.

use crate::storage::{hour_floor, Storage};
use crate::types::{
    CanonicalItem, InventoryHolding, InventoryValuationSnapshot, MarketItemSnapshot,
};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<Uuid, CanonicalItem>>,
    snapshots: RwLock<HashMap<Uuid, MarketItemSnapshot>>,
    holdings: RwLock<HashMap<Uuid, Vec<InventoryHolding>>>,
    valuations: RwLock<HashMap<Uuid, Vec<InventoryValuationSnapshot>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn upsert_item(&self, item: &CanonicalItem) -> Result<()> {
        self.items.write().insert(item.id, item.clone());
        Ok(())
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<CanonicalItem>> {
        Ok(self.items.read().get(&id).cloned())
    }

    async fn get_item_by_name(&self, app_id: u64, name: &str) -> Result<Option<CanonicalItem>> {
        Ok(self
            .items
            .read()
            .values()
            .find(|i| i.app_id == app_id && i.name == name)
            .cloned())
    }

    async fn list_items(&self, app_id: u64) -> Result<Vec<CanonicalItem>> {
        Ok(self
            .items
            .read()
            .values()
            .filter(|i| i.app_id == app_id)
            .cloned()
            .collect())
    }

    async fn get_snapshot(&self, item_id: Uuid) -> Result<Option<MarketItemSnapshot>> {
        Ok(self.snapshots.read().get(&item_id).cloned())
    }

    async fn put_snapshot(&self, snapshot: &MarketItemSnapshot) -> Result<bool> {
        let mut snapshots = self.snapshots.write();
        if let Some(existing) = snapshots.get(&snapshot.item_id) {
            if snapshot.last_cycle_at <= existing.last_cycle_at {
                return Ok(false);
            }
        }
        snapshots.insert(snapshot.item_id, snapshot.clone());
        Ok(true)
    }

    async fn list_snapshots(&self) -> Result<Vec<MarketItemSnapshot>> {
        Ok(self.snapshots.read().values().cloned().collect())
    }

    async fn replace_holdings(
        &self,
        profile_id: Uuid,
        holdings: &[InventoryHolding],
    ) -> Result<()> {
        self.holdings.write().insert(profile_id, holdings.to_vec());
        Ok(())
    }

    async fn get_holdings(&self, profile_id: Uuid) -> Result<Vec<InventoryHolding>> {
        Ok(self
            .holdings
            .read()
            .get(&profile_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_valuation(&self, snapshot: &InventoryValuationSnapshot) -> Result<bool> {
        let mut valuations = self.valuations.write();
        let rows = valuations.entry(snapshot.profile_id).or_default();
        let window_start = hour_floor(snapshot.timestamp);
        if rows.iter().any(|r| hour_floor(r.timestamp) == window_start) {
            return Ok(false);
        }
        rows.push(snapshot.clone());
        Ok(true)
    }

    async fn latest_valuation(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<InventoryValuationSnapshot>> {
        Ok(self
            .valuations
            .read()
            .get(&profile_id)
            .and_then(|rows| rows.iter().max_by_key(|r| r.timestamp).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::{CurrencyCode, Money};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_stale_snapshot_write_is_discarded() {
        let storage = MemoryStorage::new();
        let item_id = Uuid::new_v4();
        let now = Utc::now();

        let mut newer = MarketItemSnapshot::new(item_id, CurrencyCode::usd());
        newer.buy_now_price = Money::from_minor(200);
        newer.last_cycle_at = Some(now);
        assert!(storage.put_snapshot(&newer).await.unwrap());

        let mut stale = MarketItemSnapshot::new(item_id, CurrencyCode::usd());
        stale.buy_now_price = Money::from_minor(100);
        stale.last_cycle_at = Some(now - Duration::minutes(5));
        assert!(!storage.put_snapshot(&stale).await.unwrap());

        let stored = storage.get_snapshot(item_id).await.unwrap().unwrap();
        assert_eq!(stored.buy_now_price.minor(), 200);
    }

    #[tokio::test]
    async fn test_valuation_window_blocks_second_write() {
        let storage = MemoryStorage::new();
        let profile_id = Uuid::new_v4();
        let at = Utc::now();

        let snapshot = InventoryValuationSnapshot {
            profile_id,
            timestamp: at,
            currency: CurrencyCode::usd(),
            invested_value: None,
            market_value: Money::from_minor(1000),
            total_items: 3,
        };
        assert!(storage.append_valuation(&snapshot).await.unwrap());

        let again = InventoryValuationSnapshot {
            market_value: Money::from_minor(1100),
            ..snapshot.clone()
        };
        assert!(!storage.append_valuation(&again).await.unwrap());

        let latest = storage.latest_valuation(profile_id).await.unwrap().unwrap();
        assert_eq!(latest.market_value.minor(), 1000);
    }

    #[tokio::test]
    async fn test_holdings_replaced_wholesale() {
        let storage = MemoryStorage::new();
        let profile_id = Uuid::new_v4();
        let item_id = Uuid::new_v4();

        let holding = InventoryHolding {
            profile_id,
            item_id,
            quantity: 2,
            acquisition_price: None,
            acquisition_currency: None,
        };
        storage
            .replace_holdings(profile_id, &[holding.clone(), holding])
            .await
            .unwrap();
        assert_eq!(storage.get_holdings(profile_id).await.unwrap().len(), 2);

        storage.replace_holdings(profile_id, &[]).await.unwrap();
        assert!(storage.get_holdings(profile_id).await.unwrap().is_empty());
    }
}

//! Query surface for bot and web collaborators.
//!
//! Read-side facade over storage: resolves free-text item names, converts
//! stored snapshots into the caller's display currency, and surfaces flip
//! and valuation queries. Storage stays in the engine's base currency;
//! conversion happens at the edge, per request.

use crate::catalog::{closest_match, DEFAULT_MAX_DISTANCE};
use crate::currency::{CurrencyCode, RateTable};
use crate::flips::scan_flips;
use crate::storage::Storage;
use crate::types::{CanonicalItem, FlipOpportunity, MarketItemSnapshot, ValuationTotals};
use crate::valuation::InventoryValuer;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// An item with its latest analytics, priced for display.
#[derive(Clone, Debug)]
pub struct ItemView {
    pub item: CanonicalItem,
    pub snapshot: MarketItemSnapshot,
    /// Flips stay in the engine's base currency; convert through
    /// [`QueryApi::get_flip_opportunities`] for display.
    pub flips: Vec<FlipOpportunity>,
}

pub struct QueryApi {
    storage: Arc<dyn Storage>,
    base_currency: CurrencyCode,
}

impl QueryApi {
    pub fn new(storage: Arc<dyn Storage>, base_currency: CurrencyCode) -> Self {
        Self {
            storage,
            base_currency,
        }
    }

    /// Look up an item by free-text name. Exact match first, then fuzzy
    /// against the full catalog, deterministically.
    pub async fn resolve_item(&self, app_id: u64, name: &str) -> Result<Option<CanonicalItem>> {
        if let Some(item) = self.storage.get_item_by_name(app_id, name).await? {
            return Ok(Some(item));
        }
        let items = self.storage.list_items(app_id).await?;
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        match closest_match(name, names.into_iter(), DEFAULT_MAX_DISTANCE) {
            Some(matched) => {
                let matched = matched.to_string();
                Ok(items.into_iter().find(|i| i.name == matched))
            }
            None => Ok(None),
        }
    }

    /// Snapshot view for one item, converted into `display_currency`.
    pub async fn get_item_snapshot(
        &self,
        app_id: u64,
        name: &str,
        display_currency: &CurrencyCode,
        rates: &RateTable,
    ) -> Result<Option<ItemView>> {
        let item = match self.resolve_item(app_id, name).await? {
            Some(item) => item,
            None => return Ok(None),
        };
        let snapshot = match self.storage.get_snapshot(item.id).await? {
            Some(snapshot) => snapshot,
            None => return Ok(None),
        };

        let flips = crate::flips::find_flips(&snapshot);
        let snapshot = self.convert_snapshot(snapshot, display_currency, rates)?;
        Ok(Some(ItemView {
            item,
            snapshot,
            flips,
        }))
    }

    /// All current flips across the catalog, most profitable first, priced
    /// in `display_currency`.
    pub async fn get_flip_opportunities(
        &self,
        display_currency: &CurrencyCode,
        rates: &RateTable,
    ) -> Result<Vec<FlipOpportunity>> {
        let mut flips = scan_flips(&self.storage).await?;
        for flip in &mut flips {
            flip.buy_price = rates.convert(flip.buy_price, &self.base_currency, display_currency)?;
            flip.buy_fee = rates.convert(flip.buy_fee, &self.base_currency, display_currency)?;
            flip.sell_price =
                rates.convert(flip.sell_price, &self.base_currency, display_currency)?;
            flip.sell_fee = rates.convert(flip.sell_fee, &self.base_currency, display_currency)?;
            flip.net_profit =
                rates.convert(flip.net_profit, &self.base_currency, display_currency)?;
        }
        Ok(flips)
    }

    /// Current valuation of a profile's inventory, totals priced in
    /// `display_currency`. Also appends the hourly history row when the
    /// window is open.
    pub async fn get_inventory_valuation(
        &self,
        profile_id: Uuid,
        display_currency: &CurrencyCode,
        rates: &RateTable,
    ) -> Result<ValuationTotals> {
        let valuer = InventoryValuer::new(self.storage.clone(), self.base_currency.clone());
        valuer
            .value_profile(profile_id, Utc::now(), display_currency, rates)
            .await
    }

    fn convert_snapshot(
        &self,
        mut snapshot: MarketItemSnapshot,
        display: &CurrencyCode,
        rates: &RateTable,
    ) -> Result<MarketItemSnapshot> {
        let from = &self.base_currency;
        snapshot.buy_now_price = rates.convert(snapshot.buy_now_price, from, display)?;
        snapshot.buy_now_delta = rates.convert(snapshot.buy_now_delta, from, display)?;
        snapshot.resell_price = rates.convert(snapshot.resell_price, from, display)?;
        snapshot.resell_tax = rates.convert(snapshot.resell_tax, from, display)?;
        snapshot.resell_profit = rates.convert(snapshot.resell_profit, from, display)?;
        for entry in &mut snapshot.prices {
            entry.price = rates.convert(entry.price, from, display)?;
            entry.sell_fee = rates.convert(entry.sell_fee, from, display)?;
        }
        for bucket in snapshot.buckets.values_mut() {
            bucket.value = rates.convert(bucket.value, from, display)?;
        }
        if let Some(high) = snapshot.all_time_high.as_mut() {
            high.price = rates.convert(high.price, from, display)?;
        }
        if let Some(low) = snapshot.all_time_low.as_mut() {
            low.price = rates.convert(low.price, from, display)?;
        }
        snapshot.currency = display.clone();
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::Money;
    use crate::storage::MemoryStorage;
    use crate::types::{MarketPriceEntry, MarketType};

    async fn seed(storage: &MemoryStorage, name: &str, price_minor: i64) -> CanonicalItem {
        let item = CanonicalItem::new(name.to_string(), 252490);
        storage.upsert_item(&item).await.unwrap();

        let mut snapshot = MarketItemSnapshot::new(item.id, CurrencyCode::usd());
        let price = Money::from_minor(price_minor);
        snapshot.buy_now_price = price;
        snapshot.buy_now_market = Some(MarketType::SteamCommunityMarket);
        snapshot.prices = vec![MarketPriceEntry {
            market: MarketType::SteamCommunityMarket,
            price,
            sell_fee: MarketType::SteamCommunityMarket.sell_fee(price),
            quantity: 2,
            is_available: true,
        }];
        snapshot.last_cycle_at = Some(Utc::now());
        storage.put_snapshot(&snapshot).await.unwrap();
        item
    }

    #[tokio::test]
    async fn test_exact_name_beats_fuzzy() {
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, "Widget Mk II", 100).await;
        seed(&storage, "Widget Mk III", 200).await;

        let api = QueryApi::new(storage, CurrencyCode::usd());
        let view = api
            .get_item_snapshot(
                252490,
                "Widget Mk II",
                &CurrencyCode::usd(),
                &RateTable::with_rates(vec![]),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(view.item.name, "Widget Mk II");
        assert_eq!(view.snapshot.buy_now_price.minor(), 100);
    }

    #[tokio::test]
    async fn test_fuzzy_resolution_within_distance() {
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, "Forest Camo Pants", 350).await;

        let api = QueryApi::new(storage, CurrencyCode::usd());
        let view = api
            .get_item_snapshot(
                252490,
                "forest camo pant",
                &CurrencyCode::usd(),
                &RateTable::with_rates(vec![]),
            )
            .await
            .unwrap();
        assert!(view.is_some());
    }

    #[tokio::test]
    async fn test_display_currency_conversion() {
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, "Tin Helmet", 100).await;

        let api = QueryApi::new(storage, CurrencyCode::usd());
        let eur = CurrencyCode::from("EUR");
        let rates = RateTable::with_rates(vec![(CurrencyCode::usd(), eur.clone(), 0.9)]);
        let view = api
            .get_item_snapshot(252490, "Tin Helmet", &eur, &rates)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(view.snapshot.buy_now_price.minor(), 90);
        assert_eq!(view.snapshot.currency, eur);
        assert_eq!(view.snapshot.prices[0].price.minor(), 90);
    }

    #[tokio::test]
    async fn test_inventory_valuation_in_display_currency() {
        let storage = Arc::new(MemoryStorage::new());
        let item = seed(&storage, "Tin Helmet", 100).await;
        let profile_id = Uuid::new_v4();
        storage
            .replace_holdings(
                profile_id,
                &[crate::types::InventoryHolding {
                    profile_id,
                    item_id: item.id,
                    quantity: 2,
                    acquisition_price: None,
                    acquisition_currency: None,
                }],
            )
            .await
            .unwrap();

        let api = QueryApi::new(storage, CurrencyCode::usd());
        let eur = CurrencyCode::from("EUR");
        let rates = RateTable::with_rates(vec![(CurrencyCode::usd(), eur.clone(), 0.9)]);
        let totals = api
            .get_inventory_valuation(profile_id, &eur, &rates)
            .await
            .unwrap();
        assert_eq!(totals.currency, eur);
        assert_eq!(totals.market_value.minor(), 180);
    }

    #[tokio::test]
    async fn test_unknown_item_is_none() {
        let storage = Arc::new(MemoryStorage::new());
        let api = QueryApi::new(storage, CurrencyCode::usd());
        let view = api
            .get_item_snapshot(
                252490,
                "Nothing Like This Exists",
                &CurrencyCode::usd(),
                &RateTable::with_rates(vec![]),
            )
            .await
            .unwrap();
        assert!(view.is_none());
    }
}

//! Inventory valuation.
//!
//! Prices a profile's holdings at the latest snapshot values and appends
//! an hourly history row. The computed totals are always returned, even
//! when the hour's row already exists and nothing is written.

use crate::currency::{CurrencyCode, Money, RateTable};
use crate::storage::Storage;
use crate::types::{InventoryValuationSnapshot, ValuationTotals};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub struct InventoryValuer {
    storage: Arc<dyn Storage>,
    currency: CurrencyCode,
}

impl InventoryValuer {
    pub fn new(storage: Arc<dyn Storage>, currency: CurrencyCode) -> Self {
        Self { storage, currency }
    }

    /// Value one profile's holdings as of `at` and record the result.
    ///
    /// Holdings without a price snapshot contribute their count but no
    /// value. Acquisition prices in other currencies convert through
    /// `rates`; unconvertible ones are left out of the invested total.
    /// The history row is stored in the engine's base currency; the
    /// returned totals are converted into `display_currency`.
    pub async fn value_profile(
        &self,
        profile_id: Uuid,
        at: DateTime<Utc>,
        display_currency: &CurrencyCode,
        rates: &RateTable,
    ) -> Result<ValuationTotals> {
        let holdings = self.storage.get_holdings(profile_id).await?;

        let mut market_value = Money::zero();
        let mut invested_value: Option<Money> = None;
        let mut total_items: u64 = 0;

        for holding in &holdings {
            total_items += holding.quantity as u64;

            if let Some(snapshot) = self.storage.get_snapshot(holding.item_id).await? {
                market_value = market_value + snapshot.buy_now_price * holding.quantity as i64;
            } else {
                debug!(item_id = %holding.item_id, "Holding has no price snapshot");
            }

            if let (Some(price), Some(currency)) =
                (holding.acquisition_price, holding.acquisition_currency.as_ref())
            {
                if let Ok(converted) = rates.convert(price, currency, &self.currency) {
                    let cost = converted * holding.quantity as i64;
                    invested_value = Some(invested_value.unwrap_or_else(Money::zero) + cost);
                }
            }
        }

        let snapshot = InventoryValuationSnapshot {
            profile_id,
            timestamp: at,
            currency: self.currency.clone(),
            invested_value,
            market_value,
            total_items,
        };
        let snapshot_written = self.storage.append_valuation(&snapshot).await?;
        if snapshot_written {
            info!(
                %profile_id,
                market_value = market_value.minor(),
                total_items,
                "Inventory valuation recorded"
            );
        }

        let market_value = rates.convert(market_value, &self.currency, display_currency)?;
        let invested_value = invested_value
            .map(|v| rates.convert(v, &self.currency, display_currency))
            .transpose()?;

        Ok(ValuationTotals {
            currency: display_currency.clone(),
            invested_value,
            market_value,
            total_items,
            snapshot_written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::types::{InventoryHolding, MarketItemSnapshot};
    use chrono::Duration;

    async fn seed_item(storage: &MemoryStorage, price_minor: i64) -> Uuid {
        let item_id = Uuid::new_v4();
        let mut snapshot = MarketItemSnapshot::new(item_id, CurrencyCode::usd());
        snapshot.buy_now_price = Money::from_minor(price_minor);
        snapshot.last_cycle_at = Some(Utc::now());
        storage.put_snapshot(&snapshot).await.unwrap();
        item_id
    }

    #[tokio::test]
    async fn test_values_holdings_at_snapshot_prices() {
        let storage = Arc::new(MemoryStorage::new());
        let profile_id = Uuid::new_v4();
        let item_a = seed_item(&storage, 100).await;
        let item_b = seed_item(&storage, 250).await;

        storage
            .replace_holdings(
                profile_id,
                &[
                    InventoryHolding {
                        profile_id,
                        item_id: item_a,
                        quantity: 3,
                        acquisition_price: Some(Money::from_minor(80)),
                        acquisition_currency: Some(CurrencyCode::usd()),
                    },
                    InventoryHolding {
                        profile_id,
                        item_id: item_b,
                        quantity: 1,
                        acquisition_price: None,
                        acquisition_currency: None,
                    },
                ],
            )
            .await
            .unwrap();

        let valuer = InventoryValuer::new(storage.clone(), CurrencyCode::usd());
        let totals = valuer
            .value_profile(
                profile_id,
                Utc::now(),
                &CurrencyCode::usd(),
                &RateTable::with_rates(vec![]),
            )
            .await
            .unwrap();

        assert_eq!(totals.market_value.minor(), 3 * 100 + 250);
        assert_eq!(totals.invested_value.unwrap().minor(), 3 * 80);
        assert_eq!(totals.total_items, 4);
        assert!(totals.snapshot_written);
    }

    #[tokio::test]
    async fn test_no_acquisition_prices_means_no_invested_total() {
        let storage = Arc::new(MemoryStorage::new());
        let profile_id = Uuid::new_v4();
        let item = seed_item(&storage, 500).await;

        storage
            .replace_holdings(
                profile_id,
                &[InventoryHolding {
                    profile_id,
                    item_id: item,
                    quantity: 2,
                    acquisition_price: None,
                    acquisition_currency: None,
                }],
            )
            .await
            .unwrap();

        let valuer = InventoryValuer::new(storage.clone(), CurrencyCode::usd());
        let totals = valuer
            .value_profile(
                profile_id,
                Utc::now(),
                &CurrencyCode::usd(),
                &RateTable::with_rates(vec![]),
            )
            .await
            .unwrap();
        assert!(totals.invested_value.is_none());
        assert_eq!(totals.market_value.minor(), 1000);
    }

    #[tokio::test]
    async fn test_totals_convert_to_display_currency() {
        let storage = Arc::new(MemoryStorage::new());
        let profile_id = Uuid::new_v4();
        let item = seed_item(&storage, 100).await;

        storage
            .replace_holdings(
                profile_id,
                &[InventoryHolding {
                    profile_id,
                    item_id: item,
                    quantity: 2,
                    acquisition_price: Some(Money::from_minor(80)),
                    acquisition_currency: Some(CurrencyCode::usd()),
                }],
            )
            .await
            .unwrap();

        let eur = CurrencyCode::from("EUR");
        let rates = RateTable::with_rates(vec![(CurrencyCode::usd(), eur.clone(), 0.9)]);
        let valuer = InventoryValuer::new(storage.clone(), CurrencyCode::usd());
        let totals = valuer
            .value_profile(profile_id, Utc::now(), &eur, &rates)
            .await
            .unwrap();

        assert_eq!(totals.currency, eur);
        assert_eq!(totals.market_value.minor(), 180);
        assert_eq!(totals.invested_value.unwrap().minor(), 144);

        // The stored history row stays in the base currency
        let row = storage.latest_valuation(profile_id).await.unwrap().unwrap();
        assert_eq!(row.currency, CurrencyCode::usd());
        assert_eq!(row.market_value.minor(), 200);
    }

    #[tokio::test]
    async fn test_second_valuation_in_same_hour_returns_totals_without_writing() {
        let storage = Arc::new(MemoryStorage::new());
        let profile_id = Uuid::new_v4();
        let item = seed_item(&storage, 100).await;
        storage
            .replace_holdings(
                profile_id,
                &[InventoryHolding {
                    profile_id,
                    item_id: item,
                    quantity: 1,
                    acquisition_price: None,
                    acquisition_currency: None,
                }],
            )
            .await
            .unwrap();

        let valuer = InventoryValuer::new(storage.clone(), CurrencyCode::usd());
        // Anchor inside the hour so the second call stays in the window
        let at = crate::storage::hour_floor(Utc::now()) + Duration::minutes(10);
        let first = valuer
            .value_profile(
                profile_id,
                at,
                &CurrencyCode::usd(),
                &RateTable::with_rates(vec![]),
            )
            .await
            .unwrap();
        assert!(first.snapshot_written);

        let second = valuer
            .value_profile(
                profile_id,
                at + Duration::minutes(1),
                &CurrencyCode::usd(),
                &RateTable::with_rates(vec![]),
            )
            .await
            .unwrap();
        assert!(!second.snapshot_written);
        assert_eq!(second.market_value, first.market_value);
    }
}

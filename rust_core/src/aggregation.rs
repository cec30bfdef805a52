//! The aggregation engine: turns one collection cycle's raw listings and
//! sales into updated canonical items and price snapshots.
//!
//! All cross-market comparison happens in a single target currency, with
//! conversion applied per quote and failed conversions dropped rather
//! than aborting the cycle. Snapshot writes are serialized per item and
//! guarded by cycle-timestamp precedence, so re-running a cycle or
//! racing an older one cannot corrupt state.

use crate::catalog::{CatalogIndex, DEFAULT_MAX_DISTANCE};
use crate::currency::{CurrencyCode, Money, RateTable};
use crate::manipulation::{CycleSignals, ManipulationDetector};
use crate::storage::Storage;
use crate::supply::{estimate_supply, SupplyInputs};
use crate::types::{
    CanonicalItem, ListingQuote, MarketItemSnapshot, MarketPriceEntry, MarketType, PriceBucket,
    PricePoint, SaleEvent, BUCKET_WINDOW_HOURS,
};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything one collection cycle gathered before aggregation.
pub struct CycleInput {
    pub app_id: u64,
    /// The moment collection started. Snapshot precedence and bucket
    /// windows are anchored here, not at write time.
    pub cycle_at: DateTime<Utc>,
    pub quotes: Vec<ListingQuote>,
    pub sales: Vec<SaleEvent>,
    pub rates: RateTable,
}

/// What a cycle did, for logging and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct CycleOutcome {
    pub items_updated: usize,
    pub items_created: usize,
    /// Writes discarded because a newer cycle already landed.
    pub stale_writes: usize,
    /// Quotes dropped: unresolvable names from external markets, or
    /// currency conversion failures.
    pub quotes_dropped: usize,
}

pub struct AggregationEngine {
    storage: Arc<dyn Storage>,
    catalog: CatalogIndex,
    detector: ManipulationDetector,
    target_currency: CurrencyCode,
    // Serializes snapshot read-modify-write per item id.
    item_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl AggregationEngine {
    pub fn new(storage: Arc<dyn Storage>, target_currency: CurrencyCode) -> Self {
        Self::with_detector(storage, target_currency, ManipulationDetector::default())
    }

    pub fn with_detector(
        storage: Arc<dyn Storage>,
        target_currency: CurrencyCode,
        detector: ManipulationDetector,
    ) -> Self {
        Self {
            storage,
            catalog: CatalogIndex::new(),
            detector,
            target_currency,
            item_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn target_currency(&self) -> &CurrencyCode {
        &self.target_currency
    }

    fn lock_for(&self, item_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.item_locks
            .lock()
            .entry(item_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Load known item names so fuzzy resolution sees the full catalog.
    pub async fn warm_catalog(&self, app_id: u64) -> Result<()> {
        let items = self.storage.list_items(app_id).await?;
        for item in &items {
            self.catalog.insert(&item.name);
        }
        info!(app_id, names = self.catalog.len(), "Catalog warmed");
        Ok(())
    }

    /// Run one full aggregation pass over a cycle's collected data.
    pub async fn run_cycle(&self, input: CycleInput) -> Result<CycleOutcome> {
        let mut outcome = CycleOutcome::default();

        // Primary-exchange names are authoritative and may create items;
        // external names resolve against the catalog or are dropped.
        let mut quotes_by_name: HashMap<String, Vec<ListingQuote>> = HashMap::new();
        for quote in input.quotes {
            let resolved = if quote.market == MarketType::SteamCommunityMarket {
                self.catalog.insert(&quote.item_name);
                Some(quote.item_name.clone())
            } else {
                self.catalog.resolve(&quote.item_name, DEFAULT_MAX_DISTANCE)
            };
            match resolved {
                Some(name) => quotes_by_name.entry(name).or_default().push(quote),
                None => {
                    debug!(
                        market = quote.market.as_str(),
                        name = %quote.item_name,
                        "Dropping quote with no catalog match"
                    );
                    outcome.quotes_dropped += 1;
                }
            }
        }

        let mut sales_by_name: HashMap<String, Vec<SaleEvent>> = HashMap::new();
        for sale in input.sales {
            let resolved = if sale.market == MarketType::SteamCommunityMarket {
                Some(sale.item_name.clone())
            } else {
                self.catalog.resolve(&sale.item_name, DEFAULT_MAX_DISTANCE)
            };
            if let Some(name) = resolved {
                sales_by_name.entry(name).or_default().push(sale);
            }
        }

        for (name, quotes) in quotes_by_name {
            let sales = sales_by_name.remove(&name).unwrap_or_default();
            match self
                .process_item(input.app_id, &name, quotes, sales, input.cycle_at, &input.rates)
                .await
            {
                Ok(report) => {
                    outcome.items_updated += usize::from(report.updated);
                    outcome.items_created += usize::from(report.created);
                    outcome.stale_writes += usize::from(report.stale);
                    outcome.quotes_dropped += report.quotes_dropped;
                }
                Err(e) => {
                    warn!(item = %name, "Failed to aggregate item: {:#}", e);
                }
            }
        }

        info!(
            updated = outcome.items_updated,
            created = outcome.items_created,
            stale = outcome.stale_writes,
            dropped = outcome.quotes_dropped,
            "Aggregation cycle complete"
        );
        Ok(outcome)
    }

    async fn process_item(
        &self,
        app_id: u64,
        name: &str,
        quotes: Vec<ListingQuote>,
        sales: Vec<SaleEvent>,
        cycle_at: DateTime<Utc>,
        rates: &RateTable,
    ) -> Result<ItemReport> {
        let mut report = ItemReport::default();

        let item = match self.storage.get_item_by_name(app_id, name).await? {
            Some(item) => item,
            None => {
                let item = CanonicalItem::new(name.to_string(), app_id);
                self.storage.upsert_item(&item).await?;
                self.catalog.insert(name);
                report.created = true;
                item
            }
        };

        let lock = self.lock_for(item.id);
        let _guard = lock.lock().await;

        let previous = self.storage.get_snapshot(item.id).await?;
        if let Some(prev) = &previous {
            if prev.last_cycle_at.map_or(false, |at| cycle_at <= at) {
                report.stale = true;
                return Ok(report);
            }
        }

        // Per-market price line: cheapest quote wins, quantities sum.
        let mut entries: HashMap<MarketType, MarketPriceEntry> = HashMap::new();
        for quote in &quotes {
            let price = match rates.convert(quote.price, &quote.currency, &self.target_currency) {
                Ok(price) => price,
                Err(e) => {
                    warn!(market = quote.market.as_str(), item = name, "{}", e);
                    report.quotes_dropped += 1;
                    continue;
                }
            };
            let entry = entries.entry(quote.market).or_insert(MarketPriceEntry {
                market: quote.market,
                price,
                sell_fee: Money::zero(),
                quantity: 0,
                is_available: false,
            });
            if quote.is_available {
                if !entry.is_available || price < entry.price {
                    entry.price = price;
                }
                entry.is_available = true;
                entry.quantity += quote.quantity;
            } else if !entry.is_available && price < entry.price {
                entry.price = price;
            }
        }
        let mut prices: Vec<MarketPriceEntry> = entries
            .into_values()
            .map(|mut e| {
                e.sell_fee = e.market.sell_fee(e.price);
                e
            })
            .collect();
        prices.sort_by_key(|e| e.market.priority());

        // Best deal: cheapest available, primary exchange breaking ties.
        let best = prices
            .iter()
            .filter(|e| e.is_available)
            .min_by_key(|e| (e.price, e.market.priority()));

        let mut snapshot = previous
            .clone()
            .unwrap_or_else(|| MarketItemSnapshot::new(item.id, self.target_currency.clone()));
        let previous_price = snapshot.buy_now_price;
        let had_previous_cycle = snapshot.last_cycle_at.is_some();

        match best {
            Some(best) => {
                snapshot.buy_now_price = best.price;
                snapshot.buy_now_market = Some(best.market);
                snapshot.buy_now_delta = if had_previous_cycle {
                    best.price - previous_price
                } else {
                    Money::zero()
                };
            }
            None => {
                // Nothing buyable this cycle; price carries over, delta zeroes.
                snapshot.buy_now_delta = Money::zero();
            }
        }

        // What listing on the primary exchange would fetch, net of its tax,
        // relative to buying at the current best price.
        let primary = snapshot.price_for(MarketType::SteamCommunityMarket).cloned();
        if let Some(entry) = prices
            .iter()
            .find(|e| e.market == MarketType::SteamCommunityMarket)
            .or(primary.as_ref())
        {
            snapshot.resell_price = entry.price;
            snapshot.resell_tax = MarketType::SteamCommunityMarket.sell_fee(entry.price);
            snapshot.resell_profit =
                entry.price - snapshot.resell_tax - snapshot.buy_now_price;
        }

        snapshot.prices = prices;
        snapshot.supply = snapshot
            .prices
            .iter()
            .filter(|e| e.is_available)
            .map(|e| e.quantity)
            .sum();

        // Rolling windows only move when a sales feed was collected for
        // this item; a listings-only cycle keeps the last refresh intact.
        if !sales.is_empty() {
            snapshot.buckets = compute_buckets(&sales, cycle_at, rates, &self.target_currency);
            snapshot.demand = snapshot
                .buckets
                .get(&24)
                .map(|b| b.sales as u32)
                .unwrap_or(0);
            snapshot.last_checked_sales_at = Some(cycle_at);
        }

        // Extremes never relax: strict comparison, timestamped when set.
        if snapshot.buy_now_price.is_positive() {
            let point = PricePoint {
                price: snapshot.buy_now_price,
                at: cycle_at,
            };
            if snapshot
                .all_time_high
                .map_or(true, |h| point.price > h.price)
            {
                snapshot.all_time_high = Some(point);
            }
            if snapshot.all_time_low.map_or(true, |l| point.price < l.price) {
                snapshot.all_time_low = Some(point);
            }
        }

        let week_sales = snapshot.buckets.get(&168).map(|b| b.sales).unwrap_or(0);
        snapshot.is_being_manipulated = self.detector.evaluate(
            item.id,
            CycleSignals {
                previous_price: if had_previous_cycle {
                    previous_price
                } else {
                    Money::zero()
                },
                new_price: snapshot.buy_now_price,
                sales_last_24h: snapshot.demand as u64,
                sales_last_week: week_sales,
            },
        );

        snapshot.last_checked_orders_at = Some(cycle_at);
        snapshot.last_cycle_at = Some(cycle_at);

        if self.storage.put_snapshot(&snapshot).await? {
            report.updated = true;
        } else {
            report.stale = true;
        }

        // Refresh the supply estimate with what the marketplaces show now.
        let listed: u64 = snapshot.supply as u64;
        let mut item = item;
        item.supply = estimate_supply(SupplyInputs {
            owners_estimated: item.subscriptions_lifetime,
            owners_known: item.supply.owners_known,
            investors_estimated: item.supply.investors_estimated,
            investors_known: item.supply.investors_known,
            markets_known: Some(listed),
        });
        self.storage.upsert_item(&item).await?;

        Ok(report)
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct ItemReport {
    updated: bool,
    created: bool,
    stale: bool,
    quotes_dropped: usize,
}

/// Rebuild every trailing window from this cycle's sales feed. Sales
/// counts sum quantities; the value is the most recent sale price inside
/// the window. Sales that fail currency conversion are skipped.
fn compute_buckets(
    sales: &[SaleEvent],
    cycle_at: DateTime<Utc>,
    rates: &RateTable,
    target: &CurrencyCode,
) -> std::collections::BTreeMap<i64, PriceBucket> {
    let mut converted: Vec<(DateTime<Utc>, Money, u32)> = sales
        .iter()
        .filter(|s| s.sold_at <= cycle_at)
        .filter_map(|s| {
            rates
                .convert(s.price, &s.currency, target)
                .ok()
                .map(|price| (s.sold_at, price, s.quantity))
        })
        .collect();
    converted.sort_by_key(|(at, _, _)| *at);

    BUCKET_WINDOW_HOURS
        .iter()
        .map(|&hours| {
            let start = cycle_at - Duration::hours(hours);
            let mut bucket = PriceBucket::default();
            for (at, price, quantity) in converted.iter().rev() {
                if *at < start {
                    break;
                }
                if bucket.sales == 0 {
                    // First hit walking backwards is the most recent sale.
                    bucket.value = *price;
                }
                bucket.sales += *quantity as u64;
            }
            (hours, bucket)
        })
        .collect()
}

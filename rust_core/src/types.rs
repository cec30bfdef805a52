//! Core domain types shared across the aggregation pipeline.

use crate::currency::{CurrencyCode, Money};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Rolling history windows, in hours. Buckets are cumulative trailing
/// windows (1h is contained in 24h, 24h in 48h, ...), not disjoint slices.
pub const BUCKET_WINDOW_HOURS: [i64; 10] = [1, 24, 48, 72, 96, 120, 144, 168, 336, 504];

/// Marketplace identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    /// The primary exchange. Wins best-deal ties.
    SteamCommunityMarket,
    Buff,
    TradeSkinsFast,
}

impl MarketType {
    pub const ALL: [MarketType; 3] = [
        MarketType::SteamCommunityMarket,
        MarketType::Buff,
        MarketType::TradeSkinsFast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::SteamCommunityMarket => "steam_community_market",
            MarketType::Buff => "buff",
            MarketType::TradeSkinsFast => "trade_skins_fast",
        }
    }

    /// Tie-break order for the best deal: lower wins, primary exchange first.
    pub fn priority(&self) -> u8 {
        match self {
            MarketType::SteamCommunityMarket => 0,
            MarketType::Buff => 1,
            MarketType::TradeSkinsFast => 2,
        }
    }

    /// Fee charged to the buyer on top of the listed price.
    ///
    /// None of the supported marketplaces charges a buyer-side fee today;
    /// kept as a per-market function so the flip math never hard-codes that.
    pub fn buy_fee(&self, _price: Money) -> Money {
        Money::zero()
    }

    /// Fee withheld from the seller when an item sells at `price`.
    ///
    /// The primary exchange withholds 5% platform + 10% publisher, each
    /// floored at one minor unit ("resell tax"). External sites charge a
    /// flat commission.
    pub fn sell_fee(&self, price: Money) -> Money {
        match self {
            MarketType::SteamCommunityMarket => {
                price.percent_with_floor(5, 1) + price.percent_with_floor(10, 1)
            }
            MarketType::Buff => price.percent_with_floor(2, 1),
            MarketType::TradeSkinsFast => price.percent_with_floor(5, 1),
        }
    }
}

/// The de-duplicated identity of a tradable virtual good, independent of
/// marketplace. Created when first seen from any feed; never deleted;
/// descriptive metadata is refreshed in place.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CanonicalItem {
    pub id: Uuid,
    pub name: String,
    pub app_id: u64,
    pub icon_url: Option<String>,
    pub is_tradable: bool,
    pub is_marketable: bool,
    /// Lifetime workshop subscription count, when the app exposes it.
    /// Feeds the owners-estimated supply input.
    pub subscriptions_lifetime: Option<u64>,
    pub supply: SupplyTotals,
    pub first_seen_at: DateTime<Utc>,
}

impl CanonicalItem {
    pub fn new(name: String, app_id: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            app_id,
            icon_url: None,
            is_tradable: true,
            is_marketable: true,
            subscriptions_lifetime: None,
            supply: SupplyTotals::default(),
            first_seen_at: Utc::now(),
        }
    }
}

/// One marketplace listing observed during a fetch cycle. Ephemeral:
/// consumed by the aggregation step and discarded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListingQuote {
    pub market: MarketType,
    /// Free-text name as the marketplace reported it.
    pub item_name: String,
    /// Canonical item, once the catalog resolver has run. None until then.
    pub item_id: Option<Uuid>,
    /// Price in the marketplace's native currency.
    pub price: Money,
    pub currency: CurrencyCode,
    pub quantity: u32,
    pub is_available: bool,
    pub observed_at: DateTime<Utc>,
}

/// One observed sale from a marketplace's sales-history feed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SaleEvent {
    pub market: MarketType,
    pub item_name: String,
    pub price: Money,
    pub currency: CurrencyCode,
    pub quantity: u32,
    pub sold_at: DateTime<Utc>,
}

/// Per-marketplace price line inside a snapshot. Unavailable markets are
/// retained here for display but excluded from best-deal selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketPriceEntry {
    pub market: MarketType,
    pub price: Money,
    pub sell_fee: Money,
    pub quantity: u32,
    pub is_available: bool,
}

/// One (sales count, value) pair for a trailing window.
/// Value is the most recent sale price observed inside the window, not a sum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBucket {
    pub sales: u64,
    pub value: Money,
}

/// A price extreme with the moment it was set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: Money,
    pub at: DateTime<Utc>,
}

/// The current, continuously-updated price/analytics record for one
/// canonical item. Updated only by the aggregation engine; rolling fields
/// in place, extremes append-style (timestamped, never relaxed).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarketItemSnapshot {
    pub item_id: Uuid,
    pub currency: CurrencyCode,

    /// Cheapest available price across all marketplaces.
    pub buy_now_price: Money,
    /// Which marketplace holds it. None until a cycle has seen any
    /// available listing.
    pub buy_now_market: Option<MarketType>,
    /// buy_now_price minus the previous cycle's buy_now_price; zero for the
    /// first cycle.
    pub buy_now_delta: Money,

    /// What listing on the primary exchange would fetch, and what the
    /// exchange keeps of it.
    pub resell_price: Money,
    pub resell_tax: Money,
    pub resell_profit: Money,

    /// Sales observed over the last 24h window.
    pub demand: u32,
    /// Units currently listed and available across all marketplaces.
    pub supply: u32,

    pub prices: Vec<MarketPriceEntry>,
    /// Keyed by trailing-window hours; see [`BUCKET_WINDOW_HOURS`].
    pub buckets: BTreeMap<i64, PriceBucket>,

    pub all_time_high: Option<PricePoint>,
    pub all_time_low: Option<PricePoint>,

    pub is_being_manipulated: bool,

    pub first_seen_at: DateTime<Utc>,
    pub last_checked_orders_at: Option<DateTime<Utc>>,
    pub last_checked_sales_at: Option<DateTime<Utc>>,
    /// Timestamp of the collection cycle that produced the current state.
    /// Write precedence: a cycle not newer than this is discarded.
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl MarketItemSnapshot {
    pub fn new(item_id: Uuid, currency: CurrencyCode) -> Self {
        Self {
            item_id,
            currency,
            buy_now_price: Money::zero(),
            buy_now_market: None,
            buy_now_delta: Money::zero(),
            resell_price: Money::zero(),
            resell_tax: Money::zero(),
            resell_profit: Money::zero(),
            demand: 0,
            supply: 0,
            prices: Vec::new(),
            buckets: BUCKET_WINDOW_HOURS
                .iter()
                .map(|h| (*h, PriceBucket::default()))
                .collect(),
            all_time_high: None,
            all_time_low: None,
            is_being_manipulated: false,
            first_seen_at: Utc::now(),
            last_checked_orders_at: None,
            last_checked_sales_at: None,
            last_cycle_at: None,
        }
    }

    /// Price entry for a specific marketplace, if the last cycle saw one.
    pub fn price_for(&self, market: MarketType) -> Option<&MarketPriceEntry> {
        self.prices.iter().find(|p| p.market == market)
    }
}

/// Best-effort total supply estimate. Known counts are trusted over
/// estimates wherever known >= estimated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyTotals {
    pub owners_estimated: Option<u64>,
    pub owners_known: Option<u64>,
    pub investors_estimated: Option<u64>,
    pub investors_known: Option<u64>,
    pub markets_known: Option<u64>,
    pub total_estimated: u64,
}

/// One item position in a profile's inventory. Replaced wholesale on each
/// inventory refresh, never patched incrementally.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InventoryHolding {
    pub profile_id: Uuid,
    pub item_id: Uuid,
    pub quantity: u32,
    pub acquisition_price: Option<Money>,
    pub acquisition_currency: Option<CurrencyCode>,
}

/// Immutable, append-only record of what a profile's inventory was worth
/// at a moment in time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InventoryValuationSnapshot {
    pub profile_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub currency: CurrencyCode,
    /// None when no holding carries an acquisition price.
    pub invested_value: Option<Money>,
    pub market_value: Money,
    pub total_items: u64,
}

/// Computed valuation totals returned to the caller whether or not a
/// snapshot row was written this call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValuationTotals {
    pub currency: CurrencyCode,
    pub invested_value: Option<Money>,
    pub market_value: Money,
    pub total_items: u64,
    pub snapshot_written: bool,
}

/// A profitable buy-here/sell-there pair, net of fees. Derived on demand,
/// never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlipOpportunity {
    pub item_id: Uuid,
    pub buy_from: MarketType,
    pub buy_price: Money,
    pub buy_fee: Money,
    pub sell_to: MarketType,
    pub sell_price: Money,
    pub sell_fee: Money,
    pub net_profit: Money,
    /// Advisory flag passed through from the snapshot so callers can
    /// discount manipulated opportunities.
    pub is_being_manipulated: bool,
}

impl FlipOpportunity {
    /// net profit = sell price - sell fee - (buy price + buy fee)
    pub fn net(buy_price: Money, buy_fee: Money, sell_price: Money, sell_fee: Money) -> Money {
        sell_price - sell_fee - (buy_price + buy_fee)
    }

    pub fn buy_total(&self) -> Money {
        self.buy_price + self.buy_fee
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_priority_primary_wins() {
        assert!(
            MarketType::SteamCommunityMarket.priority() < MarketType::Buff.priority()
        );
        assert!(MarketType::Buff.priority() < MarketType::TradeSkinsFast.priority());
    }

    #[test]
    fn test_steam_sell_fee_components() {
        // 5% + 10% of 10.00 = 0.50 + 1.00
        let fee = MarketType::SteamCommunityMarket.sell_fee(Money::from_minor(1000));
        assert_eq!(fee.minor(), 150);

        // Tiny price: both components floor at 1 minor unit
        let fee = MarketType::SteamCommunityMarket.sell_fee(Money::from_minor(3));
        assert_eq!(fee.minor(), 2);
    }

    #[test]
    fn test_flip_net_profit_formula() {
        // buy at 100 + 5 fee, sell at 130 - 10 fee => 15
        let net = FlipOpportunity::net(
            Money::from_minor(100),
            Money::from_minor(5),
            Money::from_minor(130),
            Money::from_minor(10),
        );
        assert_eq!(net.minor(), 15);
    }

    #[test]
    fn test_snapshot_starts_with_all_windows() {
        let snapshot = MarketItemSnapshot::new(Uuid::new_v4(), CurrencyCode::usd());
        assert_eq!(snapshot.buckets.len(), BUCKET_WINDOW_HOURS.len());
        assert!(snapshot.buckets.values().all(|b| b.sales == 0));
        assert!(snapshot.last_cycle_at.is_none());
    }

    #[test]
    fn test_market_type_serde_round_trip() {
        let json = serde_json::to_string(&MarketType::SteamCommunityMarket).unwrap();
        assert_eq!(json, "\"steam_community_market\"");
        let back: MarketType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, MarketType::SteamCommunityMarket);
    }
}

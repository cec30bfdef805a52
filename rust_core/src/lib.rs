//! Tradewatch Core - Multi-marketplace price aggregation and valuation.
//!
//! This crate provides:
//! - Pluggable marketplace clients (Steam community market, Buff,
//!   TradeSkinsFast) behind one fetch trait
//! - A catalog of canonical items with deterministic fuzzy name resolution
//! - The aggregation engine: best price, deltas, rolling history buckets,
//!   all-time extremes, demand and supply per item
//! - Price manipulation detection with hysteresis
//! - Cross-market flip analysis net of marketplace fees
//! - Inventory valuation with hourly history snapshots
//! - Postgres and in-memory storage backends behind one trait

pub mod aggregation;
pub mod api;
pub mod catalog;
pub mod currency;
pub mod flips;
pub mod manipulation;
pub mod markets;
pub mod storage;
pub mod supply;
pub mod types;
pub mod valuation;

pub use aggregation::{AggregationEngine, CycleInput, CycleOutcome};
pub use api::{ItemView, QueryApi};
pub use catalog::{closest_match, CatalogIndex, DEFAULT_MAX_DISTANCE};
pub use currency::{ConversionError, CurrencyCode, ExchangeRateSource, Money, RateTable};
pub use flips::{find_flips, scan_flips};
pub use manipulation::{CycleSignals, ManipulationConfig, ManipulationDetector};
pub use markets::{
    collect_listings, BuffClient, ListingCollection, ListingPage, MarketClient,
    MarketClientRegistry, PageError, SteamMarketClient, TradeSkinsFastClient,
};
pub use storage::{MemoryStorage, PostgresStorage, Storage};
pub use supply::{estimate_supply, SupplyInputs};
pub use types::*;
pub use valuation::InventoryValuer;

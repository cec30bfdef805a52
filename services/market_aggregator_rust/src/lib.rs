//! market_aggregator_rust - Timer-driven multi-marketplace price collection

pub mod aggregator;
pub mod config;

pub use aggregator::{AggregatorStats, MarketAggregator};
pub use config::AggregatorConfig;

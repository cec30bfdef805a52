//! Configuration for market_aggregator_rust

use anyhow::{anyhow, Result};
use std::env;
use tradewatch_rust_core::currency::CurrencyCode;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    // What to track
    pub app_id: u64,
    pub target_currency: CurrencyCode,

    // Cycle cadence
    pub cycle_interval_secs: u64,

    // Collection limits
    pub page_size: u32,
    pub max_pages: u32,
    pub sales_items_per_cycle: usize,

    // Concurrency
    pub market_concurrency: usize,
    pub market_timeout_secs: u64,

    // Manipulation detection policy
    pub manipulation_jump_fraction: f64,
    pub manipulation_volume_fraction: f64,
    pub manipulation_recovery_cycles: u32,

    // Marketplace auth
    pub buff_session: Option<String>,

    // Exchange rates, "FROM:TO:RATE" comma-separated
    pub exchange_rates: Vec<(CurrencyCode, CurrencyCode, f64)>,

    // Database
    pub database_url: String,
}

impl AggregatorConfig {
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| anyhow!("DATABASE_URL must be set"))?;

        let cycle_interval_secs = parse_u64("AGGREGATOR_CYCLE_INTERVAL_SECS", 300)?;
        let page_size = parse_u32("AGGREGATOR_PAGE_SIZE", 100)?;
        let max_pages = parse_u32("AGGREGATOR_MAX_PAGES", 50)?;
        let market_concurrency = parse_u64("AGGREGATOR_MARKET_CONCURRENCY", 2)? as usize;
        let market_timeout_secs = parse_u64("AGGREGATOR_MARKET_TIMEOUT_SECS", 120)?;
        let sales_items_per_cycle = parse_u64("AGGREGATOR_SALES_ITEMS_PER_CYCLE", 50)? as usize;

        if cycle_interval_secs == 0 {
            return Err(anyhow!("AGGREGATOR_CYCLE_INTERVAL_SECS must be > 0"));
        }
        if page_size == 0 {
            return Err(anyhow!("AGGREGATOR_PAGE_SIZE must be > 0"));
        }
        if market_concurrency == 0 {
            return Err(anyhow!("AGGREGATOR_MARKET_CONCURRENCY must be > 0"));
        }

        let manipulation_jump_fraction = parse_f64("AGGREGATOR_MANIPULATION_JUMP_FRACTION", 0.5)?;
        let manipulation_volume_fraction =
            parse_f64("AGGREGATOR_MANIPULATION_VOLUME_FRACTION", 0.25)?;
        if manipulation_jump_fraction <= 0.0 {
            return Err(anyhow!("AGGREGATOR_MANIPULATION_JUMP_FRACTION must be > 0"));
        }
        if !(0.0..=1.0).contains(&manipulation_volume_fraction) {
            return Err(anyhow!(
                "AGGREGATOR_MANIPULATION_VOLUME_FRACTION must be between 0 and 1"
            ));
        }

        let exchange_rates = parse_rates(
            &env::var("AGGREGATOR_EXCHANGE_RATES").unwrap_or_default(),
        )?;

        Ok(Self {
            app_id: parse_u64("AGGREGATOR_APP_ID", 252490)?,
            target_currency: CurrencyCode::new(
                &env::var("AGGREGATOR_CURRENCY").unwrap_or_else(|_| "USD".to_string()),
            ),
            cycle_interval_secs,
            page_size,
            max_pages,
            sales_items_per_cycle,
            market_concurrency,
            market_timeout_secs,
            manipulation_jump_fraction,
            manipulation_volume_fraction,
            manipulation_recovery_cycles: parse_u32("AGGREGATOR_MANIPULATION_RECOVERY_CYCLES", 3)?,
            buff_session: env::var("BUFF_SESSION").ok().filter(|s| !s.is_empty()),
            exchange_rates,
            database_url,
        })
    }
}

fn parse_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| anyhow!("{} must be a non-negative integer", key)),
        Err(_) => Ok(default),
    }
}

fn parse_f64(key: &str, default: f64) -> Result<f64> {
    match env::var(key) {
        Ok(v) => v.parse().map_err(|_| anyhow!("{} must be a number", key)),
        Err(_) => Ok(default),
    }
}

fn parse_u32(key: &str, default: u32) -> Result<u32> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| anyhow!("{} must be a non-negative integer", key)),
        Err(_) => Ok(default),
    }
}

/// Parse "USD:CNY:7.25,CNY:USD:0.138" style rate lists.
fn parse_rates(raw: &str) -> Result<Vec<(CurrencyCode, CurrencyCode, f64)>> {
    let mut rates = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let fields: Vec<&str> = part.split(':').collect();
        if fields.len() != 3 {
            return Err(anyhow!("Invalid rate entry '{}', expected FROM:TO:RATE", part));
        }
        let rate: f64 = fields[2]
            .parse()
            .map_err(|_| anyhow!("Invalid rate value in '{}'", part))?;
        if rate <= 0.0 {
            return Err(anyhow!("Rate in '{}' must be > 0", part));
        }
        rates.push((
            CurrencyCode::new(fields[0]),
            CurrencyCode::new(fields[1]),
            rate,
        ));
    }
    Ok(rates)
}

//! MarketAggregator: timer-driven collection and aggregation service
//!
//! Main orchestrator that coordinates:
//! - Concurrent listing collection from every registered marketplace
//! - Sales-history refresh for the stalest items
//! - The aggregation engine (snapshots, buckets, flips inputs)
//! - Storage with cycle-timestamp write precedence

use crate::config::AggregatorConfig;
use anyhow::Result;
use chrono::Utc;
use futures_util::future::join_all;
use log::{error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{interval, timeout};
use tradewatch_rust_core::aggregation::{AggregationEngine, CycleInput, CycleOutcome};
use tradewatch_rust_core::currency::RateTable;
use tradewatch_rust_core::manipulation::{ManipulationConfig, ManipulationDetector};
use tradewatch_rust_core::markets::{collect_listings, MarketClientRegistry};
use tradewatch_rust_core::storage::{
    create_pool, DbPoolConfig, PostgresStorage, Storage,
};
use tradewatch_rust_core::types::{ListingQuote, MarketType, SaleEvent};

/// Main aggregation service
pub struct MarketAggregator {
    pub config: AggregatorConfig,
    storage: Arc<dyn Storage>,
    registry: Arc<MarketClientRegistry>,
    engine: AggregationEngine,
    rates: RateTable,
    pub stats: Arc<AggregatorStats>,
}

#[derive(Debug, Default)]
pub struct AggregatorStats {
    pub cycles_completed: AtomicU64,
    pub cycles_failed: AtomicU64,
    pub quotes_collected: AtomicU64,
    pub page_errors: AtomicU64,
    pub items_updated: AtomicU64,
    pub stale_writes: AtomicU64,
}

impl MarketAggregator {
    /// Production wiring: Postgres storage, default marketplace registry,
    /// exchange rates loaded once from config.
    pub async fn new(config: AggregatorConfig) -> Result<Self> {
        info!(
            "Initializing MarketAggregator for app {} in {}",
            config.app_id,
            config.target_currency.as_str()
        );

        let pool_config = DbPoolConfig::from_env_with_defaults(DbPoolConfig::default());
        let pool = create_pool(&config.database_url, &pool_config).await?;
        let storage = PostgresStorage::new(pool);
        storage.init_schema().await?;

        let registry = MarketClientRegistry::with_defaults(config.buff_session.clone());
        Self::with_parts(config, Arc::new(storage), Arc::new(registry)).await
    }

    /// Test and embedding wiring with explicit storage and clients.
    pub async fn with_parts(
        config: AggregatorConfig,
        storage: Arc<dyn Storage>,
        registry: Arc<MarketClientRegistry>,
    ) -> Result<Self> {
        let rates = RateTable::with_rates(config.exchange_rates.clone());
        let detector = ManipulationDetector::new(ManipulationConfig {
            price_jump_fraction: config.manipulation_jump_fraction,
            thin_volume_fraction: config.manipulation_volume_fraction,
            recovery_cycles: config.manipulation_recovery_cycles,
        });
        let engine = AggregationEngine::with_detector(
            storage.clone(),
            config.target_currency.clone(),
            detector,
        );
        engine.warm_catalog(config.app_id).await?;

        Ok(Self {
            config,
            storage,
            registry,
            engine,
            rates,
            stats: Arc::new(AggregatorStats::default()),
        })
    }

    /// Run cycles forever at the configured interval.
    pub async fn run(&self) -> Result<()> {
        let mut ticker = interval(Duration::from_secs(self.config.cycle_interval_secs));
        info!(
            "MarketAggregator running, cycle every {}s across {} marketplaces",
            self.config.cycle_interval_secs,
            self.registry.len()
        );

        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(outcome) => {
                    self.stats.cycles_completed.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .items_updated
                        .fetch_add(outcome.items_updated as u64, Ordering::Relaxed);
                    self.stats
                        .stale_writes
                        .fetch_add(outcome.stale_writes as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    // A failed cycle never kills the service; next tick retries.
                    self.stats.cycles_failed.fetch_add(1, Ordering::Relaxed);
                    error!("Aggregation cycle failed: {:#}", e);
                }
            }
        }
    }

    /// One full collection + aggregation pass.
    pub async fn run_once(&self) -> Result<CycleOutcome> {
        let cycle_at = Utc::now();
        let quotes = self.collect_all_listings().await;
        let sales = self.collect_sales().await;

        info!(
            "Cycle at {}: {} quotes, {} sales collected",
            cycle_at.to_rfc3339(),
            quotes.len(),
            sales.len()
        );

        self.engine
            .run_cycle(CycleInput {
                app_id: self.config.app_id,
                cycle_at,
                quotes,
                sales,
                rates: self.rates.clone(),
            })
            .await
    }

    /// Fetch listings from every marketplace concurrently, bounded by the
    /// concurrency cap and per-market time budget. A market that fails or
    /// times out contributes nothing; the rest of the cycle proceeds.
    async fn collect_all_listings(&self) -> Vec<ListingQuote> {
        let semaphore = Arc::new(Semaphore::new(self.config.market_concurrency));
        let budget = Duration::from_secs(self.config.market_timeout_secs);

        let mut handles = Vec::new();
        for (market, client) in self.registry.iter() {
            let market = *market;
            let client = client.clone();
            let semaphore = semaphore.clone();
            let app_id = self.config.app_id;
            let page_size = self.config.page_size;
            let max_pages = self.config.max_pages;
            let stats = self.stats.clone();

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return Vec::new(),
                };
                match timeout(
                    budget,
                    collect_listings(client.as_ref(), app_id, page_size, max_pages),
                )
                .await
                {
                    Ok(collection) => {
                        stats
                            .page_errors
                            .fetch_add(collection.page_errors.len() as u64, Ordering::Relaxed);
                        stats
                            .quotes_collected
                            .fetch_add(collection.quotes.len() as u64, Ordering::Relaxed);
                        collection.quotes
                    }
                    Err(_) => {
                        warn!("Market {} exceeded its time budget", market.as_str());
                        Vec::new()
                    }
                }
            }));
        }

        let mut quotes = Vec::new();
        for result in join_all(handles).await {
            match result {
                Ok(mut market_quotes) => quotes.append(&mut market_quotes),
                Err(e) => warn!("Market collection task panicked: {}", e),
            }
        }
        quotes
    }

    /// Refresh sales history for the items that have gone longest without
    /// one, up to the per-cycle cap.
    async fn collect_sales(&self) -> Vec<SaleEvent> {
        let client = match self.registry.get(MarketType::SteamCommunityMarket) {
            Some(client) if client.supports_sales_history() => client,
            _ => return Vec::new(),
        };

        let mut snapshots = match self.storage.list_snapshots().await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!("Could not list snapshots for sales refresh: {:#}", e);
                return Vec::new();
            }
        };
        snapshots.sort_by_key(|s| s.last_checked_sales_at);
        snapshots.truncate(self.config.sales_items_per_cycle);

        let mut sales = Vec::new();
        for snapshot in snapshots {
            let item = match self.storage.get_item(snapshot.item_id).await {
                Ok(Some(item)) => item,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Could not load item for sales refresh: {:#}", e);
                    continue;
                }
            };
            match client.fetch_sales(self.config.app_id, &item.name).await {
                Ok(mut item_sales) => sales.append(&mut item_sales),
                Err(e) => warn!("Sales fetch failed for {}: {:#}", item.name, e),
            }
        }
        sales
    }
}

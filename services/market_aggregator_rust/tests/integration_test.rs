//! End-to-end aggregation cycle tests against scripted marketplace
//! clients and in-memory storage.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use market_aggregator_rust::{AggregatorConfig, MarketAggregator};
use std::sync::Arc;
use tradewatch_rust_core::currency::{CurrencyCode, Money};
use tradewatch_rust_core::markets::{ListingPage, MarketClient, MarketClientRegistry};
use tradewatch_rust_core::storage::{MemoryStorage, Storage};
use tradewatch_rust_core::types::{ListingQuote, MarketType, SaleEvent};

struct ScriptedMarket {
    market: MarketType,
    quotes: Vec<ListingQuote>,
    sales: Vec<SaleEvent>,
}

impl ScriptedMarket {
    fn new(market: MarketType) -> Self {
        Self {
            market,
            quotes: Vec::new(),
            sales: Vec::new(),
        }
    }

    fn with_quote(mut self, name: &str, minor: i64, quantity: u32) -> Self {
        self.quotes.push(ListingQuote {
            market: self.market,
            item_name: name.to_string(),
            item_id: None,
            price: Money::from_minor(minor),
            currency: CurrencyCode::usd(),
            quantity,
            is_available: true,
            observed_at: Utc::now(),
        });
        self
    }

    fn with_sale(mut self, name: &str, minor: i64, quantity: u32, hours_ago: i64) -> Self {
        self.sales.push(SaleEvent {
            market: self.market,
            item_name: name.to_string(),
            price: Money::from_minor(minor),
            currency: CurrencyCode::usd(),
            quantity,
            sold_at: Utc::now() - Duration::hours(hours_ago),
        });
        self
    }
}

#[async_trait]
impl MarketClient for ScriptedMarket {
    fn market_type(&self) -> MarketType {
        self.market
    }

    async fn fetch_listings(
        &self,
        _app_id: u64,
        page: u32,
        _page_size: u32,
    ) -> Result<ListingPage> {
        if page > 0 {
            return Ok(ListingPage {
                quotes: Vec::new(),
                has_more: false,
            });
        }
        Ok(ListingPage {
            quotes: self.quotes.clone(),
            has_more: false,
        })
    }

    fn supports_sales_history(&self) -> bool {
        self.market == MarketType::SteamCommunityMarket
    }

    async fn fetch_sales(&self, _app_id: u64, item_name: &str) -> Result<Vec<SaleEvent>> {
        Ok(self
            .sales
            .iter()
            .filter(|s| s.item_name == item_name)
            .cloned()
            .collect())
    }
}

fn test_config() -> AggregatorConfig {
    AggregatorConfig {
        app_id: 252490,
        target_currency: CurrencyCode::usd(),
        cycle_interval_secs: 300,
        page_size: 100,
        max_pages: 5,
        sales_items_per_cycle: 50,
        market_concurrency: 2,
        market_timeout_secs: 30,
        manipulation_jump_fraction: 0.5,
        manipulation_volume_fraction: 0.25,
        manipulation_recovery_cycles: 3,
        buff_session: None,
        exchange_rates: vec![],
        database_url: "unused-in-tests".to_string(),
    }
}

async fn aggregator_with(
    storage: Arc<MemoryStorage>,
    markets: Vec<ScriptedMarket>,
) -> MarketAggregator {
    let mut registry = MarketClientRegistry::new();
    for market in markets {
        registry.register(Arc::new(market));
    }
    MarketAggregator::with_parts(test_config(), storage, Arc::new(registry))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_full_cycle_builds_snapshots() {
    let storage = Arc::new(MemoryStorage::new());
    let aggregator = aggregator_with(
        storage.clone(),
        vec![
            ScriptedMarket::new(MarketType::SteamCommunityMarket)
                .with_quote("Forest Camo Pants", 473, 12)
                .with_quote("Tin Helmet", 250, 4),
            ScriptedMarket::new(MarketType::TradeSkinsFast).with_quote("Tin Helmet", 199, 2),
        ],
    )
    .await;

    let outcome = aggregator.run_once().await.unwrap();
    assert_eq!(outcome.items_created, 2);
    assert_eq!(outcome.items_updated, 2);

    let helmet = storage
        .get_item_by_name(252490, "Tin Helmet")
        .await
        .unwrap()
        .unwrap();
    let snapshot = storage.get_snapshot(helmet.id).await.unwrap().unwrap();
    assert_eq!(snapshot.buy_now_price.minor(), 199);
    assert_eq!(snapshot.buy_now_market, Some(MarketType::TradeSkinsFast));
    assert_eq!(snapshot.supply, 6);
    assert_eq!(snapshot.prices.len(), 2);
}

#[tokio::test]
async fn test_second_cycle_tracks_deltas_and_sales() {
    let storage = Arc::new(MemoryStorage::new());

    let first = aggregator_with(
        storage.clone(),
        vec![ScriptedMarket::new(MarketType::SteamCommunityMarket)
            .with_quote("Glow Saber", 100, 1)],
    )
    .await;
    first.run_once().await.unwrap();

    // Second cycle: price moved, and sales history now exists for the item
    let second = aggregator_with(
        storage.clone(),
        vec![ScriptedMarket::new(MarketType::SteamCommunityMarket)
            .with_quote("Glow Saber", 110, 1)
            .with_sale("Glow Saber", 105, 3, 2)
            .with_sale("Glow Saber", 95, 1, 40)],
    )
    .await;
    second.run_once().await.unwrap();

    let item = storage
        .get_item_by_name(252490, "Glow Saber")
        .await
        .unwrap()
        .unwrap();
    let snapshot = storage.get_snapshot(item.id).await.unwrap().unwrap();
    assert_eq!(snapshot.buy_now_delta.minor(), 10);
    assert_eq!(snapshot.demand, 3);
    assert_eq!(snapshot.buckets[&48].sales, 4);
    assert!(snapshot.last_checked_sales_at.is_some());
}

#[tokio::test]
async fn test_failing_market_does_not_block_cycle() {
    struct BrokenMarket;

    #[async_trait]
    impl MarketClient for BrokenMarket {
        fn market_type(&self) -> MarketType {
            MarketType::Buff
        }
        async fn fetch_listings(
            &self,
            _app_id: u64,
            _page: u32,
            _page_size: u32,
        ) -> Result<ListingPage> {
            Err(anyhow::anyhow!("upstream 502"))
        }
    }

    let storage = Arc::new(MemoryStorage::new());
    let mut registry = MarketClientRegistry::new();
    registry.register(Arc::new(
        ScriptedMarket::new(MarketType::SteamCommunityMarket).with_quote("Old Coin", 300, 2),
    ));
    registry.register(Arc::new(BrokenMarket));

    let aggregator =
        MarketAggregator::with_parts(test_config(), storage.clone(), Arc::new(registry))
            .await
            .unwrap();
    let outcome = aggregator.run_once().await.unwrap();
    assert_eq!(outcome.items_created, 1);

    let item = storage
        .get_item_by_name(252490, "Old Coin")
        .await
        .unwrap()
        .unwrap();
    assert!(storage.get_snapshot(item.id).await.unwrap().is_some());
}

//! Steam community market client (the primary exchange).
//!
//! Listings come from the paginated `search/render` endpoint; per-item
//! sales history from `pricehistory`. Prices are quoted in USD.

use crate::currency::{CurrencyCode, Money};
use crate::markets::{ListingPage, MarketClient};
use crate::types::{ListingQuote, MarketType, SaleEvent};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const BASE_URL: &str = "https://steamcommunity.com/market";

/// Steam caps `count` at 100 per search page.
pub const MAX_PAGE_SIZE: u32 = 100;

pub struct SteamMarketClient {
    client: Client,
    base_url: String,
    /// Delay between listing pages. Steam rate-limits aggressively.
    page_delay: Duration,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    success: bool,
    #[serde(default)]
    start: u32,
    #[serde(default)]
    total_count: u32,
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    hash_name: String,
    sell_listings: u32,
    /// Lowest listed price, in USD cents.
    sell_price: i64,
}

#[derive(Debug, Deserialize)]
struct PriceHistoryResponse {
    success: bool,
    /// Rows of [date string, median price in major units, quantity string].
    #[serde(default)]
    prices: Vec<(String, f64, String)>,
}

impl SteamMarketClient {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL.to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Tradewatch/1.0")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url,
            page_delay: Duration::from_millis(1500),
        }
    }

    /// Steam's price-history dates look like "Aug 21 2026 01: +0".
    fn parse_history_date(raw: &str) -> Option<DateTime<Utc>> {
        let trimmed = raw.trim_end_matches(" +0").trim_end_matches(':');
        NaiveDateTime::parse_from_str(&format!("{}:00:00", trimmed), "%b %d %Y %H:%M:%S")
            .ok()
            .map(|dt| dt.and_utc())
    }
}

impl Default for SteamMarketClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketClient for SteamMarketClient {
    fn market_type(&self) -> MarketType {
        MarketType::SteamCommunityMarket
    }

    async fn fetch_listings(&self, app_id: u64, page: u32, page_size: u32) -> Result<ListingPage> {
        if page > 0 {
            tokio::time::sleep(self.page_delay).await;
        }

        let page_size = page_size.min(MAX_PAGE_SIZE);
        let start = page * page_size;
        let url = format!(
            "{}/search/render/?appid={}&norender=1&start={}&count={}",
            self.base_url, app_id, start, page_size
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("steam search request failed")?
            .error_for_status()
            .context("steam search returned an error status")?;

        let body: SearchResponse = response
            .json()
            .await
            .context("steam search response was not valid JSON")?;
        if !body.success {
            return Err(anyhow!("steam search reported success=false"));
        }

        let observed_at = Utc::now();
        let quotes = body
            .results
            .iter()
            .map(|r| ListingQuote {
                market: MarketType::SteamCommunityMarket,
                item_name: r.hash_name.clone(),
                item_id: None,
                price: Money::from_minor(r.sell_price),
                currency: CurrencyCode::usd(),
                quantity: r.sell_listings,
                is_available: r.sell_listings > 0 && r.sell_price > 0,
                observed_at,
            })
            .collect::<Vec<_>>();

        debug!(
            start = body.start,
            total = body.total_count,
            quotes = quotes.len(),
            "steam listing page fetched"
        );

        Ok(ListingPage {
            has_more: start + page_size < body.total_count,
            quotes,
        })
    }

    fn supports_sales_history(&self) -> bool {
        true
    }

    async fn fetch_sales(&self, app_id: u64, item_name: &str) -> Result<Vec<SaleEvent>> {
        let url = format!("{}/pricehistory/", self.base_url);
        let appid = app_id.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[("appid", appid.as_str()), ("market_hash_name", item_name)])
            .send()
            .await
            .context("steam price history request failed")?
            .error_for_status()
            .context("steam price history returned an error status")?;

        let body: PriceHistoryResponse = response
            .json()
            .await
            .context("steam price history response was not valid JSON")?;
        if !body.success {
            return Err(anyhow!("steam price history reported success=false"));
        }

        let sales = body
            .prices
            .iter()
            .filter_map(|(date, median_price, quantity)| {
                let sold_at = Self::parse_history_date(date)?;
                let quantity = quantity.parse::<u32>().ok()?;
                Some(SaleEvent {
                    market: MarketType::SteamCommunityMarket,
                    item_name: item_name.to_string(),
                    price: Money::from_major(*median_price),
                    currency: CurrencyCode::usd(),
                    quantity,
                    sold_at,
                })
            })
            .collect();

        Ok(sales)
    }
}

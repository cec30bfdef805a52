//! TradeSkinsFast marketplace client.
//!
//! The whole bot inventory comes back from a single form POST, so this
//! adapter always reports one page. Prices are USD.

use crate::currency::{CurrencyCode, Money};
use crate::markets::{ListingPage, MarketClient};
use crate::types::{ListingQuote, MarketType};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const BASE_URL: &str = "https://tradeskinsfast.com";

pub struct TradeSkinsFastClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct BotsInventoryResponse {
    success: bool,
    #[serde(default)]
    items: Vec<BotInventoryItem>,
}

#[derive(Debug, Deserialize)]
struct BotInventoryItem {
    market_hash_name: String,
    /// Price in USD major units.
    price: f64,
    #[serde(default)]
    count: u32,
    #[serde(default)]
    tradable: bool,
}

impl TradeSkinsFastClient {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL.to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Tradewatch/1.0")
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }
}

impl Default for TradeSkinsFastClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketClient for TradeSkinsFastClient {
    fn market_type(&self) -> MarketType {
        MarketType::TradeSkinsFast
    }

    async fn fetch_listings(&self, app_id: u64, page: u32, _page_size: u32) -> Result<ListingPage> {
        if page > 0 {
            return Ok(ListingPage {
                quotes: Vec::new(),
                has_more: false,
            });
        }

        let url = format!("{}/ajax/botsinventory", self.base_url);
        let mut form = HashMap::new();
        form.insert("appid", app_id.to_string());

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .context("tradeskinsfast inventory request failed")?
            .error_for_status()
            .context("tradeskinsfast inventory returned an error status")?;

        let body: BotsInventoryResponse = response
            .json()
            .await
            .context("tradeskinsfast inventory response was not valid JSON")?;
        if !body.success {
            return Err(anyhow!("tradeskinsfast inventory reported success=false"));
        }

        let observed_at = Utc::now();
        let quotes = body
            .items
            .iter()
            .map(|item| ListingQuote {
                market: MarketType::TradeSkinsFast,
                item_name: item.market_hash_name.clone(),
                item_id: None,
                price: Money::from_major(item.price),
                currency: CurrencyCode::usd(),
                quantity: item.count.max(1),
                is_available: item.tradable && item.price > 0.0,
                observed_at,
            })
            .collect::<Vec<_>>();

        debug!(quotes = quotes.len(), "tradeskinsfast inventory fetched");

        Ok(ListingPage {
            quotes,
            has_more: false,
        })
    }
}

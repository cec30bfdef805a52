//! Buff marketplace client.
//!
//! Buff requires an authenticated session cookie and quotes prices in
//! CNY as decimal strings. Pages are 1-indexed and capped at 80 rows.

use crate::currency::{CurrencyCode, Money};
use crate::markets::{ListingPage, MarketClient};
use crate::types::{ListingQuote, MarketType};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const BASE_URL: &str = "https://buff.163.com/api";

/// Buff rejects requests asking for more than 80 rows per page.
pub const MAX_PAGE_SIZE: u32 = 80;

pub struct BuffClient {
    client: Client,
    base_url: String,
    page_delay: Duration,
}

#[derive(Debug, Deserialize)]
struct GoodsResponse {
    code: String,
    #[serde(default)]
    data: Option<GoodsData>,
}

#[derive(Debug, Deserialize)]
struct GoodsData {
    page_num: u32,
    total_page: u32,
    #[serde(default)]
    items: Vec<GoodsItem>,
}

#[derive(Debug, Deserialize)]
struct GoodsItem {
    market_hash_name: String,
    sell_num: u32,
    /// Decimal string, e.g. "12.50", in CNY.
    sell_min_price: String,
}

impl BuffClient {
    pub fn new(session: &str) -> Result<Self> {
        Self::with_base_url(session, BASE_URL.to_string())
    }

    pub fn with_base_url(session: &str, base_url: String) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let cookie = HeaderValue::from_str(&format!("session={}", session))
            .context("buff session cookie contains invalid characters")?;
        headers.insert(COOKIE, cookie);

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Tradewatch/1.0")
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            page_delay: Duration::from_millis(1500),
        })
    }

    /// Buff keys its catalog by game name, not Steam app id.
    fn game_name(app_id: u64) -> Result<&'static str> {
        match app_id {
            252490 => Ok("rust"),
            730 => Ok("csgo"),
            570 => Ok("dota2"),
            _ => Err(anyhow!("buff does not list app {}", app_id)),
        }
    }

    fn parse_price(raw: &str) -> Option<Money> {
        raw.trim().parse::<f64>().ok().map(Money::from_major)
    }
}

#[async_trait]
impl MarketClient for BuffClient {
    fn market_type(&self) -> MarketType {
        MarketType::Buff
    }

    async fn fetch_listings(&self, app_id: u64, page: u32, page_size: u32) -> Result<ListingPage> {
        if page > 0 {
            tokio::time::sleep(self.page_delay).await;
        }

        let game = Self::game_name(app_id)?;
        let page_num = page + 1;
        let page_size = page_size.min(MAX_PAGE_SIZE);
        // Cache buster, same trick the web UI uses.
        let nonce: u64 = rand::thread_rng().gen_range(100_000_000..1_000_000_000);
        let url = format!(
            "{}/market/goods/all?game={}&page_num={}&page_size={}&sort_by=price.desc&_={}",
            self.base_url, game, page_num, page_size, nonce
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("buff goods request failed")?
            .error_for_status()
            .context("buff goods returned an error status")?;

        let body: GoodsResponse = response
            .json()
            .await
            .context("buff goods response was not valid JSON")?;
        if body.code != "OK" {
            return Err(anyhow!("buff goods reported code {}", body.code));
        }
        let data = body
            .data
            .ok_or_else(|| anyhow!("buff goods response had no data"))?;

        let observed_at = Utc::now();
        let quotes = data
            .items
            .iter()
            .filter_map(|item| {
                let price = Self::parse_price(&item.sell_min_price)?;
                Some(ListingQuote {
                    market: MarketType::Buff,
                    item_name: item.market_hash_name.clone(),
                    item_id: None,
                    price,
                    currency: CurrencyCode::from("CNY"),
                    quantity: item.sell_num,
                    is_available: item.sell_num > 0 && price.minor() > 0,
                    observed_at,
                })
            })
            .collect::<Vec<_>>();

        debug!(
            page = data.page_num,
            total_pages = data.total_page,
            quotes = quotes.len(),
            "buff listing page fetched"
        );

        Ok(ListingPage {
            has_more: data.page_num < data.total_page,
            quotes,
        })
    }
}

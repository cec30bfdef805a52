//! Marketplace client abstractions for multi-market price collection.
//!
//! Defines the MarketClient trait that allows pluggable price feeds
//! (the Steam community market, Buff, TradeSkinsFast, ...) and a registry
//! that routes requests by marketplace. The aggregation engine depends only
//! on the trait.

use crate::types::{ListingQuote, MarketType, SaleEvent};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod buff;
pub mod steam;
pub mod tradeskinsfast;

pub use buff::BuffClient;
pub use steam::SteamMarketClient;
pub use tradeskinsfast::TradeSkinsFastClient;

/// One page of normalized listings from a marketplace.
#[derive(Clone, Debug, Default)]
pub struct ListingPage {
    pub quotes: Vec<ListingQuote>,
    pub has_more: bool,
}

/// A page that failed to fetch or deserialize. Recorded, never fatal.
#[derive(Clone, Debug)]
pub struct PageError {
    pub page: u32,
    pub error: String,
}

/// All listings a collection pass could gather, plus what it could not.
/// A failed page never aborts collection of the remaining pages.
#[derive(Clone, Debug, Default)]
pub struct ListingCollection {
    pub quotes: Vec<ListingQuote>,
    pub page_errors: Vec<PageError>,
}

/// Universal marketplace feed trait.
///
/// Each implementation owns endpoint construction, session/auth headers,
/// pagination cursors, deserialization into [`ListingQuote`], and its own
/// marketplace's rate limits (inter-page delays). Adapters never mutate
/// engine state; they are black boxes that may be slow but must eventually
/// return or fail.
#[async_trait]
pub trait MarketClient: Send + Sync {
    fn market_type(&self) -> MarketType;

    /// Fetch one page of current listings for an app namespace.
    async fn fetch_listings(&self, app_id: u64, page: u32, page_size: u32) -> Result<ListingPage>;

    /// Whether [`MarketClient::fetch_sales`] is implemented.
    fn supports_sales_history(&self) -> bool {
        false
    }

    /// Fetch the recent sales history for one item.
    async fn fetch_sales(&self, _app_id: u64, _item_name: &str) -> Result<Vec<SaleEvent>> {
        Err(anyhow!(
            "{} does not expose a sales-history feed",
            self.market_type().as_str()
        ))
    }
}

/// Collect every listing page from one marketplace, tolerating per-page
/// failures. Stops when the feed reports no more pages or `max_pages` is
/// reached.
pub async fn collect_listings(
    client: &dyn MarketClient,
    app_id: u64,
    page_size: u32,
    max_pages: u32,
) -> ListingCollection {
    let mut collection = ListingCollection::default();

    for page in 0..max_pages {
        match client.fetch_listings(app_id, page, page_size).await {
            Ok(listing_page) => {
                debug!(
                    market = client.market_type().as_str(),
                    page,
                    quotes = listing_page.quotes.len(),
                    "fetched listing page"
                );
                collection.quotes.extend(listing_page.quotes);
                if !listing_page.has_more {
                    break;
                }
            }
            Err(e) => {
                warn!(
                    market = client.market_type().as_str(),
                    page,
                    error = %e,
                    "listing page failed, continuing with remaining pages"
                );
                collection.page_errors.push(PageError {
                    page,
                    error: e.to_string(),
                });
            }
        }
    }

    collection
}

/// Registry of marketplace clients, keyed by market type.
pub struct MarketClientRegistry {
    clients: HashMap<MarketType, Arc<dyn MarketClient>>,
}

impl MarketClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// Registry with every supported marketplace wired up.
    pub fn with_defaults(buff_session: Option<String>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SteamMarketClient::new()));
        if let Some(session) = buff_session {
            match BuffClient::new(&session) {
                Ok(client) => registry.register(Arc::new(client)),
                Err(e) => warn!("Skipping buff client: {}", e),
            }
        }
        registry.register(Arc::new(TradeSkinsFastClient::new()));

        info!(
            "MarketClientRegistry initialized with {} marketplaces",
            registry.clients.len()
        );
        registry
    }

    pub fn register(&mut self, client: Arc<dyn MarketClient>) {
        info!("Registering marketplace client: {}", client.market_type().as_str());
        self.clients.insert(client.market_type(), client);
    }

    pub fn get(&self, market: MarketType) -> Option<Arc<dyn MarketClient>> {
        self.clients.get(&market).cloned()
    }

    pub fn get_required(&self, market: MarketType) -> Result<Arc<dyn MarketClient>> {
        self.get(market)
            .ok_or_else(|| anyhow!("No client registered for marketplace: {}", market.as_str()))
    }

    pub fn has(&self, market: MarketType) -> bool {
        self.clients.contains_key(&market)
    }

    pub fn markets(&self) -> Vec<MarketType> {
        self.clients.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MarketType, &Arc<dyn MarketClient>)> {
        self.clients.iter()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for MarketClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

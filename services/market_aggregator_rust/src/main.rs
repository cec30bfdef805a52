use anyhow::Result;
use log::info;
use market_aggregator_rust::{AggregatorConfig, MarketAggregator};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    info!("Starting market_aggregator_rust...");

    let config = AggregatorConfig::from_env()?;
    let aggregator = MarketAggregator::new(config).await?;

    aggregator.run().await
}

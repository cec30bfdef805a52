//! Cross-market flip detection.
//!
//! Derived entirely from the latest snapshots; nothing here is persisted.
//! A flip pairs an available buy on one marketplace with a sell on a
//! different one and is only reported when it clears fees.

use crate::storage::Storage;
use crate::types::{FlipOpportunity, MarketItemSnapshot};
use anyhow::Result;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::debug;

/// All fee-positive buy/sell pairs for one item, best first. Only the
/// buy side must be available right now; any marketplace with a price
/// line can serve as the sell venue.
pub fn find_flips(snapshot: &MarketItemSnapshot) -> Vec<FlipOpportunity> {
    let mut flips = Vec::new();
    for buy in snapshot.prices.iter().filter(|e| e.is_available) {
        for sell in &snapshot.prices {
            if buy.market == sell.market {
                continue;
            }
            let buy_fee = buy.market.buy_fee(buy.price);
            let sell_fee = sell.market.sell_fee(sell.price);
            let net = FlipOpportunity::net(buy.price, buy_fee, sell.price, sell_fee);
            if !net.is_positive() {
                continue;
            }
            flips.push(FlipOpportunity {
                item_id: snapshot.item_id,
                buy_from: buy.market,
                buy_price: buy.price,
                buy_fee,
                sell_to: sell.market,
                sell_price: sell.price,
                sell_fee,
                net_profit: net,
                is_being_manipulated: snapshot.is_being_manipulated,
            });
        }
    }

    flips.sort_by(|a, b| b.net_profit.cmp(&a.net_profit));
    flips
}

/// Scan every stored snapshot for flips, most profitable first.
pub async fn scan_flips(storage: &Arc<dyn Storage>) -> Result<Vec<FlipOpportunity>> {
    let snapshots = storage.list_snapshots().await?;
    let mut flips: Vec<FlipOpportunity> = snapshots
        .par_iter()
        .flat_map_iter(find_flips)
        .collect();
    flips.sort_by(|a, b| b.net_profit.cmp(&a.net_profit));
    debug!(
        snapshots = snapshots.len(),
        flips = flips.len(),
        "Flip scan complete"
    );
    Ok(flips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::{CurrencyCode, Money};
    use crate::types::{MarketPriceEntry, MarketType};
    use uuid::Uuid;

    fn snapshot_with(entries: Vec<MarketPriceEntry>) -> MarketItemSnapshot {
        let mut snapshot = MarketItemSnapshot::new(Uuid::new_v4(), CurrencyCode::usd());
        snapshot.prices = entries;
        snapshot
    }

    fn entry(market: MarketType, minor: i64, available: bool) -> MarketPriceEntry {
        let price = Money::from_minor(minor);
        MarketPriceEntry {
            market,
            price,
            sell_fee: market.sell_fee(price),
            quantity: 1,
            is_available: available,
        }
    }

    #[test]
    fn test_fee_math_example() {
        let snapshot = snapshot_with(vec![
            entry(MarketType::Buff, 100, true),
            entry(MarketType::TradeSkinsFast, 130, true),
        ]);
        let flips = find_flips(&snapshot);
        assert_eq!(flips.len(), 1);
        let flip = &flips[0];
        assert_eq!(flip.buy_from, MarketType::Buff);
        assert_eq!(flip.sell_to, MarketType::TradeSkinsFast);
        // tradeskinsfast withholds 5% of 130, rounded: 7
        assert_eq!(flip.sell_fee.minor(), 7);
        assert_eq!(flip.net_profit.minor(), 130 - 7 - 100);
    }

    #[test]
    fn test_never_same_market_both_sides() {
        let snapshot = snapshot_with(vec![
            entry(MarketType::Buff, 100, true),
            entry(MarketType::TradeSkinsFast, 500, true),
        ]);
        for flip in find_flips(&snapshot) {
            assert_ne!(flip.buy_from, flip.sell_to);
        }
    }

    #[test]
    fn test_no_flip_when_spread_eaten_by_fees() {
        // 100 -> 101 spread cannot clear the 5% sell fee
        let snapshot = snapshot_with(vec![
            entry(MarketType::Buff, 100, true),
            entry(MarketType::TradeSkinsFast, 101, true),
        ]);
        assert!(find_flips(&snapshot).is_empty());
    }

    #[test]
    fn test_unavailable_market_cannot_be_buy_side() {
        let snapshot = snapshot_with(vec![
            entry(MarketType::Buff, 100, false),
            entry(MarketType::TradeSkinsFast, 500, true),
        ]);
        assert!(find_flips(&snapshot)
            .iter()
            .all(|f| f.buy_from != MarketType::Buff));
    }

    #[test]
    fn test_unavailable_market_still_sells() {
        // No listings on Buff right now, but its last price line stays
        // a valid sell venue.
        let snapshot = snapshot_with(vec![
            entry(MarketType::TradeSkinsFast, 100, true),
            entry(MarketType::Buff, 500, false),
        ]);
        let flips = find_flips(&snapshot);
        assert_eq!(flips.len(), 1);
        assert_eq!(flips[0].buy_from, MarketType::TradeSkinsFast);
        assert_eq!(flips[0].sell_to, MarketType::Buff);
        // buff withholds 2% of 500: 10
        assert_eq!(flips[0].net_profit.minor(), 500 - 10 - 100);
    }

    #[test]
    fn test_manipulation_flag_passes_through() {
        let mut snapshot = snapshot_with(vec![
            entry(MarketType::Buff, 100, true),
            entry(MarketType::TradeSkinsFast, 500, true),
        ]);
        snapshot.is_being_manipulated = true;
        let flips = find_flips(&snapshot);
        assert!(!flips.is_empty());
        assert!(flips.iter().all(|f| f.is_being_manipulated));
    }

    #[test]
    fn test_sorted_most_profitable_first() {
        let snapshot = snapshot_with(vec![
            entry(MarketType::SteamCommunityMarket, 100, true),
            entry(MarketType::Buff, 200, true),
            entry(MarketType::TradeSkinsFast, 400, true),
        ]);
        let flips = find_flips(&snapshot);
        assert!(flips.len() >= 2);
        for pair in flips.windows(2) {
            assert!(pair[0].net_profit >= pair[1].net_profit);
        }
    }
}

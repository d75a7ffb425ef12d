//! Market-price oracle (consumed collaborator, spec.md §4.2).
//!
//! Contract: `price(market) -> scalar | {yes, no} | absent`. Crypto markets
//! (any identifier not prefixed `polymarket:` or `kalshi:`) return a scalar;
//! prediction markets return a pair in `[0,1]`. Absent means the order path
//! must fail with a retriable "market data unavailable" condition. The only
//! thing this crate consumes from market-data ingestion is the cache
//! contract (spec.md §1 Non-goals) -- prices are read from
//! `market:{market}:price`, written by an out-of-scope ingestion process.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cache::{self, Cache};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriceQuote {
    Scalar(Decimal),
    Prediction { yes: Decimal, no: Decimal },
}

impl PriceQuote {
    /// The reference price side used for a given trade `side` (spec.md
    /// §4.3 step 3): scalar quotes have one reference; prediction quotes
    /// price `yes` against `yes` and `no` against `no`.
    pub fn reference_for(&self, side: crate::domain::Side) -> Option<Decimal> {
        use crate::domain::Side;
        match (self, side) {
            (PriceQuote::Scalar(p), Side::Long | Side::Short) => Some(*p),
            (PriceQuote::Prediction { yes, .. }, Side::Yes) => Some(*yes),
            (PriceQuote::Prediction { no, .. }, Side::No) => Some(*no),
            _ => None,
        }
    }
}

pub fn is_prediction_market(market: &str) -> bool {
    market.starts_with("polymarket:") || market.starts_with("kalshi:")
}

#[async_trait]
pub trait Oracle: Send + Sync {
    async fn price(&self, market: &str) -> anyhow::Result<Option<PriceQuote>>;
}

/// Reads the cache contract described in spec.md §4.2; this crate never
/// talks to a market-data ingestion source directly.
pub struct CacheOracle {
    cache: std::sync::Arc<dyn Cache>,
}

impl CacheOracle {
    pub fn new(cache: std::sync::Arc<dyn Cache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Oracle for CacheOracle {
    async fn price(&self, market: &str) -> anyhow::Result<Option<PriceQuote>> {
        cache::get_json(self.cache.as_ref(), &cache::keys::market_price(market)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use rust_decimal_macros::dec;

    #[test]
    fn crypto_markets_have_no_polymarket_or_kalshi_prefix() {
        assert!(!is_prediction_market("BTC/USD"));
        assert!(is_prediction_market("polymarket:E1"));
        assert!(is_prediction_market("kalshi:E2"));
    }

    #[test]
    fn reference_for_picks_matching_side() {
        let scalar = PriceQuote::Scalar(dec!(50000));
        assert_eq!(scalar.reference_for(Side::Long), Some(dec!(50000)));
        assert_eq!(scalar.reference_for(Side::Yes), None);

        let pred = PriceQuote::Prediction {
            yes: dec!(0.6),
            no: dec!(0.4),
        };
        assert_eq!(pred.reference_for(Side::Yes), Some(dec!(0.6)));
        assert_eq!(pred.reference_for(Side::No), Some(dec!(0.4)));
    }
}

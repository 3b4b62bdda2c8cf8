//! Exchange connectivity.
//!
//! [`MarketDataSource`] covers the request/response side used at startup and for
//! open-interest pulls; [`binance_ws::BinanceStream`] pushes live events into the
//! dispatcher channel.

pub mod binance;
pub mod binance_ws;
pub mod oi_poller;

pub use binance::BinanceFuturesClient;
pub use binance_ws::BinanceStream;
pub use oi_poller::OpenInterestPoller;

use crate::error::Result;
use crate::types::{Candle, OpenInterestObservation};
use async_trait::async_trait;
use tracing::warn;

/// Request/response access to an exchange.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Source name for logging.
    fn name(&self) -> &str;

    /// Symbols currently open for trading.
    async fn fetch_tradable_symbols(&self) -> Result<Vec<String>>;

    /// Subset of `candidates` that passes the liquidity filter.
    async fn fetch_volume_filtered_symbols(&self, candidates: &[String]) -> Result<Vec<String>>;

    /// Closed historical candles, oldest first.
    async fn fetch_historical_candles(&self, symbol: &str) -> Result<Vec<Candle>>;

    /// Latest open interest, `None` when the exchange has no reading.
    async fn fetch_open_interest(&self, symbol: &str) -> Result<Option<OpenInterestObservation>>;
}

/// Something that can produce a fresh open-interest reading on demand.
///
/// Failures are absorbed: the caller only sees whether a value arrived.
#[async_trait]
pub trait OpenInterestSource: Send + Sync {
    async fn refresh_open_interest(&self, symbol: &str) -> Option<OpenInterestObservation>;
}

#[async_trait]
impl<T> OpenInterestSource for T
where
    T: MarketDataSource + ?Sized,
{
    async fn refresh_open_interest(&self, symbol: &str) -> Option<OpenInterestObservation> {
        match self.fetch_open_interest(symbol).await {
            Ok(observation) => observation,
            Err(e) => {
                warn!("{} open interest fetch failed for {}: {}", self.name(), symbol, e);
                None
            }
        }
    }
}

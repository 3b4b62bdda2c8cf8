//! Startup: pick the symbols to watch and seed their history.

use crate::error::{AppError, Result};
use crate::services::symbol_store::SymbolStore;
use crate::sources::MarketDataSource;
use tracing::{info, warn};

/// Explicitly configured symbols win; otherwise discover tradable symbols and
/// keep the liquid ones.
pub async fn resolve_symbols<S>(source: &S, configured: &[String]) -> Result<Vec<String>>
where
    S: MarketDataSource + ?Sized,
{
    let symbols = if configured.is_empty() {
        let tradable = source.fetch_tradable_symbols().await?;
        source.fetch_volume_filtered_symbols(&tradable).await?
    } else {
        info!("Using {} configured symbols", configured.len());
        configured.to_vec()
    };

    if symbols.is_empty() {
        return Err(AppError::NoSymbols);
    }
    Ok(symbols)
}

/// Register every symbol whose history loads. Failed or empty loads are skipped.
pub async fn seed_store<S>(source: &S, symbols: &[String], capacity: usize) -> Result<SymbolStore>
where
    S: MarketDataSource + ?Sized,
{
    let mut store = SymbolStore::new(capacity);

    for symbol in symbols {
        match source.fetch_historical_candles(symbol).await {
            Ok(candles) if candles.is_empty() => {
                warn!("No historical candles for {}, skipping", symbol);
            }
            Ok(candles) => store.register(symbol, candles),
            Err(e) => {
                warn!("Failed to load history for {}, skipping: {}", symbol, e);
            }
        }
    }

    if store.is_empty() {
        return Err(AppError::NoSymbols);
    }
    info!("Seeded history for {}/{} symbols", store.len(), symbols.len());
    Ok(store)
}

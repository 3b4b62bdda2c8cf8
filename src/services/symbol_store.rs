//! Rolling per-symbol candle windows and open-interest state.

use crate::types::{Candle, OpenInterestState};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors returned when mutating the store.
#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("Symbol not registered: {0}")]
    UnknownSymbol(String),
    #[error("Out-of-order candle for {symbol}: {timestamp} is older than {last}")]
    OutOfOrder {
        symbol: String,
        timestamp: i64,
        last: i64,
    },
}

/// Bounded candle window for a single symbol.
#[derive(Debug)]
pub struct SymbolHistory {
    candles: VecDeque<Candle>,
    capacity: usize,
}

impl SymbolHistory {
    /// Create an empty window holding at most `capacity` candles.
    pub fn new(capacity: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append a closed candle, evicting the oldest when over capacity.
    ///
    /// A candle with the same timestamp as the tail replaces it; an older one is rejected.
    /// Returns the tail timestamp in the error case.
    fn push(&mut self, candle: Candle) -> Result<(), i64> {
        if let Some(last) = self.candles.back_mut() {
            if candle.timestamp == last.timestamp {
                *last = candle;
                return Ok(());
            }
            if candle.timestamp < last.timestamp {
                return Err(last.timestamp);
            }
        }

        self.candles.push_back(candle);
        while self.candles.len() > self.capacity {
            self.candles.pop_front();
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    /// Copy of the window, oldest first.
    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.iter().copied().collect()
    }
}

/// Per-symbol candle windows plus open-interest pairs.
///
/// Symbols are registered once at startup; events for anything else are rejected.
#[derive(Debug)]
pub struct SymbolStore {
    capacity: usize,
    histories: HashMap<String, SymbolHistory>,
    open_interest: HashMap<String, OpenInterestState>,
}

impl SymbolStore {
    /// Create an empty store whose windows hold `capacity` candles.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            histories: HashMap::new(),
            open_interest: HashMap::new(),
        }
    }

    /// Register a symbol seeded with historical candles.
    ///
    /// Only the newest `capacity` candles are kept. Out-of-order seed candles are skipped.
    pub fn register(&mut self, symbol: &str, seed: Vec<Candle>) {
        let mut history = SymbolHistory::new(self.capacity);
        for candle in seed {
            if let Err(last) = history.push(candle) {
                warn!(
                    "Skipping out-of-order seed candle for {}: {} is older than {}",
                    symbol, candle.timestamp, last
                );
            }
        }
        debug!("Registered {} with {} candles", symbol, history.len());
        self.histories.insert(symbol.to_string(), history);
        self.open_interest
            .insert(symbol.to_string(), OpenInterestState::default());
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.histories.contains_key(symbol)
    }

    /// Registered symbols, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.histories.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    /// Append a closed candle to a registered symbol.
    pub fn append(&mut self, symbol: &str, candle: Candle) -> Result<(), StoreError> {
        let history = self
            .histories
            .get_mut(symbol)
            .ok_or_else(|| StoreError::UnknownSymbol(symbol.to_string()))?;

        history.push(candle).map_err(|last| StoreError::OutOfOrder {
            symbol: symbol.to_string(),
            timestamp: candle.timestamp,
            last,
        })
    }

    /// Current window for a symbol, oldest first.
    pub fn snapshot(&self, symbol: &str) -> Option<Vec<Candle>> {
        self.histories.get(symbol).map(SymbolHistory::to_vec)
    }

    pub fn history(&self, symbol: &str) -> Option<&SymbolHistory> {
        self.histories.get(symbol)
    }

    /// Record an open-interest observation, shifting current to previous.
    pub fn set_open_interest(
        &mut self,
        symbol: &str,
        value: f64,
        observed_at: i64,
    ) -> Result<(), StoreError> {
        let state = self
            .open_interest
            .get_mut(symbol)
            .ok_or_else(|| StoreError::UnknownSymbol(symbol.to_string()))?;
        state.observe(value, observed_at);
        Ok(())
    }

    /// Open-interest pair for a symbol.
    pub fn open_interest(&self, symbol: &str) -> Option<OpenInterestState> {
        self.open_interest.get(symbol).copied()
    }
}

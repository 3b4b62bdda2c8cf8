use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A closed OHLCV bar.
///
/// `timestamp` is the bar open time in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Errors raised while turning an exchange payload into a [`Candle`].
#[derive(Debug, Error, PartialEq)]
pub enum CandleParseError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` is not a number: {value}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("field `{0}` is not finite")]
    NonFinite(&'static str),
}

impl Candle {
    /// Build a candle, rejecting NaN and infinite prices or volume.
    pub fn new(
        timestamp: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleParseError> {
        for (field, value) in [
            ("open", open),
            ("high", high),
            ("low", low),
            ("close", close),
            ("volume", volume),
        ] {
            if !value.is_finite() {
                return Err(CandleParseError::NonFinite(field));
            }
        }

        Ok(Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

/// Parse a decimal string field as sent by the exchange (`"43500.10"`).
pub(crate) fn parse_decimal(
    field: &'static str,
    value: Option<&str>,
) -> Result<f64, CandleParseError> {
    let raw = value.ok_or(CandleParseError::MissingField(field))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|_| CandleParseError::InvalidNumber {
            field,
            value: raw.to_string(),
        })
}

/// Latest open-interest reading for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpenInterestObservation {
    pub value: f64,
    /// Exchange timestamp of the reading, epoch milliseconds.
    pub observed_at: i64,
}

/// Current/previous open-interest pair for one symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OpenInterestState {
    pub current: Option<f64>,
    pub previous: Option<f64>,
    pub observed_at: Option<i64>,
}

impl OpenInterestState {
    /// Apply a new observation: the old current value becomes previous.
    pub fn observe(&mut self, value: f64, observed_at: i64) {
        if let Some(current) = self.current {
            self.previous = Some(current);
        }
        self.current = Some(value);
        self.observed_at = Some(observed_at);
    }
}

//! Inbound market-stream events.

use super::candle::{parse_decimal, Candle, CandleParseError};
use serde::Deserialize;

/// A single event routed to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// Upper-case exchange symbol, e.g. `BTCUSDT`.
    pub symbol: String,
    pub kind: StreamEventKind,
}

/// Discriminates what the dispatcher should do with an event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEventKind {
    /// Candle update. Only bars with `closed == true` are acted upon.
    Kline(RawKline),
    /// Something happened that warrants a fresh open-interest pull
    /// (liquidation print, poll timer). Carries no value of its own.
    OpenInterestProxy,
}

impl StreamEvent {
    pub fn kline(symbol: impl Into<String>, kline: RawKline) -> Self {
        Self {
            symbol: symbol.into(),
            kind: StreamEventKind::Kline(kline),
        }
    }

    pub fn open_interest_proxy(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            kind: StreamEventKind::OpenInterestProxy,
        }
    }
}

/// Kline payload as sent on the futures `<symbol>@kline_<interval>` stream.
///
/// Numeric fields arrive as strings and are validated lazily so a single bad
/// field drops one event instead of the whole message.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawKline {
    #[serde(rename = "t")]
    pub open_time: Option<i64>,
    #[serde(rename = "o")]
    pub open: Option<String>,
    #[serde(rename = "h")]
    pub high: Option<String>,
    #[serde(rename = "l")]
    pub low: Option<String>,
    #[serde(rename = "c")]
    pub close: Option<String>,
    #[serde(rename = "v")]
    pub volume: Option<String>,
    #[serde(rename = "x", default)]
    pub closed: bool,
}

impl TryFrom<&RawKline> for Candle {
    type Error = CandleParseError;

    fn try_from(raw: &RawKline) -> Result<Self, Self::Error> {
        let timestamp = raw.open_time.ok_or(CandleParseError::MissingField("t"))?;
        Candle::new(
            timestamp,
            parse_decimal("o", raw.open.as_deref())?,
            parse_decimal("h", raw.high.as_deref())?,
            parse_decimal("l", raw.low.as_deref())?,
            parse_decimal("c", raw.close.as_deref())?,
            parse_decimal("v", raw.volume.as_deref())?,
        )
    }
}

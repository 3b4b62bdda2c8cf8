use super::MarketDataSource;
use crate::config::ExchangeConfig;
use crate::error::{AppError, Result};
use crate::services::retry::RetryPolicy;
use crate::types::candle::parse_decimal;
use crate::types::{Candle, CandleParseError, OpenInterestObservation};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

const EXCHANGE_INFO_PATH: &str = "/fapi/v1/exchangeInfo";
const TICKER_24H_PATH: &str = "/fapi/v1/ticker/24hr";
const KLINES_PATH: &str = "/fapi/v1/klines";
const OPEN_INTEREST_PATH: &str = "/fapi/v1/openInterest";

const QUOTE_ASSET: &str = "USDT";
const TRADING_STATUS: &str = "TRADING";
const PERPETUAL_CONTRACT: &str = "PERPETUAL";

/// Binance exchangeInfo response (only the fields we need).
#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<ExchangeSymbol>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeSymbol {
    symbol: String,
    status: String,
    quote_asset: String,
    #[serde(default)]
    contract_type: String,
}

/// Binance 24hr ticker response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FuturesTicker {
    symbol: String,
    quote_volume: String,
}

/// Binance open interest response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenInterestResponse {
    open_interest: String,
    time: i64,
}

/// USDT-margined perpetual contracts that are currently trading.
fn usdt_perpetuals(info: ExchangeInfo) -> Vec<String> {
    info.symbols
        .into_iter()
        .filter(|s| {
            s.quote_asset == QUOTE_ASSET
                && s.status == TRADING_STATUS
                && s.contract_type == PERPETUAL_CONTRACT
        })
        .map(|s| s.symbol)
        .collect()
}

/// Candidates whose 24h quote volume reaches `threshold`, in ticker order.
fn filter_by_quote_volume(
    tickers: Vec<FuturesTicker>,
    candidates: &[String],
    threshold: f64,
) -> Vec<String> {
    let wanted: HashSet<&str> = candidates.iter().map(String::as_str).collect();
    tickers
        .into_iter()
        .filter(|t| wanted.contains(t.symbol.as_str()))
        .filter(|t| match t.quote_volume.parse::<f64>() {
            Ok(volume) => volume >= threshold,
            Err(_) => {
                debug!("Unparsable quote volume for {}: {}", t.symbol, t.quote_volume);
                false
            }
        })
        .map(|t| t.symbol)
        .collect()
}

/// Parse one kline row: `[openTime, open, high, low, close, volume, closeTime, ...]`.
fn parse_kline_row(row: &[Value]) -> std::result::Result<(Candle, i64), CandleParseError> {
    let field = |index: usize, name: &'static str| -> std::result::Result<f64, CandleParseError> {
        parse_decimal(name, row.get(index).and_then(Value::as_str))
    };

    let open_time = row
        .first()
        .and_then(Value::as_i64)
        .ok_or(CandleParseError::MissingField("open_time"))?;
    let close_time = row
        .get(6)
        .and_then(Value::as_i64)
        .ok_or(CandleParseError::MissingField("close_time"))?;

    let candle = Candle::new(
        open_time,
        field(1, "open")?,
        field(2, "high")?,
        field(3, "low")?,
        field(4, "close")?,
        field(5, "volume")?,
    )?;
    Ok((candle, close_time))
}

/// Closed candles from a klines payload. Malformed rows and bars still open at
/// `now_ms` are dropped.
fn closed_candles(rows: &[Vec<Value>], symbol: &str, now_ms: i64) -> Vec<Candle> {
    rows.iter()
        .filter_map(|row| match parse_kline_row(row) {
            Ok((candle, close_time)) if close_time < now_ms => Some(candle),
            Ok(_) => None,
            Err(e) => {
                warn!("Skipping malformed kline for {}: {}", symbol, e);
                None
            }
        })
        .collect()
}

fn retry_policy(config: &ExchangeConfig) -> RetryPolicy {
    RetryPolicy::new(
        config.request_max_attempts,
        Duration::from_millis(500),
        config.request_timeout,
    )
    .with_jitter(true)
}

/// Binance USDT-M futures REST client.
#[derive(Clone)]
pub struct BinanceFuturesClient {
    client: Client,
    rest_url: String,
    api_key: Option<String>,
    timeframe: String,
    kline_limit: usize,
    volume_threshold_usd: f64,
    retry: RetryPolicy,
}

impl BinanceFuturesClient {
    /// Create a client for the configured environment.
    pub fn new(config: &ExchangeConfig) -> Self {
        let client = Client::builder()
            .user_agent(concat!("scalpwatch/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            rest_url: config.rest_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeframe: config.timeframe.clone(),
            kline_limit: config.kline_limit,
            volume_threshold_usd: config.volume_threshold_usd,
            retry: retry_policy(config),
        }
    }

    /// Longest one REST operation can run, retries included.
    pub fn request_budget(config: &ExchangeConfig) -> Duration {
        retry_policy(config).worst_case(config.request_timeout)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        self.retry
            .run(path, || self.get_json_once(path, query))
            .await
    }

    async fn get_json_once<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.rest_url, path);

        let mut request = self.client.get(&url).query(query);
        if let Some(ref key) = self.api_key {
            request = request.header("X-MBX-APIKEY", key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let excerpt: String = text.chars().take(200).collect();
            return Err(AppError::ExternalApi(format!(
                "Binance {} returned {}: {}",
                path, status, excerpt
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl MarketDataSource for BinanceFuturesClient {
    fn name(&self) -> &str {
        "Binance"
    }

    async fn fetch_tradable_symbols(&self) -> Result<Vec<String>> {
        let exchange_info: ExchangeInfo = self.get_json(EXCHANGE_INFO_PATH, &[]).await?;
        let symbols = usdt_perpetuals(exchange_info);
        info!("Found {} tradable USDT perpetual symbols", symbols.len());
        Ok(symbols)
    }

    async fn fetch_volume_filtered_symbols(&self, candidates: &[String]) -> Result<Vec<String>> {
        let tickers: Vec<FuturesTicker> = self.get_json(TICKER_24H_PATH, &[]).await?;
        let symbols = filter_by_quote_volume(tickers, candidates, self.volume_threshold_usd);
        info!(
            "{} symbols pass the ${:.0}M volume filter",
            symbols.len(),
            self.volume_threshold_usd / 1_000_000.0
        );
        Ok(symbols)
    }

    async fn fetch_historical_candles(&self, symbol: &str) -> Result<Vec<Candle>> {
        // One extra bar since the newest one is usually still open.
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", self.timeframe.clone()),
            ("limit", (self.kline_limit + 1).to_string()),
        ];
        let rows: Vec<Vec<Value>> = self.get_json(KLINES_PATH, &query).await?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut candles = closed_candles(&rows, symbol, now_ms);
        if candles.len() > self.kline_limit {
            candles.drain(..candles.len() - self.kline_limit);
        }
        debug!("Loaded {} historical candles for {}", candles.len(), symbol);
        Ok(candles)
    }

    async fn fetch_open_interest(&self, symbol: &str) -> Result<Option<OpenInterestObservation>> {
        let query = [("symbol", symbol.to_string())];
        let response: OpenInterestResponse = self.get_json(OPEN_INTEREST_PATH, &query).await?;
        match response.open_interest.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(Some(OpenInterestObservation {
                value,
                observed_at: response.time,
            })),
            _ => {
                warn!(
                    "Unusable open interest for {}: {}",
                    symbol, response.open_interest
                );
                Ok(None)
            }
        }
    }
}

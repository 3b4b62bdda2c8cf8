use crate::config::ExchangeConfig;
use crate::error::{AppError, Result};
use crate::services::retry::RetryPolicy;
use crate::types::{RawKline, StreamEvent};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const LIQUIDATION_STREAM: &str = "forceOrder";

/// Combined-stream envelope: `{"stream": "btcusdt@kline_1m", "data": {...}}`.
#[derive(Debug, Deserialize)]
struct CombinedMessage {
    stream: String,
    data: Value,
}

#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "k")]
    kline: RawKline,
}

/// Reply to a server ping. `false` means the socket can no longer be written.
async fn answer_ping<S>(write: &mut S, payload: Vec<u8>) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    match write.send(Message::Pong(payload)).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to answer Binance ping: {}", e);
            false
        }
    }
}

/// Decode one combined-stream text frame.
///
/// Kline frames for `timeframe` become [`StreamEventKind::Kline`](crate::types::StreamEventKind)
/// events, liquidation frames become open-interest proxies. Anything else is `None`.
pub fn decode_message(text: &str, timeframe: &str) -> Option<StreamEvent> {
    let message: CombinedMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!("Ignoring non-stream frame: {}", e);
            return None;
        }
    };

    let (symbol, channel) = message.stream.split_once('@')?;
    if symbol.is_empty() {
        return None;
    }
    let symbol = symbol.to_uppercase();

    if channel == LIQUIDATION_STREAM {
        return Some(StreamEvent::open_interest_proxy(symbol));
    }

    if channel.strip_prefix("kline_") == Some(timeframe) {
        return match serde_json::from_value::<KlineEvent>(message.data) {
            Ok(event) if event.event_type == "kline" => {
                Some(StreamEvent::kline(symbol, event.kline))
            }
            Ok(event) => {
                debug!("Unexpected event type {} on {}", event.event_type, message.stream);
                None
            }
            Err(e) => {
                warn!("Malformed kline payload for {}: {}", symbol, e);
                None
            }
        };
    }

    debug!("Ignoring stream {}", message.stream);
    None
}

/// How a single websocket session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// Upstream closed or errored after `frames` text frames were delivered.
    Disconnected { frames: u64 },
    /// Nobody is listening any more.
    ReceiverClosed,
}

/// Binance futures combined stream (klines and liquidations) for a symbol set.
pub struct BinanceStream {
    ws_url: String,
    symbols: Vec<String>,
    timeframe: String,
    read_timeout: Duration,
    backoff: RetryPolicy,
}

impl BinanceStream {
    pub fn new(config: &ExchangeConfig, symbols: Vec<String>) -> Self {
        Self {
            ws_url: config.ws_url.trim_end_matches('/').to_string(),
            symbols,
            timeframe: config.timeframe.clone(),
            read_timeout: config.stream_read_timeout,
            backoff: RetryPolicy::new(
                config.max_reconnect_attempts,
                config.reconnect_delay,
                config.max_reconnect_delay,
            ),
        }
    }

    /// Stream names, two per symbol.
    pub fn stream_names(&self) -> Vec<String> {
        self.symbols
            .iter()
            .flat_map(|s| {
                let lower = s.to_lowercase();
                [
                    format!("{}@kline_{}", lower, self.timeframe),
                    format!("{}@{}", lower, LIQUIDATION_STREAM),
                ]
            })
            .collect()
    }

    pub fn url(&self) -> String {
        format!("{}/stream?streams={}", self.ws_url, self.stream_names().join("/"))
    }

    /// Forward events into `sender` until the receiver goes away.
    ///
    /// Reconnects with capped exponential backoff. The attempt counter resets once a
    /// session delivers data; exhausting it is fatal.
    pub async fn run(&self, sender: mpsc::Sender<StreamEvent>) -> Result<()> {
        let max_attempts = self.backoff.max_attempts.max(1);
        let mut failures: u32 = 0;

        loop {
            match self.run_connection(&sender).await {
                Ok(SessionEnd::ReceiverClosed) => {
                    info!("Event receiver closed, stopping Binance stream");
                    return Ok(());
                }
                Ok(SessionEnd::Disconnected { frames }) => {
                    warn!("Binance stream disconnected after {} frames", frames);
                    if frames > 0 {
                        failures = 0;
                    }
                }
                Err(e) => {
                    error!("Binance stream error: {}", e);
                }
            }

            failures += 1;
            if failures > max_attempts {
                error!("Giving up on Binance stream after {} reconnect attempts", max_attempts);
                return Err(AppError::ReconnectExhausted(max_attempts));
            }

            let delay = self.backoff.backoff(failures);
            warn!(
                "Reconnecting to Binance stream in {:?} (attempt {}/{})",
                delay, failures, max_attempts
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = sender.closed() => return Ok(()),
            }
        }
    }

    async fn run_connection(
        &self,
        sender: &mpsc::Sender<StreamEvent>,
    ) -> anyhow::Result<SessionEnd> {
        info!("Connecting to Binance stream ({} streams)", self.symbols.len() * 2);
        let (ws_stream, _) = connect_async(self.url()).await?;
        let (mut write, mut read) = ws_stream.split();
        info!("Connected to Binance stream");

        let mut frames: u64 = 0;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            frames += 1;
                            if let Some(event) = decode_message(&text, &self.timeframe) {
                                if sender.send(event).await.is_err() {
                                    return Ok(SessionEnd::ReceiverClosed);
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if !answer_ping(&mut write, data).await {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("Binance stream closed: {:?}", frame);
                            break;
                        }
                        Some(Err(e)) => {
                            error!("Binance stream read error: {}", e);
                            break;
                        }
                        None => break,
                        _ => {}
                    }
                }
                _ = tokio::time::sleep(self.read_timeout) => {
                    debug!("No stream data for {:?}, waiting again", self.read_timeout);
                }
                _ = sender.closed() => {
                    return Ok(SessionEnd::ReceiverClosed);
                }
            }
        }

        Ok(SessionEnd::Disconnected { frames })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::types::StreamEventKind;

    fn exchange_config() -> ExchangeConfig {
        ExchangeConfig {
            environment: Environment::Mainnet,
            api_key: None,
            rest_url: "https://fapi.binance.com".to_string(),
            ws_url: "wss://fstream.binance.com/".to_string(),
            timeframe: "1m".to_string(),
            kline_limit: 100,
            volume_threshold_usd: 200_000_000.0,
            symbols: vec![],
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_delay: Duration::from_secs(120),
            max_reconnect_attempts: 10,
            stream_read_timeout: Duration::from_secs(60),
            oi_poll_interval: None,
            request_timeout: Duration::from_secs(10),
            request_max_attempts: 3,
        }
    }

    const KLINE_FRAME: &str = r#"{
        "stream": "btcusdt@kline_1m",
        "data": {
            "e": "kline", "E": 1700000060001, "s": "BTCUSDT",
            "k": {
                "t": 1700000000000, "T": 1700000059999, "s": "BTCUSDT", "i": "1m",
                "o": "37000.10", "c": "37010.50", "h": "37020.00", "l": "36990.00",
                "v": "152.301", "n": 1200, "x": true, "q": "5634000.12"
            }
        }
    }"#;

    // =========================================================================
    // Stream Naming Tests
    // =========================================================================

    #[test]
    fn test_stream_names_and_url() {
        let stream = BinanceStream::new(
            &exchange_config(),
            vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
        );
        assert_eq!(
            stream.stream_names(),
            vec![
                "btcusdt@kline_1m",
                "btcusdt@forceOrder",
                "ethusdt@kline_1m",
                "ethusdt@forceOrder"
            ]
        );
        assert_eq!(
            stream.url(),
            "wss://fstream.binance.com/stream?streams=btcusdt@kline_1m/btcusdt@forceOrder/ethusdt@kline_1m/ethusdt@forceOrder"
        );
    }

    // =========================================================================
    // Decoding Tests
    // =========================================================================

    #[test]
    fn test_decode_closed_kline() {
        let event = decode_message(KLINE_FRAME, "1m").unwrap();
        assert_eq!(event.symbol, "BTCUSDT");
        match event.kind {
            StreamEventKind::Kline(kline) => {
                assert!(kline.closed);
                assert_eq!(kline.open_time, Some(1_700_000_000_000));
                assert_eq!(kline.close.as_deref(), Some("37010.50"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_kline_other_timeframe_ignored() {
        assert!(decode_message(KLINE_FRAME, "5m").is_none());
    }

    #[test]
    fn test_decode_liquidation_is_oi_proxy() {
        let frame = r#"{
            "stream": "ethusdt@forceOrder",
            "data": {"e": "forceOrder", "E": 1700000000000,
                     "o": {"s": "ETHUSDT", "S": "SELL", "q": "0.5", "p": "2000.1"}}
        }"#;
        assert_eq!(
            decode_message(frame, "1m"),
            Some(StreamEvent::open_interest_proxy("ETHUSDT"))
        );
    }

    #[test]
    fn test_decode_garbage() {
        assert!(decode_message("not json", "1m").is_none());
        assert!(decode_message(r#"{"result": null, "id": 1}"#, "1m").is_none());
        assert!(decode_message(r#"{"stream": "btcusdt", "data": {}}"#, "1m").is_none());
        assert!(decode_message(r#"{"stream": "@kline_1m", "data": {}}"#, "1m").is_none());
        let no_kline = r#"{"stream": "btcusdt@kline_1m", "data": {"e": "kline"}}"#;
        assert!(decode_message(no_kline, "1m").is_none());
    }

    #[test]
    fn test_decode_unclosed_kline_is_still_forwarded() {
        let frame = KLINE_FRAME.replace(r#""x": true"#, r#""x": false"#);
        let event = decode_message(&frame, "1m").unwrap();
        assert!(matches!(event.kind, StreamEventKind::Kline(ref k) if !k.closed));
    }

    #[tokio::test]
    async fn test_answer_ping_reports_dead_socket() {
        assert!(answer_ping(&mut futures_util::sink::drain(), vec![1]).await);

        let mut dead = Box::pin(futures_util::sink::unfold((), |_, _: Message| async {
            Err::<(), _>("broken pipe")
        }));
        assert!(!answer_ping(&mut dead, vec![1]).await);
    }

    #[tokio::test]
    async fn test_run_stops_when_receiver_dropped() {
        let mut config = exchange_config();
        config.ws_url = "ws://127.0.0.1:9".to_string();
        config.reconnect_delay = Duration::from_secs(3600);
        let stream = BinanceStream::new(&config, vec!["BTCUSDT".to_string()]);

        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);
        tokio_test::assert_ok!(stream.run(sender).await);
    }

    #[tokio::test]
    async fn test_run_gives_up_after_max_attempts() {
        let mut config = exchange_config();
        config.ws_url = "ws://127.0.0.1:9".to_string();
        config.reconnect_delay = Duration::from_millis(1);
        config.max_reconnect_delay = Duration::from_millis(2);
        config.max_reconnect_attempts = 2;
        let stream = BinanceStream::new(&config, vec!["BTCUSDT".to_string()]);

        let (sender, _receiver) = mpsc::channel(1);
        let err = stream.run(sender).await.unwrap_err();
        assert!(matches!(err, AppError::ReconnectExhausted(2)));
    }
}

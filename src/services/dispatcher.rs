//! Stream Dispatcher
//!
//! Single consumer of the inbound event channel. Owns the symbol store, the
//! signal engine and the cooldown gate, so every mutation happens in arrival
//! order on one task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::notify::{format, Notifier, TelegramNotifier};
use crate::services::cooldown::CooldownGate;
use crate::services::signals::SignalEngine;
use crate::services::symbol_store::{StoreError, SymbolStore};
use crate::sources::{BinanceFuturesClient, OpenInterestSource};
use crate::types::{Candle, RawKline, StreamEvent, StreamEventKind};

/// Running counters, reported in the heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub candles_processed: u64,
    /// Alerts handed to the notifier, delivered or not.
    pub signals_emitted: u64,
    /// Alerts withheld by the cooldown.
    pub signals_suppressed: u64,
    /// Malformed, unknown-symbol or out-of-order events.
    pub events_dropped: u64,
}

/// What happened to a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Candle update for a bar that is still open.
    Ignored,
    Dropped,
    /// Candle stored, no alert.
    CandleProcessed,
    SignalDelivered,
    /// Alert produced but the notifier failed or timed out.
    SignalUndelivered,
    SignalSuppressed,
    OpenInterestUpdated,
    OpenInterestUnchanged,
}

/// Knobs that are not part of the decision logic.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherSettings {
    pub cooldown: Duration,
    /// Bound for an open-interest refresh.
    pub oi_timeout: Duration,
    /// Bound for a notification, long enough for the notifier's own retries.
    pub notify_timeout: Duration,
    /// Proxy-triggered refreshes closer than this to the previous one are skipped.
    pub oi_min_refresh_ms: i64,
    pub heartbeat_interval: Option<Duration>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(300),
            oi_timeout: Duration::from_secs(30),
            notify_timeout: TelegramNotifier::delivery_budget(),
            oi_min_refresh_ms: 5_000,
            heartbeat_interval: None,
        }
    }
}

impl DispatcherSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cooldown: config.cooldown,
            oi_timeout: BinanceFuturesClient::request_budget(&config.exchange),
            notify_timeout: TelegramNotifier::delivery_budget(),
            oi_min_refresh_ms: config.oi_min_refresh_ms,
            heartbeat_interval: config.heartbeat_interval,
        }
    }
}

/// Routes stream events into the store and engine and forwards alerts.
pub struct Dispatcher {
    store: SymbolStore,
    engine: SignalEngine,
    cooldown: CooldownGate,
    oi_source: Arc<dyn OpenInterestSource>,
    notifier: Arc<dyn Notifier>,
    settings: DispatcherSettings,
    last_oi_refresh: HashMap<String, i64>,
    stats: DispatcherStats,
}

impl Dispatcher {
    pub fn new(
        store: SymbolStore,
        engine: SignalEngine,
        oi_source: Arc<dyn OpenInterestSource>,
        notifier: Arc<dyn Notifier>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            store,
            engine,
            cooldown: CooldownGate::new(settings.cooldown),
            oi_source,
            notifier,
            settings,
            last_oi_refresh: HashMap::new(),
            stats: DispatcherStats::default(),
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats
    }

    pub fn store(&self) -> &SymbolStore {
        &self.store
    }

    pub fn cooldown(&self) -> &CooldownGate {
        &self.cooldown
    }

    /// Consume events until every sender is gone.
    pub async fn run(&mut self, mut receiver: mpsc::Receiver<StreamEvent>) {
        info!("Dispatcher started for {} symbols", self.store.len());

        let mut heartbeat = self.settings.heartbeat_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                event = receiver.recv() => {
                    match event {
                        Some(event) => {
                            let now_ms = chrono::Utc::now().timestamp_millis();
                            self.handle_event(event, now_ms).await;
                        }
                        None => {
                            info!("Event channel closed, dispatcher stopping");
                            break;
                        }
                    }
                }
                _ = next_heartbeat(&mut heartbeat) => {
                    self.send_heartbeat().await;
                }
            }
        }

        info!(
            "Dispatcher stopped: {} candles, {} signals sent, {} suppressed, {} dropped",
            self.stats.candles_processed,
            self.stats.signals_emitted,
            self.stats.signals_suppressed,
            self.stats.events_dropped
        );
    }

    /// Process one event observed at `now_ms`.
    pub async fn handle_event(&mut self, event: StreamEvent, now_ms: i64) -> EventOutcome {
        let StreamEvent { symbol, kind } = event;
        match kind {
            StreamEventKind::Kline(kline) => self.handle_kline(&symbol, &kline, now_ms).await,
            StreamEventKind::OpenInterestProxy => self.handle_oi_proxy(&symbol, now_ms).await,
        }
    }

    async fn handle_kline(&mut self, symbol: &str, kline: &RawKline, now_ms: i64) -> EventOutcome {
        if !kline.closed {
            return EventOutcome::Ignored;
        }

        let candle = match Candle::try_from(kline) {
            Ok(candle) => candle,
            Err(e) => {
                warn!("Dropping malformed kline for {}: {}", symbol, e);
                self.stats.events_dropped += 1;
                return EventOutcome::Dropped;
            }
        };

        match self.store.append(symbol, candle) {
            Ok(()) => {}
            Err(StoreError::UnknownSymbol(_)) => {
                debug!("Dropping kline for unmonitored symbol {}", symbol);
                self.stats.events_dropped += 1;
                return EventOutcome::Dropped;
            }
            Err(e) => {
                warn!("{}", e);
                self.stats.events_dropped += 1;
                return EventOutcome::Dropped;
            }
        }
        self.stats.candles_processed += 1;

        let has_current_oi = self
            .store
            .open_interest(symbol)
            .map_or(false, |state| state.current.is_some());
        if !has_current_oi {
            self.refresh_open_interest(symbol, now_ms).await;
        }

        let (Some(snapshot), Some(open_interest)) =
            (self.store.snapshot(symbol), self.store.open_interest(symbol))
        else {
            return EventOutcome::CandleProcessed;
        };

        let Some(alert) = self.engine.evaluate(symbol, &snapshot, &open_interest) else {
            return EventOutcome::CandleProcessed;
        };

        if !self.cooldown.allow(symbol, now_ms) {
            self.stats.signals_suppressed += 1;
            info!(
                "{} signal for {} suppressed by cooldown ({:?} left)",
                alert.direction,
                symbol,
                self.cooldown.remaining(symbol, now_ms)
            );
            return EventOutcome::SignalSuppressed;
        }

        let strategy = self.engine.config();
        let text = format::signal_message(&alert, strategy.rsi_period, strategy.atr_period);
        let delivered = self.deliver(&text).await;

        self.cooldown.record(symbol, now_ms);
        self.stats.signals_emitted += 1;

        if delivered {
            EventOutcome::SignalDelivered
        } else {
            EventOutcome::SignalUndelivered
        }
    }

    async fn handle_oi_proxy(&mut self, symbol: &str, now_ms: i64) -> EventOutcome {
        if !self.store.contains(symbol) {
            debug!("Dropping open interest trigger for unmonitored symbol {}", symbol);
            self.stats.events_dropped += 1;
            return EventOutcome::Dropped;
        }

        if let Some(&last) = self.last_oi_refresh.get(symbol) {
            if now_ms.saturating_sub(last) < self.settings.oi_min_refresh_ms {
                debug!("Open interest for {} refreshed {}ms ago, skipping", symbol, now_ms - last);
                return EventOutcome::OpenInterestUnchanged;
            }
        }

        self.refresh_open_interest(symbol, now_ms).await
    }

    /// Pull a fresh reading and record it. A reading identical in time to the
    /// stored one is not a new observation.
    async fn refresh_open_interest(&mut self, symbol: &str, now_ms: i64) -> EventOutcome {
        self.last_oi_refresh.insert(symbol.to_string(), now_ms);

        let observation = match tokio::time::timeout(
            self.settings.oi_timeout,
            self.oi_source.refresh_open_interest(symbol),
        )
        .await
        {
            Ok(Some(observation)) => observation,
            Ok(None) => return EventOutcome::OpenInterestUnchanged,
            Err(_) => {
                warn!(
                    "Open interest refresh for {} timed out after {:?}",
                    symbol, self.settings.oi_timeout
                );
                return EventOutcome::OpenInterestUnchanged;
            }
        };

        let state = self.store.open_interest(symbol).unwrap_or_default();
        if state.current.is_some() && state.observed_at == Some(observation.observed_at) {
            debug!("Open interest for {} unchanged since {}", symbol, observation.observed_at);
            return EventOutcome::OpenInterestUnchanged;
        }

        match self
            .store
            .set_open_interest(symbol, observation.value, observation.observed_at)
        {
            Ok(()) => {
                debug!("Open interest for {}: {:.0}", symbol, observation.value);
                EventOutcome::OpenInterestUpdated
            }
            Err(e) => {
                warn!("{}", e);
                EventOutcome::OpenInterestUnchanged
            }
        }
    }

    async fn deliver(&self, text: &str) -> bool {
        let timeout = self.settings.notify_timeout;
        match tokio::time::timeout(timeout, self.notifier.notify(text)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("Failed to deliver notification: {}", e);
                false
            }
            Err(_) => {
                error!("Notification delivery timed out after {:?}", timeout);
                false
            }
        }
    }

    async fn send_heartbeat(&self) {
        let text = format::heartbeat_message(self.store.len(), &self.stats);
        debug!("Sending heartbeat");
        self.deliver(&text).await;
    }
}

async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use crate::notify::NotifyError;
    use crate::types::OpenInterestObservation;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedOpenInterest(Mutex<Vec<OpenInterestObservation>>);

    #[async_trait]
    impl OpenInterestSource for FixedOpenInterest {
        async fn refresh_open_interest(&self, _symbol: &str) -> Option<OpenInterestObservation> {
            let mut queue = self.0.lock().unwrap();
            if queue.is_empty() {
                None
            } else {
                Some(queue.remove(0))
            }
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl Notifier for Recorder {
        async fn notify(&self, text: &str) -> Result<(), NotifyError> {
            self.0.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn dispatcher(readings: Vec<(f64, i64)>) -> (Dispatcher, Arc<Recorder>) {
        let mut store = SymbolStore::new(50);
        store.register("BTCUSDT", Vec::new());
        let source = FixedOpenInterest(Mutex::new(
            readings
                .into_iter()
                .map(|(value, observed_at)| OpenInterestObservation { value, observed_at })
                .collect(),
        ));
        let notifier = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(
            store,
            SignalEngine::new(StrategyConfig::default()),
            Arc::new(source),
            notifier.clone(),
            DispatcherSettings::default(),
        );
        (dispatcher, notifier)
    }

    fn kline(open_time: i64, close: &str, closed: bool) -> RawKline {
        RawKline {
            open_time: Some(open_time),
            open: Some(close.to_string()),
            high: Some(close.to_string()),
            low: Some(close.to_string()),
            close: Some(close.to_string()),
            volume: Some("10".to_string()),
            closed,
        }
    }

    #[tokio::test]
    async fn test_unclosed_kline_ignored() {
        let (mut dispatcher, _) = dispatcher(vec![]);
        let outcome = dispatcher
            .handle_event(StreamEvent::kline("BTCUSDT", kline(0, "100", false)), 0)
            .await;
        assert_eq!(outcome, EventOutcome::Ignored);
        assert_eq!(dispatcher.store().history("BTCUSDT").unwrap().len(), 0);
        assert_eq!(dispatcher.stats(), DispatcherStats::default());
    }

    #[tokio::test]
    async fn test_malformed_kline_dropped() {
        let (mut dispatcher, _) = dispatcher(vec![]);
        let outcome = dispatcher
            .handle_event(StreamEvent::kline("BTCUSDT", kline(0, "abc", true)), 0)
            .await;
        assert_eq!(outcome, EventOutcome::Dropped);
        assert_eq!(dispatcher.stats().events_dropped, 1);
    }

    #[tokio::test]
    async fn test_unknown_symbol_dropped() {
        let (mut dispatcher, _) = dispatcher(vec![]);
        let outcome = dispatcher
            .handle_event(StreamEvent::kline("DOGEUSDT", kline(0, "0.1", true)), 0)
            .await;
        assert_eq!(outcome, EventOutcome::Dropped);

        let outcome = dispatcher
            .handle_event(StreamEvent::open_interest_proxy("DOGEUSDT"), 0)
            .await;
        assert_eq!(outcome, EventOutcome::Dropped);
        assert_eq!(dispatcher.stats().events_dropped, 2);
    }

    #[tokio::test]
    async fn test_first_candle_fetches_missing_open_interest() {
        let (mut dispatcher, _) = dispatcher(vec![(1_000.0, 1), (1_050.0, 2)]);

        let outcome = dispatcher
            .handle_event(StreamEvent::kline("BTCUSDT", kline(0, "100", true)), 10)
            .await;
        assert_eq!(outcome, EventOutcome::CandleProcessed);
        let state = dispatcher.store().open_interest("BTCUSDT").unwrap();
        assert_eq!(state.current, Some(1_000.0));
        assert_eq!(state.previous, None);

        // Current value present: the next candle leaves open interest alone.
        dispatcher
            .handle_event(StreamEvent::kline("BTCUSDT", kline(60_000, "101", true)), 20)
            .await;
        let state = dispatcher.store().open_interest("BTCUSDT").unwrap();
        assert_eq!(state.current, Some(1_000.0));
        assert_eq!(dispatcher.stats().candles_processed, 2);
    }

    #[tokio::test]
    async fn test_proxy_refresh_debounced() {
        let (mut dispatcher, _) = dispatcher(vec![(1_000.0, 1), (1_050.0, 2), (1_100.0, 3)]);

        let proxy = || StreamEvent::open_interest_proxy("BTCUSDT");
        assert_eq!(
            dispatcher.handle_event(proxy(), 0).await,
            EventOutcome::OpenInterestUpdated
        );
        assert_eq!(
            dispatcher.handle_event(proxy(), 4_999).await,
            EventOutcome::OpenInterestUnchanged
        );
        assert_eq!(
            dispatcher.handle_event(proxy(), 5_000).await,
            EventOutcome::OpenInterestUpdated
        );

        let state = dispatcher.store().open_interest("BTCUSDT").unwrap();
        assert_eq!(state.previous, Some(1_000.0));
        assert_eq!(state.current, Some(1_050.0));
    }

    #[tokio::test]
    async fn test_repeated_reading_is_not_a_new_observation() {
        let (mut dispatcher, _) = dispatcher(vec![(1_000.0, 7), (1_000.0, 7)]);
        dispatcher
            .handle_event(StreamEvent::open_interest_proxy("BTCUSDT"), 0)
            .await;
        let outcome = dispatcher
            .handle_event(StreamEvent::open_interest_proxy("BTCUSDT"), 10_000)
            .await;
        assert_eq!(outcome, EventOutcome::OpenInterestUnchanged);
        assert_eq!(
            dispatcher.store().open_interest("BTCUSDT").unwrap().previous,
            None
        );
    }

    #[tokio::test]
    async fn test_run_stops_when_channel_closes() {
        let (mut dispatcher, _) = dispatcher(vec![]);
        let (sender, receiver) = mpsc::channel(4);
        sender
            .send(StreamEvent::kline("BTCUSDT", kline(0, "100", true)))
            .await
            .unwrap();
        drop(sender);

        dispatcher.run(receiver).await;
        assert_eq!(dispatcher.stats().candles_processed, 1);
    }

    #[test]
    fn test_settings_from_config_budgets() {
        let mut config = Config::from_env();
        config.exchange.request_timeout = Duration::from_secs(10);
        config.exchange.request_max_attempts = 3;
        config.oi_min_refresh_ms = 1_234;
        let settings = DispatcherSettings::from_config(&config);

        // 3 x 10s plus 0.5s and 1s of backoff
        assert_eq!(settings.oi_timeout, Duration::from_millis(31_500));
        // Room for at least one full rate-limit wait on every attempt.
        assert_eq!(settings.notify_timeout, TelegramNotifier::delivery_budget());
        assert!(settings.notify_timeout > Duration::from_secs(180));
        assert_eq!(settings.oi_min_refresh_ms, 1_234);
    }

    #[tokio::test]
    async fn test_slow_notifier_within_budget_is_delivered() {
        struct Slow;

        #[async_trait]
        impl Notifier for Slow {
            async fn notify(&self, _text: &str) -> Result<(), NotifyError> {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            }
        }

        let mut store = SymbolStore::new(50);
        store.register("BTCUSDT", Vec::new());
        let dispatcher = Dispatcher::new(
            store,
            SignalEngine::new(StrategyConfig::default()),
            Arc::new(FixedOpenInterest(Mutex::new(Vec::new()))),
            Arc::new(Slow),
            DispatcherSettings {
                oi_timeout: Duration::from_millis(1),
                notify_timeout: Duration::from_secs(5),
                ..DispatcherSettings::default()
            },
        );
        assert!(dispatcher.deliver("hello").await);
    }
}

use std::sync::Arc;

use scalpwatch::config::Config;
use scalpwatch::error::{AppError, Result};
use scalpwatch::notify::{format, Notifier, TelegramNotifier};
use scalpwatch::services::bootstrap;
use scalpwatch::services::{Dispatcher, DispatcherSettings, SignalEngine};
use scalpwatch::sources::{BinanceFuturesClient, BinanceStream, OpenInterestPoller};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Buffered inbound events between the stream tasks and the dispatcher.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scalpwatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(AppError::from(e).into());
    }

    let strategy = &config.strategy;
    info!(
        "Starting scalpwatch on {} ({} klines)",
        config.exchange.environment.name(),
        config.exchange.timeframe
    );
    info!(
        "Strategy: RSI({}) {}/{}, ATR({}), min OI change {}%, min volume {}x, trend filter {:?}",
        strategy.rsi_period,
        strategy.rsi_oversold,
        strategy.rsi_overbought,
        strategy.atr_period,
        strategy.min_oi_change_percent,
        strategy.min_volume_multiplier,
        strategy.trend_filter
    );

    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(&config.telegram));
    let source = Arc::new(BinanceFuturesClient::new(&config.exchange));

    send(notifier.as_ref(), &format::startup_message()).await;

    let result = tokio::select! {
        result = run(&config, source, notifier.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Stopped manually");
            send(notifier.as_ref(), &format::stopped_message()).await;
            return Ok(());
        }
    };

    match result {
        Ok(()) => {
            info!("All event producers finished, shutting down");
            Ok(())
        }
        Err(AppError::NoSymbols) => {
            warn!("No symbols to monitor");
            send(notifier.as_ref(), &format::no_symbols_message()).await;
            Err(AppError::NoSymbols.into())
        }
        Err(e) => {
            error!("Critical error: {}", e);
            send(notifier.as_ref(), &format::critical_message(&e.to_string())).await;
            Err(e.into())
        }
    }
}

/// Discover symbols, seed history, then stream until a fatal error.
async fn run(
    config: &Config,
    source: Arc<BinanceFuturesClient>,
    notifier: Arc<dyn Notifier>,
) -> Result<()> {
    let symbols = bootstrap::resolve_symbols(source.as_ref(), &config.exchange.symbols).await?;
    let store = bootstrap::seed_store(source.as_ref(), &symbols, config.history_capacity).await?;

    let active = store.symbols();
    info!("Monitoring {} symbols: {}", active.len(), active.join(", "));
    send(notifier.as_ref(), &format::monitoring_message(&active)).await;

    let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let stream = BinanceStream::new(&config.exchange, active.clone());
    let stream_sender = sender.clone();
    let stream_task = tokio::spawn(async move { stream.run(stream_sender).await });

    if let Some(interval) = config.exchange.oi_poll_interval {
        let poller = OpenInterestPoller::new(active.clone(), interval);
        tokio::spawn(poller.run(sender.clone()));
    }
    drop(sender);

    let mut dispatcher = Dispatcher::new(
        store,
        SignalEngine::new(config.strategy.clone()),
        source,
        notifier,
        DispatcherSettings::from_config(config),
    );

    tokio::select! {
        _ = dispatcher.run(receiver) => Ok(()),
        joined = stream_task => match joined {
            Ok(result) => result,
            Err(e) => Err(AppError::Anyhow(anyhow::anyhow!("stream task failed: {}", e))),
        },
    }
}

/// Best-effort lifecycle notification.
async fn send(notifier: &dyn Notifier, text: &str) {
    if let Err(e) = notifier.notify(text).await {
        error!("Failed to send notification: {}", e);
    }
}

use crate::types::StreamEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Periodically asks the dispatcher to refresh open interest for every symbol.
///
/// The first round fires immediately so current values exist before the first
/// candle closes.
pub struct OpenInterestPoller {
    symbols: Vec<String>,
    interval: Duration,
}

impl OpenInterestPoller {
    pub fn new(symbols: Vec<String>, interval: Duration) -> Self {
        Self { symbols, interval }
    }

    /// Run until the receiving side of `sender` is dropped.
    pub async fn run(self, sender: mpsc::Sender<StreamEvent>) {
        info!(
            "Starting open interest polling for {} symbols every {:?}",
            self.symbols.len(),
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for symbol in &self.symbols {
                        let event = StreamEvent::open_interest_proxy(symbol.as_str());
                        if sender.send(event).await.is_err() {
                            debug!("Event receiver closed, stopping open interest polling");
                            return;
                        }
                    }
                }
                _ = sender.closed() => {
                    debug!("Event receiver closed, stopping open interest polling");
                    return;
                }
            }
        }
    }
}

//! Per-symbol alert cooldown.

use std::collections::HashMap;
use std::time::Duration;

/// Per-symbol alert throttle.
///
/// Entries are created on the first recorded alert and live for the whole process.
#[derive(Debug)]
pub struct CooldownGate {
    window_ms: i64,
    last_alert: HashMap<String, i64>,
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
            last_alert: HashMap::new(),
        }
    }

    /// Whether an alert for `symbol` may go out at `now_ms`.
    pub fn allow(&self, symbol: &str, now_ms: i64) -> bool {
        match self.last_alert.get(symbol) {
            Some(&last) => now_ms.saturating_sub(last) >= self.window_ms,
            None => true,
        }
    }

    /// Mark an alert as sent at `now_ms`.
    pub fn record(&mut self, symbol: &str, now_ms: i64) {
        self.last_alert.insert(symbol.to_string(), now_ms);
    }

    /// Time of the last recorded alert.
    pub fn last_alert(&self, symbol: &str) -> Option<i64> {
        self.last_alert.get(symbol).copied()
    }

    /// Remaining suppression time for `symbol` at `now_ms`.
    pub fn remaining(&self, symbol: &str, now_ms: i64) -> Duration {
        self.last_alert
            .get(symbol)
            .map(|&last| {
                let left = self.window_ms - now_ms.saturating_sub(last);
                Duration::from_millis(left.max(0) as u64)
            })
            .unwrap_or(Duration::ZERO)
    }
}

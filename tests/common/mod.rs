//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use scalpwatch::notify::{Notifier, NotifyError};
use scalpwatch::sources::OpenInterestSource;
use scalpwatch::types::{Candle, OpenInterestObservation, RawKline};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub const MINUTE: i64 = 60_000;
pub const BASE_VOLUME: f64 = 100.0;
/// Volume that clears the default 1.2x multiplier without reaching 2x.
pub const SPIKE_VOLUME: f64 = 150.0;

pub fn candle(index: usize, close: f64, volume: f64) -> Candle {
    Candle {
        timestamp: index as i64 * MINUTE,
        open: close,
        high: close + 0.5,
        low: close - 0.5,
        close,
        volume,
    }
}

/// Candles at base volume with the last one spiking.
pub fn candles_with_spike(closes: &[f64], last_volume: f64) -> Vec<Candle> {
    let last = closes.len().saturating_sub(1);
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let volume = if i == last { last_volume } else { BASE_VOLUME };
            candle(i, close, volume)
        })
        .collect()
}

/// 30 closes: flat at 100, then a drop that levels off around 80.
pub fn gentle_bounce_closes() -> Vec<f64> {
    let mut closes = vec![100.0; 22];
    closes.extend_from_slice(&[95.0, 90.0, 86.0, 83.0, 81.0, 80.4, 80.2, 80.0]);
    closes
}

pub fn closed_kline(candle: &Candle) -> RawKline {
    RawKline {
        open_time: Some(candle.timestamp),
        open: Some(candle.open.to_string()),
        high: Some(candle.high.to_string()),
        low: Some(candle.low.to_string()),
        close: Some(candle.close.to_string()),
        volume: Some(candle.volume.to_string()),
        closed: true,
    }
}

/// Hands out queued readings, then nothing.
#[derive(Default)]
pub struct ScriptedOpenInterest {
    readings: Mutex<VecDeque<OpenInterestObservation>>,
    calls: Mutex<u32>,
}

impl ScriptedOpenInterest {
    pub fn new(readings: &[(f64, i64)]) -> Self {
        Self {
            readings: Mutex::new(
                readings
                    .iter()
                    .map(|&(value, observed_at)| OpenInterestObservation { value, observed_at })
                    .collect(),
            ),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl OpenInterestSource for ScriptedOpenInterest {
    async fn refresh_open_interest(&self, _symbol: &str) -> Option<OpenInterestObservation> {
        *self.calls.lock().unwrap() += 1;
        self.readings.lock().unwrap().pop_front()
    }
}

/// Records every message; optionally fails each delivery.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            failing: AtomicBool::new(true),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        self.messages.lock().unwrap().push(text.to_string());
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Api {
                status: 500,
                description: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

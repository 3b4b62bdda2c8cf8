//! Average True Range (ATR) indicator.

/// ATR (Average True Range) at the last bar.
///
/// Measures market volatility by smoothing the true ranges:
/// TR = max(High-Low, |High-PrevClose|, |Low-PrevClose|)
///
/// The first bar has no previous close, so its TR is High-Low. Smoothing is an
/// exponential moving average with alpha = `1 / period`, seeded with the first
/// TR and without bias correction.
///
/// Returns `NaN` with fewer than `period` bars, mismatched input lengths or a
/// zero period.
pub fn average_true_range(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> f64 {
    let len = closes.len();
    if period == 0 || highs.len() != len || lows.len() != len || len < period {
        return f64::NAN;
    }

    let alpha = 1.0 / period as f64;
    let mut atr = highs[0] - lows[0];

    for i in 1..len {
        let tr = true_range(highs[i], lows[i], closes[i - 1]);
        atr = (1.0 - alpha) * atr + alpha * tr;
    }

    atr
}

/// Calculate True Range.
pub fn true_range(high: f64, low: f64, previous_close: f64) -> f64 {
    let hl = high - low;
    let hc = (high - previous_close).abs();
    let lc = (low - previous_close).abs();
    hl.max(hc).max(lc)
}

//! Relative Strength Index (RSI) indicator.

/// RSI (Relative Strength Index) of the last close in `closes`.
///
/// Measures momentum by comparing the magnitude of recent gains to recent losses.
/// Gains and losses are averaged with an adjusted exponential mean
/// (center of mass `period - 1`, i.e. alpha = `1 / period`) over the whole
/// sequence. The first position has no predecessor and counts as a zero move.
///
/// Values range from 0-100:
/// - Below 30: Oversold (potential buy signal)
/// - Above 70: Overbought (potential sell signal)
///
/// Returns `NaN` with fewer than `period + 1` closes. A flat market (no gains
/// and no losses) yields 50, and a market without losses yields 100.
pub fn relative_strength_index(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period + 1 {
        return f64::NAN;
    }

    let decay = 1.0 - 1.0 / period as f64;
    let mut gain = AdjustedMean::new(decay);
    let mut loss = AdjustedMean::new(decay);

    gain.push(0.0);
    loss.push(0.0);
    for pair in closes.windows(2) {
        let change = pair[1] - pair[0];
        gain.push(change.max(0.0));
        loss.push((-change).max(0.0));
    }

    let avg_gain = gain.value();
    let avg_loss = loss.value();

    if avg_loss == 0.0 {
        return if avg_gain > 0.0 { 100.0 } else { 50.0 };
    }

    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// Bias-corrected exponential mean: weights `decay^k` for the value `k` steps back,
/// normalised by the sum of weights.
struct AdjustedMean {
    decay: f64,
    weighted_sum: f64,
    weight_total: f64,
}

impl AdjustedMean {
    fn new(decay: f64) -> Self {
        Self {
            decay,
            weighted_sum: 0.0,
            weight_total: 0.0,
        }
    }

    fn push(&mut self, value: f64) {
        self.weighted_sum = self.weighted_sum * self.decay + value;
        self.weight_total = self.weight_total * self.decay + 1.0;
    }

    fn value(&self) -> f64 {
        self.weighted_sum / self.weight_total
    }
}

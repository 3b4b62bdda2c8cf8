//! Multi-factor signal decision pipeline.
//!
//! Runs once per closed candle on a read-only snapshot of the symbol window:
//! indicators, open-interest growth, volume strength, direction, trend
//! confirmation, volatility-adjusted risk levels and a 1-5 strength score.

use super::indicators::{average_true_range, relative_strength_index};
use crate::config::{StrategyConfig, TrendFilter};
use crate::types::{
    Candle, OpenInterestState, SignalAlert, SignalDirection, StrengthFactor, VolatilityTier,
};
use tracing::{debug, info};

/// Trailing candles used for the volume average.
pub const VOLUME_WINDOW: usize = 20;
/// Trailing candles used for trend confirmation.
pub const TREND_WINDOW: usize = 5;
/// Trailing candles used for the volatility range.
pub const VOLATILITY_WINDOW: usize = 20;

/// Largest adverse move over two bars still accepted as a confirmed trend.
const TREND_TOLERANCE: f64 = 0.01;

const HIGH_VOLATILITY: f64 = 0.05;
const MEDIUM_VOLATILITY: f64 = 0.02;
const HIGH_VOLATILITY_MULTIPLIERS: (f64, f64) = (2.0, 2.5);
const LOW_VOLATILITY_MULTIPLIERS: (f64, f64) = (1.2, 1.8);

const EXTREME_RSI_LOW: f64 = 25.0;
const EXTREME_RSI_HIGH: f64 = 75.0;
const STRONG_OI_CHANGE_PERCENT: f64 = 5.0;
const HIGH_VOLUME_RATIO: f64 = 2.0;

const MIN_STRENGTH: u8 = 1;
const MAX_STRENGTH: u8 = 5;

/// Result of the volume filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeCheck {
    pub strong: bool,
    /// Last volume over the trailing mean (1.0 when not computable).
    pub ratio: f64,
}

/// Volatility tier and the ATR multipliers it selects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskProfile {
    pub tier: VolatilityTier,
    pub volatility: Option<f64>,
    pub stop_multiplier: f64,
    pub take_multiplier: f64,
}

/// Percent change of open interest, 0 when either side is missing or the base is zero.
pub fn oi_change_percent(current: Option<f64>, previous: Option<f64>) -> f64 {
    match (current, previous) {
        (Some(current), Some(previous)) if previous != 0.0 => {
            (current - previous) / previous * 100.0
        }
        _ => 0.0,
    }
}

/// Compare the last volume with the mean of the trailing window (which includes it).
///
/// With fewer than [`VOLUME_WINDOW`] candles, or a zero mean, the filter passes.
pub fn volume_strength(candles: &[Candle], multiplier: f64) -> VolumeCheck {
    let pass = VolumeCheck {
        strong: true,
        ratio: 1.0,
    };
    if candles.len() < VOLUME_WINDOW {
        return pass;
    }

    let recent = &candles[candles.len() - VOLUME_WINDOW..];
    let avg_volume = recent.iter().map(|c| c.volume).sum::<f64>() / VOLUME_WINDOW as f64;
    if avg_volume == 0.0 {
        return pass;
    }

    let last_volume = recent[VOLUME_WINDOW - 1].volume;
    let ratio = last_volume / avg_volume;
    debug!(
        "Volume analysis: last={:.0}, avg={:.0}, ratio={:.2}x",
        last_volume, avg_volume, ratio
    );

    VolumeCheck {
        strong: ratio >= multiplier,
        ratio,
    }
}

/// Check that the last bars do not contradict the intended direction.
///
/// LONG needs no more than a 1% drop over two bars and a close at or above the
/// previous low; SHORT mirrors this. Passes with fewer than [`TREND_WINDOW`] candles.
pub fn trend_confirmed(candles: &[Candle], direction: SignalDirection) -> bool {
    if candles.len() < TREND_WINDOW {
        return true;
    }

    let n = candles.len();
    let last = &candles[n - 1];
    let previous = &candles[n - 2];
    let reference_close = candles[n - 3].close;

    let momentum = if reference_close != 0.0 {
        (last.close - reference_close) / reference_close
    } else {
        0.0
    };

    let confirmed = match direction {
        SignalDirection::Long => momentum > -TREND_TOLERANCE && last.close >= previous.low,
        SignalDirection::Short => momentum < TREND_TOLERANCE && last.close <= previous.high,
    };

    debug!(
        "Trend confirmation for {}: {} (momentum: {:.3})",
        direction, confirmed, momentum
    );
    confirmed
}

/// Select ATR multipliers from the trailing price range.
pub fn risk_profile(candles: &[Candle], base_stop: f64, base_take: f64) -> RiskProfile {
    let insufficient = RiskProfile {
        tier: VolatilityTier::Insufficient,
        volatility: None,
        stop_multiplier: base_stop,
        take_multiplier: base_take,
    };
    if candles.len() < VOLATILITY_WINDOW {
        return insufficient;
    }

    let recent = &candles[candles.len() - VOLATILITY_WINDOW..];
    let max_high = recent.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let min_low = recent.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let avg_close = recent.iter().map(|c| c.close).sum::<f64>() / VOLATILITY_WINDOW as f64;
    if avg_close <= 0.0 {
        return insufficient;
    }

    let volatility = (max_high - min_low) / avg_close;
    let (tier, (stop_multiplier, take_multiplier)) = if volatility > HIGH_VOLATILITY {
        (VolatilityTier::High, HIGH_VOLATILITY_MULTIPLIERS)
    } else if volatility > MEDIUM_VOLATILITY {
        (VolatilityTier::Medium, (base_stop, base_take))
    } else {
        (VolatilityTier::Low, LOW_VOLATILITY_MULTIPLIERS)
    };

    debug!(
        "Volatility analysis: {} ({:.3}), multipliers: SL={}, TP={}",
        tier.label(),
        volatility,
        stop_multiplier,
        take_multiplier
    );

    RiskProfile {
        tier,
        volatility: Some(volatility),
        stop_multiplier,
        take_multiplier,
    }
}

/// Stop loss and take profit around `entry`.
pub fn risk_levels(
    direction: SignalDirection,
    entry: f64,
    atr: f64,
    profile: &RiskProfile,
) -> (f64, f64) {
    let stop_distance = profile.stop_multiplier * atr;
    let take_distance = profile.take_multiplier * atr;
    match direction {
        SignalDirection::Long => (entry - stop_distance, entry + take_distance),
        SignalDirection::Short => (entry + stop_distance, entry - take_distance),
    }
}

/// Score a signal from 1 to 5 and list the contributing factors.
///
/// An unconfirmed trend costs one point before clamping.
pub fn signal_strength(
    rsi: f64,
    oi_change_percent: f64,
    volume_ratio: f64,
    trend_confirmed: bool,
    config: &StrategyConfig,
) -> (u8, Vec<StrengthFactor>) {
    let mut strength: u8 = 0;
    let mut factors = Vec::new();

    if rsi <= EXTREME_RSI_LOW || rsi >= EXTREME_RSI_HIGH {
        strength += 2;
        factors.push(StrengthFactor::ExtremeRsi);
    } else if rsi <= config.rsi_oversold || rsi >= config.rsi_overbought {
        strength += 1;
        factors.push(StrengthFactor::RsiSignal);
    }

    if oi_change_percent >= STRONG_OI_CHANGE_PERCENT {
        strength += 2;
        factors.push(StrengthFactor::StrongOiGrowth);
    } else if oi_change_percent >= config.min_oi_change_percent {
        strength += 1;
        factors.push(StrengthFactor::OiGrowth);
    }

    if volume_ratio >= HIGH_VOLUME_RATIO {
        strength += 1;
        factors.push(StrengthFactor::HighVolume);
    }

    if !trend_confirmed {
        strength = strength.saturating_sub(1);
        factors.push(StrengthFactor::WeakTrend);
    }

    (strength.clamp(MIN_STRENGTH, MAX_STRENGTH), factors)
}

/// Stateless decision pipeline configured with a [`StrategyConfig`].
#[derive(Debug, Clone)]
pub struct SignalEngine {
    config: StrategyConfig,
}

impl SignalEngine {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Evaluate the latest closed candle of `candles` for `symbol`.
    ///
    /// Returns `None` when history is short, indicators are undefined, the market
    /// is flat, or the entry conditions do not line up.
    pub fn evaluate(
        &self,
        symbol: &str,
        candles: &[Candle],
        open_interest: &OpenInterestState,
    ) -> Option<SignalAlert> {
        let config = &self.config;
        if candles.len() < config.required_history() {
            debug!("Insufficient data for {}: {} candles", symbol, candles.len());
            return None;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();

        let rsi = relative_strength_index(&closes, config.rsi_period);
        let atr = average_true_range(&highs, &lows, &closes, config.atr_period);
        if rsi.is_nan() || atr.is_nan() || atr == 0.0 {
            debug!("Invalid indicators for {}. RSI: {}, ATR: {}", symbol, rsi, atr);
            return None;
        }

        let last = candles[candles.len() - 1];
        let oi_change = oi_change_percent(open_interest.current, open_interest.previous);
        let oi_grew = oi_change >= config.min_oi_change_percent;
        let volume = volume_strength(candles, config.min_volume_multiplier);

        debug!(
            "{} | Price: {:.4} | RSI: {:.2} | ATR: {:.6} | OI: {:+.2}% | Vol: {:.2}x",
            symbol, last.close, rsi, atr, oi_change, volume.ratio
        );

        let direction = if rsi < config.rsi_oversold && oi_grew && volume.strong {
            SignalDirection::Long
        } else if rsi > config.rsi_overbought && oi_grew && volume.strong {
            SignalDirection::Short
        } else {
            return None;
        };

        let confirmed = trend_confirmed(candles, direction);
        if !confirmed && config.trend_filter == TrendFilter::Gate {
            debug!("{} {} rejected: trend not confirmed", symbol, direction);
            return None;
        }

        let profile = risk_profile(
            candles,
            config.stop_loss_atr_multiplier,
            config.take_profit_atr_multiplier,
        );
        let (stop_loss, take_profit) = risk_levels(direction, last.close, atr, &profile);
        let (strength, strength_factors) =
            signal_strength(rsi, oi_change, volume.ratio, confirmed, config);

        info!(
            "{} signal generated for {} (strength: {}/5)",
            direction, symbol, strength
        );

        Some(SignalAlert {
            direction,
            symbol: symbol.to_string(),
            entry_price: last.close,
            rsi,
            atr,
            oi_change_percent: oi_change,
            volume_ratio: volume.ratio,
            volatility_tier: profile.tier,
            volatility: profile.volatility,
            stop_loss,
            take_profit,
            strength,
            strength_factors,
            timestamp: last.timestamp,
        })
    }
}

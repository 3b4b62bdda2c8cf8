use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of an emitted signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalDirection {
    Long,
    Short,
}

impl SignalDirection {
    /// Get display label for this direction.
    pub fn label(&self) -> &'static str {
        match self {
            SignalDirection::Long => "LONG",
            SignalDirection::Short => "SHORT",
        }
    }

    /// Colored marker used in notifications.
    pub fn emoji(&self) -> &'static str {
        match self {
            SignalDirection::Long => "🟢",
            SignalDirection::Short => "🔴",
        }
    }
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Volatility bucket of the trailing window, which selects the ATR multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityTier {
    /// Range above 5% of the mean close.
    High,
    /// Range between 2% and 5%.
    Medium,
    /// Range of 2% or less.
    Low,
    /// Fewer candles than the volatility window.
    Insufficient,
}

impl VolatilityTier {
    pub fn label(&self) -> &'static str {
        match self {
            VolatilityTier::High => "high",
            VolatilityTier::Medium => "medium",
            VolatilityTier::Low => "low",
            VolatilityTier::Insufficient => "insufficient data",
        }
    }
}

/// Contribution to the 1-5 strength score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrengthFactor {
    ExtremeRsi,
    RsiSignal,
    StrongOiGrowth,
    OiGrowth,
    HighVolume,
    WeakTrend,
}

impl StrengthFactor {
    pub fn label(&self) -> &'static str {
        match self {
            StrengthFactor::ExtremeRsi => "extreme RSI",
            StrengthFactor::RsiSignal => "RSI signal",
            StrengthFactor::StrongOiGrowth => "strong OI growth",
            StrengthFactor::OiGrowth => "OI growth",
            StrengthFactor::HighVolume => "high volume",
            StrengthFactor::WeakTrend => "weak trend",
        }
    }
}

/// A fully evaluated signal, ready to be formatted and delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalAlert {
    pub direction: SignalDirection,
    pub symbol: String,
    /// Close of the candle that triggered the signal.
    pub entry_price: f64,
    pub rsi: f64,
    pub atr: f64,
    pub oi_change_percent: f64,
    pub volume_ratio: f64,
    pub volatility_tier: VolatilityTier,
    /// Raw (max high - min low) / mean close ratio, when computed.
    pub volatility: Option<f64>,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// 1 to 5.
    pub strength: u8,
    pub strength_factors: Vec<StrengthFactor>,
    /// Open time of the triggering candle, epoch milliseconds.
    pub timestamp: i64,
}

impl SignalAlert {
    /// Absolute distance from entry to stop loss.
    pub fn risk(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs()
    }

    /// Absolute distance from entry to take profit.
    pub fn reward(&self) -> f64 {
        (self.take_profit - self.entry_price).abs()
    }

    /// Reward divided by risk, 0 when the stop sits on the entry.
    pub fn risk_reward_ratio(&self) -> f64 {
        let risk = self.risk();
        if risk > 0.0 {
            self.reward() / risk
        } else {
            0.0
        }
    }

    /// Factors joined for display, or "basic signal" when none apply.
    pub fn strength_description(&self) -> String {
        if self.strength_factors.is_empty() {
            return "basic signal".to_string();
        }
        self.strength_factors
            .iter()
            .map(StrengthFactor::label)
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(stop_loss: f64, take_profit: f64) -> SignalAlert {
        SignalAlert {
            direction: SignalDirection::Long,
            symbol: "BTCUSDT".to_string(),
            entry_price: 100.0,
            rsi: 24.0,
            atr: 2.0,
            oi_change_percent: 3.0,
            volume_ratio: 1.5,
            volatility_tier: VolatilityTier::Medium,
            volatility: Some(0.03),
            stop_loss,
            take_profit,
            strength: 4,
            strength_factors: vec![StrengthFactor::ExtremeRsi, StrengthFactor::OiGrowth],
            timestamp: 0,
        }
    }

    #[test]
    fn test_direction_labels() {
        assert_eq!(SignalDirection::Long.to_string(), "LONG");
        assert_eq!(SignalDirection::Short.label(), "SHORT");
        assert_eq!(
            serde_json::to_string(&SignalDirection::Short).unwrap(),
            "\"SHORT\""
        );
    }

    #[test]
    fn test_risk_reward_ratio() {
        let alert = alert(97.0, 104.0);
        assert!((alert.risk() - 3.0).abs() < 1e-12);
        assert!((alert.reward() - 4.0).abs() < 1e-12);
        assert!((alert.risk_reward_ratio() - 4.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_risk_reward_ratio_zero_risk() {
        assert_eq!(alert(100.0, 104.0).risk_reward_ratio(), 0.0);
    }

    #[test]
    fn test_strength_description() {
        assert_eq!(
            alert(97.0, 104.0).strength_description(),
            "extreme RSI + OI growth"
        );

        let mut basic = alert(97.0, 104.0);
        basic.strength_factors.clear();
        assert_eq!(basic.strength_description(), "basic signal");
    }

    #[test]
    fn test_volatility_tier_labels() {
        assert_eq!(VolatilityTier::High.label(), "high");
        assert_eq!(VolatilityTier::Insufficient.label(), "insufficient data");
    }
}

//! Signal detection.
//!
//! Indicator math lives in [`indicators`]; [`engine`] combines it with open
//! interest, volume and trend checks into a single decision per closed candle.

pub mod engine;
pub mod indicators;

pub use engine::{
    oi_change_percent, risk_levels, risk_profile, signal_strength, trend_confirmed,
    volume_strength, RiskProfile, SignalEngine, VolumeCheck,
};

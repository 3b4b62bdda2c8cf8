//! Technical indicator implementations.
//!
//! Pure functions over price slices ordered oldest-first. An undefined result
//! (not enough history) is reported as `f64::NAN`.

pub mod atr;
pub mod rsi;

pub use atr::{average_true_range, true_range};
pub use rsi::relative_strength_index;

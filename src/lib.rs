//! scalpwatch - real-time futures signal generator
//!
//! Streams closed candles and open-interest readings from Binance USDT-M futures,
//! keeps a rolling window per symbol and sends a Telegram alert when RSI, open
//! interest growth and volume line up.

pub mod config;
pub mod error;
pub mod notify;
pub mod services;
pub mod sources;
pub mod types;

pub use config::Config;
pub use error::{AppError, Result};
pub use types::*;

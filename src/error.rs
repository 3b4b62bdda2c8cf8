use crate::config::ConfigError;
use thiserror::Error;

/// Application error types.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("No symbols available to monitor")]
    NoSymbols,

    #[error("Stream reconnection failed after {0} attempts")]
    ReconnectExhausted(u32),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

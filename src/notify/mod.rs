//! Alert delivery.

pub mod format;
pub mod telegram;

pub use telegram::TelegramNotifier;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Delivery failures.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification API error ({status}): {description}")]
    Api { status: u16, description: String },

    #[error("Rate limited, retry after {0:?}")]
    RateLimited(Duration),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Sends a preformatted message to the user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<(), NotifyError>;
}

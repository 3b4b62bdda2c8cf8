use super::{Notifier, NotifyError};
use crate::config::TelegramConfig;
use crate::services::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const TELEGRAM_API_URL: &str = "https://api.telegram.org";
const PARSE_MODE: &str = "Markdown";

/// Upper bound for honouring a server supplied `retry_after`.
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);
/// Timeout for one `sendMessage` round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Map a Bot API reply onto success or a [`NotifyError`].
fn interpret_response(status: u16, body: &str) -> Result<(), NotifyError> {
    let parsed: Option<TelegramResponse> = serde_json::from_str(body).ok();

    if (200..300).contains(&status) && parsed.as_ref().map_or(true, |r| r.ok) {
        return Ok(());
    }

    if status == 429 {
        let retry_after = parsed
            .as_ref()
            .and_then(|r| r.parameters.as_ref())
            .and_then(|p| p.retry_after)
            .unwrap_or(1);
        return Err(NotifyError::RateLimited(Duration::from_secs(retry_after)));
    }

    let description = parsed
        .and_then(|r| r.description)
        .unwrap_or_else(|| body.chars().take(200).collect());
    Err(NotifyError::Api {
        status,
        description,
    })
}

/// Telegram Bot API notifier (`sendMessage`, Markdown).
pub struct TelegramNotifier {
    client: Client,
    endpoint: String,
    chat_id: String,
    retry: RetryPolicy,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Self {
        Self::with_api_url(config, TELEGRAM_API_URL)
    }

    /// Point the notifier at a different Bot API host.
    pub fn with_api_url(config: &TelegramConfig, api_url: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            endpoint: format!(
                "{}/bot{}/sendMessage",
                api_url.trim_end_matches('/'),
                config.bot_token
            ),
            chat_id: config.chat_id.clone(),
            retry: RetryPolicy::default(),
        }
    }

    /// Longest a single `notify` call can run: every attempt times out or is
    /// rate limited for the full capped wait, plus the backoff between attempts.
    pub fn delivery_budget() -> Duration {
        RetryPolicy::default().worst_case(REQUEST_TIMEOUT + MAX_RATE_LIMIT_WAIT)
    }

    async fn send_once(&self, text: &str) -> Result<(), NotifyError> {
        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
            parse_mode: PARSE_MODE,
            disable_web_page_preview: true,
        };

        let response = self.client.post(&self.endpoint).json(&request).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        match interpret_response(status, &body) {
            Err(NotifyError::RateLimited(wait)) => {
                let wait = wait.min(MAX_RATE_LIMIT_WAIT);
                warn!("Telegram rate limit hit, waiting {:?}", wait);
                tokio::time::sleep(wait).await;
                Err(NotifyError::RateLimited(wait))
            }
            other => other,
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        self.retry
            .run("Telegram sendMessage", || self.send_once(text))
            .await?;
        info!("Message sent to Telegram");
        debug!("Telegram message: {}", text);
        Ok(())
    }
}

use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const TESTNET_REST_URL: &str = "https://testnet.binancefuture.com";
const TESTNET_WS_URL: &str = "wss://stream.binancefuture.com";
const MAINNET_REST_URL: &str = "https://fapi.binance.com";
const MAINNET_WS_URL: &str = "wss://fstream.binance.com";

/// Candles kept beyond the seed size so the window is never starved.
const HISTORY_SAFETY_MARGIN: usize = 20;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variables: {0}")]
    MissingVariables(String),
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// Exchange environment selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Testnet,
    Mainnet,
}

impl Environment {
    /// Parse from string, anything other than "mainnet"/"production" is testnet.
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "mainnet" | "production" | "prod" => Environment::Mainnet,
            _ => Environment::Testnet,
        }
    }

    pub fn rest_url(&self) -> &'static str {
        match self {
            Environment::Testnet => TESTNET_REST_URL,
            Environment::Mainnet => MAINNET_REST_URL,
        }
    }

    pub fn ws_url(&self) -> &'static str {
        match self {
            Environment::Testnet => TESTNET_WS_URL,
            Environment::Mainnet => MAINNET_WS_URL,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Environment::Testnet => "testnet",
            Environment::Mainnet => "mainnet",
        }
    }
}

/// How the trend confirmation step participates in the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrendFilter {
    /// An unconfirmed trend rejects the signal.
    #[default]
    Gate,
    /// An unconfirmed trend only lowers the strength by one.
    Score,
}

impl TrendFilter {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "gate" | "hard" => Some(TrendFilter::Gate),
            "score" | "soft" => Some(TrendFilter::Score),
            _ => None,
        }
    }
}

/// Decision thresholds for the signal engine.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyConfig {
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub atr_period: usize,
    /// Minimum open-interest growth, percent.
    pub min_oi_change_percent: f64,
    /// Last volume over trailing mean needed to call volume strong.
    pub min_volume_multiplier: f64,
    /// Stop distance in ATRs for the medium volatility tier.
    pub stop_loss_atr_multiplier: f64,
    /// Target distance in ATRs for the medium volatility tier.
    pub take_profit_atr_multiplier: f64,
    pub trend_filter: TrendFilter,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            atr_period: 14,
            min_oi_change_percent: 2.0,
            min_volume_multiplier: 1.2,
            stop_loss_atr_multiplier: 1.5,
            take_profit_atr_multiplier: 2.0,
            trend_filter: TrendFilter::Gate,
        }
    }
}

impl StrategyConfig {
    /// Candles required before the engine evaluates anything.
    pub fn required_history(&self) -> usize {
        self.rsi_period.max(self.atr_period) + 1
    }
}

/// Binance futures connectivity.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub environment: Environment,
    /// Binance API key (optional, public endpoints work without).
    pub api_key: Option<String>,
    pub rest_url: String,
    pub ws_url: String,
    /// Kline interval, e.g. "1m".
    pub timeframe: String,
    /// Historical candles loaded per symbol at startup.
    pub kline_limit: usize,
    /// Minimum 24h quote volume in USD for automatic symbol selection.
    pub volume_threshold_usd: f64,
    /// Explicit symbol list (empty = discover all suitable symbols).
    pub symbols: Vec<String>,
    /// Base reconnect delay.
    pub reconnect_delay: Duration,
    /// Reconnect delay cap.
    pub max_reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    /// Silence on the stream after which the read is simply re-armed.
    pub stream_read_timeout: Duration,
    /// Open-interest pull interval per symbol (None = disabled).
    pub oi_poll_interval: Option<Duration>,
    /// Timeout for a single REST call.
    pub request_timeout: Duration,
    pub request_max_attempts: u32,
}

/// Telegram delivery target.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub telegram: TelegramConfig,
    pub strategy: StrategyConfig,
    /// Candles kept per symbol.
    pub history_capacity: usize,
    /// Minimum interval between alerts for one symbol.
    pub cooldown: Duration,
    /// Status message interval (None = disabled).
    pub heartbeat_interval: Option<Duration>,
    /// Proxy-triggered OI refreshes closer than this to the last reading are skipped.
    pub oi_min_refresh_ms: i64,
}

/// Read and parse an environment variable, falling back to `default` when it is
/// unset or unparsable.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(env_or(name, default))
}

/// Zero disables the interval.
fn env_optional_secs(name: &str, default: u64) -> Option<Duration> {
    match env_or(name, default) {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a comma separated symbol list into upper-case symbols.
pub fn parse_symbol_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let environment = Environment::from_str(
            &env::var("ENVIRONMENT").unwrap_or_else(|_| "testnet".to_string()),
        );

        let kline_limit: usize = env_or("KLINE_LIMIT", 100);

        let strategy = StrategyConfig {
            rsi_period: env_or("RSI_PERIOD", 14),
            rsi_oversold: env_or("RSI_OVERSOLD", 30.0),
            rsi_overbought: env_or("RSI_OVERBOUGHT", 70.0),
            atr_period: env_or("ATR_PERIOD", 14),
            min_oi_change_percent: env_or("MIN_OI_CHANGE_PERCENT", 2.0),
            min_volume_multiplier: env_or("MIN_VOLUME_MULTIPLIER", 1.2),
            stop_loss_atr_multiplier: env_or("STOP_LOSS_ATR_MULTIPLIER", 1.5),
            take_profit_atr_multiplier: env_or("TAKE_PROFIT_ATR_MULTIPLIER", 2.0),
            trend_filter: env::var("TREND_FILTER")
                .ok()
                .and_then(|v| TrendFilter::from_str(&v))
                .unwrap_or_default(),
        };

        Self {
            exchange: ExchangeConfig {
                environment,
                api_key: non_empty("BINANCE_API_KEY"),
                rest_url: env::var("BINANCE_REST_URL")
                    .unwrap_or_else(|_| environment.rest_url().to_string()),
                ws_url: env::var("BINANCE_WS_URL")
                    .unwrap_or_else(|_| environment.ws_url().to_string()),
                timeframe: env::var("TIMEFRAME").unwrap_or_else(|_| "1m".to_string()),
                kline_limit,
                volume_threshold_usd: env_or("VOLUME_THRESHOLD_USD", 200_000_000.0),
                symbols: env::var("SYMBOLS_TO_MONITOR")
                    .map(|s| parse_symbol_list(&s))
                    .unwrap_or_default(),
                reconnect_delay: env_secs("RECONNECT_DELAY", 5),
                max_reconnect_delay: env_secs("MAX_RECONNECT_DELAY", 120),
                max_reconnect_attempts: env_or("MAX_RECONNECT_ATTEMPTS", 10),
                stream_read_timeout: env_secs("STREAM_READ_TIMEOUT", 60),
                oi_poll_interval: env_optional_secs("OI_POLL_INTERVAL", 60),
                request_timeout: env_secs("REQUEST_TIMEOUT", 10),
                request_max_attempts: env_or("REQUEST_MAX_ATTEMPTS", 3),
            },
            telegram: TelegramConfig {
                bot_token: env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
                chat_id: env::var("TELEGRAM_CHAT_ID").unwrap_or_default(),
            },
            strategy,
            history_capacity: env_or("HISTORY_CAPACITY", kline_limit + HISTORY_SAFETY_MARGIN),
            cooldown: env_secs("COOLDOWN_BETWEEN_SIGNALS", 300),
            heartbeat_interval: env_optional_secs("HEARTBEAT_INTERVAL", 300),
            oi_min_refresh_ms: env_or("OI_MIN_REFRESH_MS", 5_000),
        }
    }

    /// Check that all required values are present and thresholds are coherent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.telegram.bot_token.trim().is_empty() {
            missing.push("TELEGRAM_BOT_TOKEN");
        }
        if self.telegram.chat_id.trim().is_empty() {
            missing.push("TELEGRAM_CHAT_ID");
        }
        if !missing.is_empty() {
            return Err(ConfigError::MissingVariables(missing.join(", ")));
        }

        let s = &self.strategy;
        if s.rsi_period == 0 {
            return Err(invalid("RSI_PERIOD", "must be greater than zero"));
        }
        if s.atr_period == 0 {
            return Err(invalid("ATR_PERIOD", "must be greater than zero"));
        }
        if !(0.0..=100.0).contains(&s.rsi_oversold) || !(0.0..=100.0).contains(&s.rsi_overbought)
        {
            return Err(invalid("RSI_OVERSOLD/RSI_OVERBOUGHT", "must be within 0-100"));
        }
        if s.rsi_oversold >= s.rsi_overbought {
            return Err(invalid(
                "RSI_OVERSOLD",
                format!(
                    "{} must be below RSI_OVERBOUGHT {}",
                    s.rsi_oversold, s.rsi_overbought
                ),
            ));
        }
        for (name, value) in [
            ("MIN_VOLUME_MULTIPLIER", s.min_volume_multiplier),
            ("STOP_LOSS_ATR_MULTIPLIER", s.stop_loss_atr_multiplier),
            ("TAKE_PROFIT_ATR_MULTIPLIER", s.take_profit_atr_multiplier),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid(name, format!("{} must be positive", value)));
            }
        }
        if self.history_capacity < s.required_history() {
            return Err(invalid(
                "HISTORY_CAPACITY",
                format!(
                    "{} is below the indicator lookback of {}",
                    self.history_capacity,
                    s.required_history()
                ),
            ));
        }
        if self.exchange.kline_limit == 0 {
            return Err(invalid("KLINE_LIMIT", "must be greater than zero"));
        }
        if self.exchange.max_reconnect_attempts == 0 {
            return Err(invalid("MAX_RECONNECT_ATTEMPTS", "must be greater than zero"));
        }

        Ok(())
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        reason: reason.into(),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            exchange: ExchangeConfig {
                environment: Environment::Testnet,
                api_key: None,
                rest_url: TESTNET_REST_URL.to_string(),
                ws_url: TESTNET_WS_URL.to_string(),
                timeframe: "1m".to_string(),
                kline_limit: 100,
                volume_threshold_usd: 200_000_000.0,
                symbols: vec![],
                reconnect_delay: Duration::from_secs(5),
                max_reconnect_delay: Duration::from_secs(120),
                max_reconnect_attempts: 10,
                stream_read_timeout: Duration::from_secs(60),
                oi_poll_interval: Some(Duration::from_secs(60)),
                request_timeout: Duration::from_secs(10),
                request_max_attempts: 3,
            },
            telegram: TelegramConfig {
                bot_token: "123:abc".to_string(),
                chat_id: "-100".to_string(),
            },
            strategy: StrategyConfig::default(),
            history_capacity: 120,
            cooldown: Duration::from_secs(300),
            heartbeat_interval: Some(Duration::from_secs(300)),
            oi_min_refresh_ms: 5_000,
        }
    }

    // =========================================================================
    // Environment Tests
    // =========================================================================

    #[test]
    fn test_environment_parsing() {
        assert_eq!(Environment::from_str("mainnet"), Environment::Mainnet);
        assert_eq!(Environment::from_str("PRODUCTION"), Environment::Mainnet);
        assert_eq!(Environment::from_str("testnet"), Environment::Testnet);
        assert_eq!(Environment::from_str("anything"), Environment::Testnet);
    }

    #[test]
    fn test_environment_urls() {
        assert!(Environment::Testnet.rest_url().contains("testnet"));
        assert_eq!(Environment::Mainnet.ws_url(), "wss://fstream.binance.com");
    }

    // =========================================================================
    // StrategyConfig Tests
    // =========================================================================

    #[test]
    fn test_strategy_defaults() {
        let s = StrategyConfig::default();
        assert_eq!(s.rsi_period, 14);
        assert_eq!(s.rsi_oversold, 30.0);
        assert_eq!(s.rsi_overbought, 70.0);
        assert_eq!(s.min_oi_change_percent, 2.0);
        assert_eq!(s.min_volume_multiplier, 1.2);
        assert_eq!(s.trend_filter, TrendFilter::Gate);
        assert_eq!(s.required_history(), 15);
    }

    #[test]
    fn test_trend_filter_parsing() {
        assert_eq!(TrendFilter::from_str("gate"), Some(TrendFilter::Gate));
        assert_eq!(TrendFilter::from_str(" Score "), Some(TrendFilter::Score));
        assert_eq!(TrendFilter::from_str("maybe"), None);
    }

    #[test]
    fn test_parse_symbol_list() {
        assert_eq!(
            parse_symbol_list("btcusdt, ETHUSDT,,solusdt "),
            vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]
        );
        assert!(parse_symbol_list("").is_empty());
    }

    // =========================================================================
    // Validation Tests
    // =========================================================================

    #[test]
    fn test_validate_ok() {
        assert_eq!(valid_config().validate(), Ok(()));
    }

    #[test]
    fn test_validate_missing_telegram() {
        let mut config = valid_config();
        config.telegram.bot_token.clear();
        config.telegram.chat_id.clear();
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingVariables(
                "TELEGRAM_BOT_TOKEN, TELEGRAM_CHAT_ID".to_string()
            ))
        );
    }

    #[test]
    fn test_validate_inverted_thresholds() {
        let mut config = valid_config();
        config.strategy.rsi_oversold = 75.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { name: "RSI_OVERSOLD", .. })
        ));
    }

    #[test]
    fn test_validate_capacity_below_lookback() {
        let mut config = valid_config();
        config.history_capacity = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { name: "HISTORY_CAPACITY", .. })
        ));
    }

    #[test]
    fn test_validate_non_positive_multiplier() {
        let mut config = valid_config();
        config.strategy.stop_loss_atr_multiplier = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { name: "STOP_LOSS_ATR_MULTIPLIER", .. })
        ));
    }

    #[test]
    fn test_config_clone() {
        let config = valid_config();
        let cloned = config.clone();
        assert_eq!(cloned.history_capacity, config.history_capacity);
        assert_eq!(cloned.strategy, config.strategy);
    }
}

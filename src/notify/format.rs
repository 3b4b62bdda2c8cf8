//! Telegram Markdown renderings of alerts and lifecycle events.

use crate::services::dispatcher::DispatcherStats;
use crate::types::{SignalAlert, VolatilityTier};
use chrono::{DateTime, Utc};

/// Escape characters that would break legacy Markdown parsing in free text.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn volatility_info(alert: &SignalAlert) -> String {
    match (alert.volatility_tier, alert.volatility) {
        (VolatilityTier::Insufficient, _) | (_, None) => {
            VolatilityTier::Insufficient.label().to_string()
        }
        (tier, Some(value)) => format!("{} ({:.3})", tier.label(), value),
    }
}

fn candle_time(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|t| t.format("%H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

/// Full alert message.
pub fn signal_message(alert: &SignalAlert, rsi_period: usize, atr_period: usize) -> String {
    let entry = alert.entry_price;
    let percent_of_entry = |distance: f64| {
        if entry != 0.0 {
            distance / entry * 100.0
        } else {
            0.0
        }
    };

    format!(
        "{emoji} *{direction} SIGNAL* {stars}\n\
         📊 *{symbol}*\n\n\
         💰 Entry: `{entry:.4}`\n\
         🛑 Stop Loss: `{stop:.4}` ({stop_pct:.2}%)\n\
         🎯 Take Profit: `{take:.4}` ({take_pct:.2}%)\n\
         ⚖️ Risk/Reward: `1:{rr:.2}`\n\n\
         📈 *Technical Analysis:*\n\
         • RSI({rsi_period}): `{rsi:.1}`\n\
         • ATR({atr_period}): `{atr:.6}`\n\
         • Open Interest: `{oi:+.2}%`\n\
         • Volume: `{volume:.1}x` above avg\n\
         • Volatility: `{volatility}`\n\n\
         🎯 *Signal Strength:* {strength_desc}\n\
         ⏰ `{time}`",
        emoji = alert.direction.emoji(),
        direction = alert.direction.label(),
        stars = "⭐".repeat(usize::from(alert.strength)),
        symbol = alert.symbol,
        entry = entry,
        stop = alert.stop_loss,
        stop_pct = percent_of_entry(alert.risk()),
        take = alert.take_profit,
        take_pct = percent_of_entry(alert.reward()),
        rr = alert.risk_reward_ratio(),
        rsi_period = rsi_period,
        rsi = alert.rsi,
        atr_period = atr_period,
        atr = alert.atr,
        oi = alert.oi_change_percent,
        volume = alert.volume_ratio,
        volatility = volatility_info(alert),
        strength_desc = alert.strength_description(),
        time = candle_time(alert.timestamp),
    )
}

pub fn startup_message() -> String {
    "🚀 Scalping signal bot is starting...".to_string()
}

pub fn monitoring_message(symbols: &[String]) -> String {
    format!("✅ Monitoring {} symbol(s)", symbols.len())
}

pub fn no_symbols_message() -> String {
    "⚠️ No symbols to monitor".to_string()
}

pub fn critical_message(error: &str) -> String {
    format!("🆘 Critical error: {}", escape_markdown(error))
}

pub fn stopped_message() -> String {
    "🛑 Bot stopped".to_string()
}

/// Periodic status line.
pub fn heartbeat_message(symbol_count: usize, stats: &DispatcherStats) -> String {
    format!(
        "💓 Monitoring {} symbol(s)\n\
         Candles processed: `{}`\n\
         Signals sent: `{}` (suppressed: `{}`)\n\
         Events dropped: `{}`",
        symbol_count,
        stats.candles_processed,
        stats.signals_emitted,
        stats.signals_suppressed,
        stats.events_dropped
    )
}

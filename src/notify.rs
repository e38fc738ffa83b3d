//! Outbound notifications. Delivery is fire-and-forget: a failed send is
//! logged and never reaches the pipeline.

use reqwest::Client;
use serde::Serialize;

use crate::exchange::Direction;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    PatternDetected {
        pattern_id: String,
        variant: String,
        direction: Direction,
        confidence: f64,
        d_price: f64,
    },
    ZoneIdentified {
        pattern_id: String,
        level_886: f64,
        entry_lo: f64,
        entry_hi: f64,
        take_profits: Vec<f64>,
    },
    PositionOpened {
        position_id: String,
        pattern_id: String,
        direction: Direction,
        entry_price: f64,
        size: f64,
        stop_loss: f64,
    },
    PositionClosed {
        position_id: String,
        reason: String,
        exit_price: f64,
        pnl: f64,
    },
    Status {
        open_positions: usize,
        active_patterns: usize,
        daily_pnl: f64,
    },
    Error {
        context: String,
        message: String,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::PatternDetected { .. } => "pattern_detected",
            Notification::ZoneIdentified { .. } => "zone_identified",
            Notification::PositionOpened { .. } => "position_opened",
            Notification::PositionClosed { .. } => "position_closed",
            Notification::Status { .. } => "status",
            Notification::Error { .. } => "error",
        }
    }

    /// Human-readable one-message rendering.
    pub fn render(&self) -> String {
        match self {
            Notification::PatternDetected { pattern_id, variant, direction, confidence, d_price } => format!(
                "Pattern {} ({} {}) confidence {:.2}, D at {:.4}",
                pattern_id,
                direction.as_str(),
                variant,
                confidence,
                d_price
            ),
            Notification::ZoneIdentified { pattern_id, level_886, entry_lo, entry_hi, take_profits } => {
                let tps: Vec<String> = take_profits.iter().map(|t| format!("{:.4}", t)).collect();
                format!(
                    "Zone for {}: 0.886 at {:.4}, entry {:.4}-{:.4}, targets {}",
                    pattern_id,
                    level_886,
                    entry_lo,
                    entry_hi,
                    tps.join(" / ")
                )
            }
            Notification::PositionOpened { position_id, pattern_id, direction, entry_price, size, stop_loss } => {
                format!(
                    "Opened {} {} from {}: {:.6} @ {:.4}, stop {:.4}",
                    direction.side(),
                    position_id,
                    pattern_id,
                    size,
                    entry_price,
                    stop_loss
                )
            }
            Notification::PositionClosed { position_id, reason, exit_price, pnl } => {
                format!("Closed {} ({}) @ {:.4}, pnl {:+.2}", position_id, reason, exit_price, pnl)
            }
            Notification::Status { open_positions, active_patterns, daily_pnl } => format!(
                "Status: {} open positions, {} active patterns, daily pnl {:+.2}",
                open_positions, active_patterns, daily_pnl
            ),
            Notification::Error { context, message } => format!("Error in {}: {}", context, message),
        }
    }
}

pub trait Notifier {
    fn notify(&self, notification: &Notification);
}

/// Writes every notification to the structured log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        let level = match notification {
            Notification::Error { .. } => Level::Error,
            _ => Level::Info,
        };
        let mut fields = match serde_json::to_value(notification) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => obj(&[("kind", v_str(notification.kind()))]),
        };
        fields.insert("msg".to_string(), v_str(&notification.render()));
        log(level, Domain::Notify, "notification", fields);
    }
}

/// Telegram bot delivery. Each send runs on its own task.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self { client: Client::new(), base: "https://api.telegram.org".to_string(), bot_token, chat_id }
    }

    pub fn with_base(mut self, base: &str) -> Self {
        self.base = base.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base, self.bot_token)
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, notification: &Notification) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log(Level::Warn, Domain::Notify, "telegram_skipped", obj(&[("reason", v_str("no runtime"))]));
            return;
        };
        let client = self.client.clone();
        let url = self.endpoint();
        let body = serde_json::json!({ "chat_id": self.chat_id, "text": notification.render() });
        let kind = notification.kind();
        handle.spawn(async move {
            match client.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => log(
                    Level::Warn,
                    Domain::Notify,
                    "telegram_failed",
                    obj(&[("kind", v_str(kind)), ("status", v_num(resp.status().as_u16() as f64))]),
                ),
                Err(e) => log(
                    Level::Warn,
                    Domain::Notify,
                    "telegram_failed",
                    obj(&[("kind", v_str(kind)), ("error", v_str(&e.to_string()))]),
                ),
            }
        });
    }
}

/// Delivers to every inner notifier in order.
#[derive(Default)]
pub struct FanoutNotifier {
    sinks: Vec<Box<dyn Notifier + Send + Sync>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Box<dyn Notifier + Send + Sync>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Notifier for FanoutNotifier {
    fn notify(&self, notification: &Notification) {
        for sink in &self.sinks {
            sink.notify(notification);
        }
    }
}

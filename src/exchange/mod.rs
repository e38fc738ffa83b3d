use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

mod binance;
mod paper;
pub mod retry;
pub mod signing;

pub use binance::{BinanceClient, BinanceExecution, BinanceFeed};
pub use paper::{PaperExecution, ReplayFeed};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeKind {
    Binance,
    Paper,
}

impl ExchangeKind {
    /// `EXECUTION=paper` forces paper trading; otherwise live execution is
    /// used only when API credentials are present.
    pub fn from_env(has_credentials: bool) -> Self {
        match (std::env::var("EXECUTION").unwrap_or_default().as_str(), has_credentials) {
            ("paper", _) => ExchangeKind::Paper,
            (_, true) => ExchangeKind::Binance,
            _ => ExchangeKind::Paper,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub ts: u64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
}

/// Trade direction. Bullish patterns are traded long, bearish ones short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Bullish => 1.0,
            Direction::Bearish => -1.0,
        }
    }

    pub fn side(&self) -> &'static str {
        match self {
            Direction::Bullish => "BUY",
            Direction::Bearish => "SELL",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Bullish => "bullish",
            Direction::Bearish => "bearish",
        }
    }

    /// True when `price` lies strictly beyond `level` in this direction.
    pub fn beyond(&self, price: f64, level: f64) -> bool {
        match self {
            Direction::Bullish => price > level,
            Direction::Bearish => price < level,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeframeRole {
    Higher,
    Lower,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeframe {
    pub role: TimeframeRole,
    pub interval: String,
    pub secs: u64,
}

impl Timeframe {
    /// Parse an interval identifier such as `5m`, `1h` or `1d`.
    pub fn parse(role: TimeframeRole, interval: &str) -> Result<Self> {
        let interval = interval.trim();
        let (num, unit) = interval.split_at(interval.len().saturating_sub(1));
        let n: u64 = num
            .parse()
            .map_err(|_| CoreError::Configuration(format!("invalid timeframe '{}'", interval)))?;
        let unit_secs = match unit {
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            _ => {
                return Err(CoreError::Configuration(format!(
                    "invalid timeframe unit in '{}'",
                    interval
                )))
            }
        };
        if n == 0 {
            return Err(CoreError::Configuration(format!("zero-length timeframe '{}'", interval)));
        }
        Ok(Self { role, interval: interval.to_string(), secs: n * unit_secs })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub filled_price: f64,
    /// Execution cost reported by the venue, in quote currency.
    pub fee: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitResult {
    pub exit_price: f64,
    pub fee: f64,
}

/// Inbound bar stream, one lazy time-ordered sequence per timeframe.
///
/// `Ok(None)` means no new closed bar yet. `FeedUnavailable` is a pause,
/// not a terminal failure.
#[async_trait]
pub trait PriceFeed {
    async fn next_bar(&mut self, timeframe: &Timeframe) -> Result<Option<Candle>>;

    /// Restart the sequence for `timeframe` from the venue's recent history.
    fn restart(&mut self, timeframe: &Timeframe);
}

#[async_trait]
pub trait Execution {
    async fn place_order(
        &self,
        direction: Direction,
        size: f64,
        stop_loss: f64,
        take_profits: &[f64],
    ) -> Result<OrderResult>;

    async fn close_order(&self, order_id: &str) -> Result<ExitResult>;

    /// Latest observed price. Only simulated venues need it.
    fn mark_price(&self, _price: f64) {}
}

#[async_trait]
pub trait Account {
    async fn get_equity(&self) -> Result<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_parse() {
        let tf = Timeframe::parse(TimeframeRole::Higher, "1h").unwrap();
        assert_eq!(tf.secs, 3600);
        let tf = Timeframe::parse(TimeframeRole::Lower, "5m").unwrap();
        assert_eq!(tf.secs, 300);
        assert!(Timeframe::parse(TimeframeRole::Lower, "5x").is_err());
        assert!(Timeframe::parse(TimeframeRole::Lower, "0m").is_err());
        assert!(Timeframe::parse(TimeframeRole::Lower, "").is_err());
    }

    #[test]
    fn test_direction_beyond() {
        assert!(Direction::Bullish.beyond(101.0, 100.0));
        assert!(!Direction::Bullish.beyond(100.0, 100.0));
        assert!(Direction::Bearish.beyond(99.0, 100.0));
        assert!(!Direction::Bearish.beyond(101.0, 100.0));
        assert_eq!(Direction::Bearish.sign(), -1.0);
    }
}

//! Inputs to the engine and the status snapshot it reports.

use serde::Serialize;

use crate::exchange::Candle;
use crate::notify::Notification;
use crate::positions::ExitReason;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    HigherBar(Candle),
    LowerBar(Candle),
    /// Wall-clock housekeeping: TTL purges and deadline expiry.
    Tick(u64),
    Shutdown { reason: ExitReason, now: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EngineStatus {
    pub open_positions: usize,
    pub active_patterns: usize,
    pub daily_pnl: f64,
    pub htf_bars: usize,
    pub ltf_bars: usize,
}

impl EngineStatus {
    pub fn to_notification(&self) -> Notification {
        Notification::Status {
            open_positions: self.open_positions,
            active_patterns: self.active_patterns,
            daily_pnl: self.daily_pnl,
        }
    }
}

/// What a lower-timeframe bar caused.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LowerBarReport {
    pub confirmed: Vec<String>,
    pub expired: Vec<String>,
    pub opened: Vec<String>,
    pub closed: Vec<String>,
}

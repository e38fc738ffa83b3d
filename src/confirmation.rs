//! Three-signal confirmation per pattern.
//!
//! A pattern is confirmed once the level, trendline and zone signals have
//! all fired within `confirm_window` of each other and before the deadline.
//! Confirmed and Expired are terminal.

use serde::{Deserialize, Serialize};

use crate::exchange::{Candle, Direction};
use crate::harmonic::Pattern;
use crate::logging::{log, log_signal, obj, v_num, v_str, Domain, Level};
use crate::sizing::stop_loss_for;
use crate::trendline::TrendlineEvent;
use crate::zones::{PriceRange, Zone};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfirmationParams {
    pub pattern_ttl: u64,
    pub zone_ttl: u64,
    pub confirm_window: u64,
    pub stop_buffer_pct: f64,
}

impl Default for ConfirmationParams {
    fn default() -> Self {
        Self { pattern_ttl: 172_800, zone_ttl: 86_400, confirm_window: 86_400, stop_buffer_pct: 0.0005 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Level,
    Trendline,
    Zone,
}

impl Signal {
    const ALL: [Signal; 3] = [Signal::Level, Signal::Trendline, Signal::Zone];

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Level => "level",
            Signal::Trendline => "trendline",
            Signal::Zone => "zone",
        }
    }

    fn slot(&self) -> usize {
        match self {
            Signal::Level => 0,
            Signal::Trendline => 1,
            Signal::Zone => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmationStatus {
    AwaitingConfirmation,
    Confirmed,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRequest {
    pub pattern_id: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profits: Vec<f64>,
    pub rebound_zone: PriceRange,
    pub ts: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Unchanged,
    Confirmed(EntryRequest),
    Expired,
}

#[derive(Debug, Clone)]
pub struct ConfirmationMachine {
    pattern_id: String,
    direction: Direction,
    d_ts: u64,
    d_price: f64,
    level_886: f64,
    outer_edge: f64,
    take_profits: Vec<f64>,
    rebound_zone: PriceRange,
    deadline: u64,
    fired: [Option<u64>; 3],
    status: ConfirmationStatus,
    params: ConfirmationParams,
}

impl ConfirmationMachine {
    pub fn new(pattern: &Pattern, zone: &Zone, params: ConfirmationParams) -> Self {
        let ttl = params.pattern_ttl.min(params.zone_ttl);
        Self {
            pattern_id: pattern.id.clone(),
            direction: pattern.direction,
            d_ts: pattern.d.ts,
            d_price: pattern.d.price,
            level_886: zone.level_886,
            outer_edge: zone.outer_edge,
            take_profits: zone.take_profits.clone(),
            rebound_zone: zone.rebound_zone,
            deadline: pattern.detected_at.saturating_add(ttl),
            fired: [None; 3],
            status: ConfirmationStatus::AwaitingConfirmation,
            params,
        }
    }

    pub fn pattern_id(&self) -> &str {
        &self.pattern_id
    }

    pub fn status(&self) -> ConfirmationStatus {
        self.status
    }

    pub fn deadline(&self) -> u64 {
        self.deadline
    }

    pub fn fired_at(&self, signal: Signal) -> Option<u64> {
        self.fired[signal.slot()]
    }

    pub fn is_terminal(&self) -> bool {
        self.status != ConfirmationStatus::AwaitingConfirmation
    }

    pub fn on_bar(&mut self, bar: &Candle, trendline_events: &[TrendlineEvent]) -> Transition {
        if self.is_terminal() {
            return Transition::Unchanged;
        }
        if bar.ts >= self.deadline {
            self.expire("deadline");
            return Transition::Expired;
        }
        if bar.ts <= self.d_ts {
            return Transition::Unchanged;
        }

        let broke = trendline_events.iter().any(|e| matches!(e, TrendlineEvent::Break { ts, .. } if *ts > self.d_ts));
        let holds = |signal: Signal| match signal {
            Signal::Level => self.direction.beyond(bar.c, self.level_886),
            Signal::Trendline => broke,
            Signal::Zone => self.direction.beyond(bar.c, self.outer_edge),
        };
        let active: Vec<Signal> = Signal::ALL.into_iter().filter(|s| holds(*s)).collect();

        // A dropped signal may fire again on the same bar.
        for _ in 0..Signal::ALL.len() {
            for signal in &active {
                if self.fired[signal.slot()].is_none() {
                    self.fired[signal.slot()] = Some(bar.ts);
                    log_signal(&self.pattern_id, signal.as_str(), bar.ts, bar.c);
                }
            }
            if !self.prune_stale() {
                break;
            }
        }

        if self.fired.iter().all(Option::is_some) {
            self.status = ConfirmationStatus::Confirmed;
            log(
                Level::Info,
                Domain::Confirm,
                "pattern_confirmed",
                obj(&[
                    ("pattern_id", v_str(&self.pattern_id)),
                    ("ts", v_num(bar.ts as f64)),
                    ("price", v_num(bar.c)),
                ]),
            );
            return Transition::Confirmed(EntryRequest {
                pattern_id: self.pattern_id.clone(),
                direction: self.direction,
                entry_price: bar.c,
                stop_loss: stop_loss_for(self.direction, self.d_price, self.params.stop_buffer_pct),
                take_profits: self.take_profits.clone(),
                rebound_zone: self.rebound_zone,
                ts: bar.ts,
            });
        }
        Transition::Unchanged
    }

    /// Drop the oldest signals until the fired spread fits the window.
    /// Returns true when anything was dropped.
    fn prune_stale(&mut self) -> bool {
        let mut dropped = false;
        loop {
            let fired: Vec<(usize, u64)> =
                self.fired.iter().enumerate().filter_map(|(i, t)| t.map(|t| (i, t))).collect();
            let (Some(&(oldest, min)), Some(max)) =
                (fired.iter().min_by_key(|(_, t)| *t), fired.iter().map(|(_, t)| *t).max())
            else {
                return dropped;
            };
            if max - min <= self.params.confirm_window {
                return dropped;
            }
            self.fired[oldest] = None;
            dropped = true;
            log(
                Level::Debug,
                Domain::Confirm,
                "signal_dropped",
                obj(&[
                    ("pattern_id", v_str(&self.pattern_id)),
                    ("signal", v_str(Signal::ALL[oldest].as_str())),
                    ("fired_at", v_num(min as f64)),
                ]),
            );
        }
    }

    pub fn expire_if_due(&mut self, now: u64) -> bool {
        if !self.is_terminal() && now >= self.deadline {
            self.expire("deadline");
            return true;
        }
        false
    }

    pub fn force_expire(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.expire("forced");
        true
    }

    fn expire(&mut self, reason: &str) {
        self.status = ConfirmationStatus::Expired;
        let pending: Vec<&str> = Signal::ALL
            .iter()
            .filter(|s| self.fired[s.slot()].is_none())
            .map(|s| s.as_str())
            .collect();
        log(
            Level::Info,
            Domain::Confirm,
            "pattern_expired",
            obj(&[
                ("pattern_id", v_str(&self.pattern_id)),
                ("reason", v_str(reason)),
                ("unfired", v_str(&pending.join(","))),
            ]),
        );
    }
}

//! Lower-timeframe trendline tracking.
//!
//! Bullish patterns track a resistance line through pivot highs and look
//! for a close above it; bearish patterns track a support line through
//! pivot lows and look for a close below it.

use serde::{Deserialize, Serialize};

use crate::exchange::{Candle, Direction};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendlineParams {
    /// Relative distance from the projected line that still counts as a touch.
    pub tolerance: f64,
    pub min_touches: usize,
}

impl Default for TrendlineParams {
    fn default() -> Self {
        Self { tolerance: 0.002, min_touches: 3 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendlineStatus {
    Building,
    Valid,
    Broken,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Touch {
    pub ts: u64,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TrendlineEvent {
    Touch { ts: u64, price: f64 },
    Break { ts: u64, price: f64 },
    Invalidated { ts: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trendline {
    pub slope: f64,
    /// Line value at `start_ts`.
    pub intercept: f64,
    pub start_ts: u64,
    pub end_ts: u64,
    pub touches: Vec<Touch>,
    pub status: TrendlineStatus,
}

impl Trendline {
    fn empty() -> Self {
        Self {
            slope: 0.0,
            intercept: 0.0,
            start_ts: 0,
            end_ts: 0,
            touches: Vec::new(),
            status: TrendlineStatus::Building,
        }
    }

    /// A line exists once two touches are recorded.
    pub fn is_defined(&self) -> bool {
        self.touches.len() >= 2
    }

    pub fn value_at(&self, ts: u64) -> f64 {
        let dx = ts as f64 - self.start_ts as f64;
        self.intercept + self.slope * dx
    }

    fn clear(&mut self) {
        *self = Self::empty();
    }

    /// Least-squares fit through all touches.
    fn refit(&mut self) {
        let (Some(first), Some(last)) = (self.touches.first(), self.touches.last()) else {
            return;
        };
        self.start_ts = first.ts;
        self.end_ts = last.ts;
        let n = self.touches.len() as f64;
        let (mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0);
        for t in &self.touches {
            let x = t.ts as f64 - self.start_ts as f64;
            sx += x;
            sy += t.price;
            sxx += x * x;
            sxy += x * t.price;
        }
        let denom = n * sxx - sx * sx;
        self.slope = if denom.abs() > f64::EPSILON { (n * sxy - sx * sy) / denom } else { 0.0 };
        self.intercept = (sy - self.slope * sx) / n;
    }
}

pub struct TrendlineTracker {
    direction: Direction,
    params: TrendlineParams,
    line: Trendline,
    prev2: Option<Candle>,
    prev: Option<Candle>,
    last_ts: Option<u64>,
}

impl TrendlineTracker {
    pub fn new(direction: Direction, params: TrendlineParams) -> Self {
        Self { direction, params, line: Trendline::empty(), prev2: None, prev: None, last_ts: None }
    }

    pub fn line(&self) -> &Trendline {
        &self.line
    }

    pub fn status(&self) -> TrendlineStatus {
        self.line.status
    }

    /// Start over from subsequent bars.
    pub fn reset(&mut self) {
        self.line.clear();
        self.prev2 = None;
        self.prev = None;
    }

    pub fn on_bar(&mut self, bar: &Candle) -> Vec<TrendlineEvent> {
        let mut events = Vec::new();
        if self.last_ts.is_some_and(|ts| bar.ts <= ts) {
            return events;
        }
        self.last_ts = Some(bar.ts);

        if let (Some(left), Some(mid)) = (self.prev2, self.prev) {
            if let Some(price) = self.pivot_price(&left, &mid, bar) {
                if self.line.status != TrendlineStatus::Broken {
                    self.on_pivot(mid.ts, price, &mut events);
                }
            }
        }

        if self.line.status != TrendlineStatus::Broken && self.line.is_defined() {
            let projected = self.line.value_at(bar.ts);
            let band = self.params.tolerance * projected.abs();
            let trigger = projected + self.direction.sign() * band;
            if self.direction.beyond(bar.c, trigger) {
                if self.line.touches.len() >= self.params.min_touches {
                    self.line.status = TrendlineStatus::Broken;
                    events.push(TrendlineEvent::Break { ts: bar.ts, price: bar.c });
                } else {
                    self.line.clear();
                    events.push(TrendlineEvent::Invalidated { ts: bar.ts });
                }
            }
        }

        self.prev2 = self.prev;
        self.prev = Some(*bar);
        events
    }

    fn pivot_price(&self, left: &Candle, mid: &Candle, right: &Candle) -> Option<f64> {
        match self.direction {
            Direction::Bullish => (mid.h >= left.h && mid.h >= right.h).then_some(mid.h),
            Direction::Bearish => (mid.l <= left.l && mid.l <= right.l).then_some(mid.l),
        }
    }

    fn on_pivot(&mut self, ts: u64, price: f64, events: &mut Vec<TrendlineEvent>) {
        if !self.line.is_defined() {
            self.accept(ts, price, events);
            return;
        }
        let projected = self.line.value_at(ts);
        let band = self.params.tolerance * projected.abs();
        if (price - projected).abs() <= band {
            self.accept(ts, price, events);
        } else if self.direction.beyond(price, projected) {
            self.line.clear();
            events.push(TrendlineEvent::Invalidated { ts });
            self.accept(ts, price, events);
        }
    }

    fn accept(&mut self, ts: u64, price: f64, events: &mut Vec<TrendlineEvent>) {
        self.line.touches.push(Touch { ts, price });
        self.line.refit();
        if self.line.touches.len() >= self.params.min_touches {
            self.line.status = TrendlineStatus::Valid;
        }
        events.push(TrendlineEvent::Touch { ts, price });
    }
}

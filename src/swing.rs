//! Swing point extraction on the higher timeframe.
//!
//! A bar is a swing high when its high is the strict maximum of the
//! `lookback` bars before it and not exceeded by the `lookback` bars after
//! it; equal highs resolve to the earliest bar. Swing lows mirror this on
//! lows. Boundary bars without a full window on both sides are never
//! evaluated.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::exchange::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwingKind {
    High,
    Low,
}

impl SwingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwingKind::High => "high",
            SwingKind::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    /// Position of the bar in the series the extractor ran over.
    pub index: usize,
    pub ts: u64,
    pub price: f64,
    pub kind: SwingKind,
}

impl SwingPoint {
    /// True when `self` is a more extreme point of the same kind.
    pub fn more_extreme_than(&self, other: &SwingPoint) -> bool {
        match self.kind {
            SwingKind::High => self.price > other.price,
            SwingKind::Low => self.price < other.price,
        }
    }
}

pub struct SwingExtractor<'a> {
    bars: &'a [Candle],
    lookback: usize,
}

impl<'a> SwingExtractor<'a> {
    pub fn new(bars: &'a [Candle], lookback: usize) -> Result<Self> {
        if lookback == 0 {
            return Err(CoreError::Configuration("swing lookback must be >= 1".to_string()));
        }
        let needed = 2 * lookback + 1;
        if bars.len() < needed {
            return Err(CoreError::InsufficientData { needed, got: bars.len() });
        }
        Ok(Self { bars, lookback })
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    /// Lazy iterator over swing points in chronological order. Each call
    /// starts again from the beginning of the series.
    pub fn points(&self) -> SwingPoints<'a> {
        SwingPoints { bars: self.bars, lookback: self.lookback, next: self.lookback, pending: None }
    }
}

pub struct SwingPoints<'a> {
    bars: &'a [Candle],
    lookback: usize,
    next: usize,
    pending: Option<SwingPoint>,
}

impl<'a> SwingPoints<'a> {
    fn is_high(&self, i: usize) -> bool {
        let h = self.bars[i].h;
        self.bars[i - self.lookback..i].iter().all(|b| h > b.h)
            && self.bars[i + 1..=i + self.lookback].iter().all(|b| h >= b.h)
    }

    fn is_low(&self, i: usize) -> bool {
        let l = self.bars[i].l;
        self.bars[i - self.lookback..i].iter().all(|b| l < b.l)
            && self.bars[i + 1..=i + self.lookback].iter().all(|b| l <= b.l)
    }

    fn point(&self, i: usize, kind: SwingKind) -> SwingPoint {
        let bar = &self.bars[i];
        let price = match kind {
            SwingKind::High => bar.h,
            SwingKind::Low => bar.l,
        };
        SwingPoint { index: i, ts: bar.ts, price, kind }
    }
}

impl<'a> Iterator for SwingPoints<'a> {
    type Item = SwingPoint;

    fn next(&mut self) -> Option<SwingPoint> {
        if let Some(p) = self.pending.take() {
            return Some(p);
        }
        let end = self.bars.len().saturating_sub(self.lookback);
        while self.next < end {
            let i = self.next;
            self.next += 1;
            let high = self.is_high(i);
            let low = self.is_low(i);
            match (high, low) {
                (true, true) => {
                    self.pending = Some(self.point(i, SwingKind::Low));
                    return Some(self.point(i, SwingKind::High));
                }
                (true, false) => return Some(self.point(i, SwingKind::High)),
                (false, true) => return Some(self.point(i, SwingKind::Low)),
                (false, false) => {}
            }
        }
        None
    }
}

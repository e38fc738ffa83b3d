//! Higher-timeframe detection: bar history, swing extraction and the
//! pattern matcher.

use crate::error::CoreError;
use crate::exchange::Candle;
use crate::harmonic::{BandTable, Pattern, PatternMatcher};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::state::RingBuffer;
use crate::swing::SwingExtractor;

pub struct Detector {
    bars: RingBuffer<Candle>,
    lookback: usize,
    matcher: PatternMatcher,
    last_swing_ts: Option<u64>,
    last_bar_ts: Option<u64>,
}

impl Detector {
    pub fn new(window: usize, lookback: usize, bands: BandTable, min_confidence: f64) -> Self {
        Self {
            bars: RingBuffer::new(window),
            lookback,
            matcher: PatternMatcher::new(bands, min_confidence),
            last_swing_ts: None,
            last_bar_ts: None,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Append a closed bar and return patterns completed by swing points
    /// that became visible with it. Out-of-order bars are dropped.
    pub fn on_bar(&mut self, bar: Candle, now: u64) -> Vec<Pattern> {
        if self.last_bar_ts.is_some_and(|ts| bar.ts <= ts) {
            log(
                Level::Debug,
                Domain::Market,
                "stale_bar_dropped",
                obj(&[("timeframe", v_str("htf")), ("ts", v_num(bar.ts as f64))]),
            );
            return Vec::new();
        }
        self.last_bar_ts = Some(bar.ts);
        self.bars.push(bar);

        let history = self.bars.to_vec();
        let extractor = match SwingExtractor::new(&history, self.lookback) {
            Ok(ex) => ex,
            Err(CoreError::InsufficientData { .. }) => return Vec::new(),
            Err(e) => {
                log(Level::Error, Domain::Pattern, "extractor_failed", obj(&[("error", v_str(&e.to_string()))]));
                return Vec::new();
            }
        };

        let since = self.last_swing_ts;
        let mut found = Vec::new();
        for point in extractor.points().filter(|p| since.map_or(true, |ts| p.ts > ts)) {
            self.last_swing_ts = Some(point.ts);
            log(
                Level::Debug,
                Domain::Pattern,
                "swing_point",
                obj(&[
                    ("ts", v_num(point.ts as f64)),
                    ("price", v_num(point.price)),
                    ("kind", v_str(point.kind.as_str())),
                ]),
            );
            if let Some(pattern) = self.matcher.push(point, now) {
                found.push(pattern);
            }
        }
        found
    }
}

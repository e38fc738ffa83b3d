//! Harmonic pattern scoring.
//!
//! Five alternating swing points X, A, B, C, D give four leg ratios
//! (AB/XA, BC/AB, CD/BC, AD/XA). Each variant carries one band table and
//! `classify` dispatches over all of them in one place.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::exchange::Direction;
use crate::logging::log_discard;
use crate::swing::{SwingKind, SwingPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HarmonicVariant {
    Gartley,
    Butterfly,
    Bat,
    Crab,
}

impl HarmonicVariant {
    /// Declaration order, used as the final tie-break.
    pub const ALL: [HarmonicVariant; 4] = [
        HarmonicVariant::Gartley,
        HarmonicVariant::Butterfly,
        HarmonicVariant::Bat,
        HarmonicVariant::Crab,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HarmonicVariant::Gartley => "gartley",
            HarmonicVariant::Butterfly => "butterfly",
            HarmonicVariant::Bat => "bat",
            HarmonicVariant::Crab => "crab",
        }
    }

    fn slot(&self) -> usize {
        match self {
            HarmonicVariant::Gartley => 0,
            HarmonicVariant::Butterfly => 1,
            HarmonicVariant::Bat => 2,
            HarmonicVariant::Crab => 3,
        }
    }

    pub fn default_bands(&self) -> RatioBands {
        let b = Band::new;
        match self {
            HarmonicVariant::Gartley => RatioBands {
                ab_xa: b(0.586, 0.636),
                bc_ab: b(0.382, 0.886),
                cd_bc: b(1.13, 1.618),
                ad_xa: b(0.756, 0.816),
            },
            HarmonicVariant::Butterfly => RatioBands {
                ab_xa: b(0.756, 0.816),
                bc_ab: b(0.382, 0.886),
                cd_bc: b(1.618, 2.618),
                ad_xa: b(1.27, 1.618),
            },
            HarmonicVariant::Bat => RatioBands {
                ab_xa: b(0.382, 0.50),
                bc_ab: b(0.382, 0.886),
                cd_bc: b(1.618, 2.618),
                ad_xa: b(0.856, 0.916),
            },
            HarmonicVariant::Crab => RatioBands {
                ab_xa: b(0.382, 0.618),
                bc_ab: b(0.382, 0.886),
                cd_bc: b(2.24, 3.618),
                ad_xa: b(1.588, 1.648),
            },
        }
    }
}

/// Inclusive tolerance band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub lo: f64,
    pub hi: f64,
}

impl Band {
    pub const fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    pub fn center(&self) -> f64 {
        (self.lo + self.hi) / 2.0
    }

    pub fn width(&self) -> f64 {
        self.hi - self.lo
    }

    pub fn contains(&self, r: f64) -> bool {
        r >= self.lo && r <= self.hi
    }

    /// Distance from the center normalised by band width: 0 at the center,
    /// 0.5 on either bound.
    pub fn deviation(&self, r: f64) -> f64 {
        let w = self.width();
        if w <= 0.0 {
            return 0.0;
        }
        (r - self.center()).abs() / w
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioBands {
    pub ab_xa: Band,
    pub bc_ab: Band,
    pub cd_bc: Band,
    pub ad_xa: Band,
}

impl RatioBands {
    pub fn legs(&self) -> [Band; 4] {
        [self.ab_xa, self.bc_ab, self.cd_bc, self.ad_xa]
    }

    pub fn total_width(&self) -> f64 {
        self.legs().iter().map(Band::width).sum()
    }

    /// Parse `"lo,hi;lo,hi;lo,hi;lo,hi"` in AB/XA, BC/AB, CD/BC, AD/XA order.
    pub fn parse(raw: &str) -> Result<Self> {
        let bad = |why: &str| CoreError::Configuration(format!("invalid bands '{}': {}", raw, why));
        let mut bands = Vec::with_capacity(4);
        for part in raw.split(';') {
            let (lo, hi) = part.split_once(',').ok_or_else(|| bad("expected lo,hi"))?;
            let lo: f64 = lo.trim().parse().map_err(|_| bad("lo is not a number"))?;
            let hi: f64 = hi.trim().parse().map_err(|_| bad("hi is not a number"))?;
            if !(lo.is_finite() && hi.is_finite()) || lo <= 0.0 || lo > hi {
                return Err(bad("need 0 < lo <= hi"));
            }
            bands.push(Band::new(lo, hi));
        }
        match bands.as_slice() {
            [ab_xa, bc_ab, cd_bc, ad_xa] => {
                Ok(Self { ab_xa: *ab_xa, bc_ab: *bc_ab, cd_bc: *cd_bc, ad_xa: *ad_xa })
            }
            _ => Err(bad("expected four bands")),
        }
    }
}

/// Band tables for every variant.
#[derive(Debug, Clone, PartialEq)]
pub struct BandTable {
    bands: [RatioBands; 4],
}

impl Default for BandTable {
    fn default() -> Self {
        Self { bands: HarmonicVariant::ALL.map(|v| v.default_bands()) }
    }
}

impl BandTable {
    pub fn get(&self, variant: HarmonicVariant) -> &RatioBands {
        &self.bands[variant.slot()]
    }

    pub fn set(&mut self, variant: HarmonicVariant, bands: RatioBands) {
        self.bands[variant.slot()] = bands;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegRatios {
    pub ab_xa: f64,
    pub bc_ab: f64,
    pub cd_bc: f64,
    pub ad_xa: f64,
}

impl LegRatios {
    pub fn as_array(&self) -> [f64; 4] {
        [self.ab_xa, self.bc_ab, self.cd_bc, self.ad_xa]
    }
}

/// Measure the four leg ratios of an X, A, B, C, D window.
pub fn leg_ratios(points: &[SwingPoint; 5]) -> Result<LegRatios> {
    let [x, a, b, c, d] = points;
    let xa = (a.price - x.price).abs();
    let ab = (b.price - a.price).abs();
    let bc = (c.price - b.price).abs();
    let cd = (d.price - c.price).abs();
    let ad = (a.price - d.price).abs();
    for (leg, len) in [("XA", xa), ("AB", ab), ("BC", bc), ("CD", cd)] {
        if len <= f64::EPSILON {
            return Err(CoreError::DegenerateLeg { leg });
        }
    }
    Ok(LegRatios { ab_xa: ab / xa, bc_ab: bc / ab, cd_bc: cd / bc, ad_xa: ad / xa })
}

/// Confidence of `ratios` against one band table. Zero when any leg falls
/// outside its band.
pub fn score(bands: &RatioBands, ratios: &LegRatios) -> f64 {
    let mut worst: f64 = 0.0;
    for (band, r) in bands.legs().iter().zip(ratios.as_array()) {
        if !band.contains(r) {
            return 0.0;
        }
        worst = worst.max(band.deviation(r));
    }
    (1.0 - worst).clamp(0.0, 1.0)
}

/// Best matching variant, or `None` when no variant admits the window.
pub fn classify(table: &BandTable, ratios: &LegRatios) -> Option<(HarmonicVariant, f64)> {
    let mut best: Option<(HarmonicVariant, f64)> = None;
    for variant in HarmonicVariant::ALL {
        let confidence = score(table.get(variant), ratios);
        if confidence <= 0.0 {
            continue;
        }
        best = match best {
            None => Some((variant, confidence)),
            Some((current, cur_conf)) => {
                let tighter =
                    table.get(variant).total_width() < table.get(current).total_width();
                if confidence > cur_conf || (confidence == cur_conf && tighter) {
                    Some((variant, confidence))
                } else {
                    Some((current, cur_conf))
                }
            }
        };
    }
    best
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub x: SwingPoint,
    pub a: SwingPoint,
    pub b: SwingPoint,
    pub c: SwingPoint,
    pub d: SwingPoint,
    pub variant: HarmonicVariant,
    pub direction: Direction,
    pub confidence: f64,
    pub ratios: LegRatios,
    pub detected_at: u64,
}

impl Pattern {
    pub fn points(&self) -> [SwingPoint; 5] {
        [self.x, self.a, self.b, self.c, self.d]
    }
}

/// Sliding window over the five most recent alternating swing points.
pub struct PatternMatcher {
    table: BandTable,
    min_confidence: f64,
    window: Vec<SwingPoint>,
}

impl PatternMatcher {
    pub fn new(table: BandTable, min_confidence: f64) -> Self {
        Self { table, min_confidence, window: Vec::with_capacity(5) }
    }

    pub fn window(&self) -> &[SwingPoint] {
        &self.window
    }

    /// Feed the next swing point; returns a pattern when the updated window
    /// scores at or above the confidence threshold.
    pub fn push(&mut self, point: SwingPoint, now: u64) -> Option<Pattern> {
        match self.window.last_mut() {
            Some(last) if point.ts <= last.ts => return None,
            Some(last) if last.kind == point.kind => {
                if !point.more_extreme_than(last) {
                    return None;
                }
                *last = point;
            }
            _ => {
                self.window.push(point);
                if self.window.len() > 5 {
                    self.window.remove(0);
                }
            }
        }

        let points: [SwingPoint; 5] = self.window.as_slice().try_into().ok()?;
        self.evaluate(&points, now)
    }

    fn evaluate(&self, points: &[SwingPoint; 5], now: u64) -> Option<Pattern> {
        let ratios = match leg_ratios(points) {
            Ok(r) => r,
            Err(e) => {
                log_discard("matcher", &e.to_string());
                return None;
            }
        };
        let Some((variant, confidence)) = classify(&self.table, &ratios) else {
            log_discard("matcher", "no variant in tolerance");
            return None;
        };
        if confidence < self.min_confidence {
            log_discard("matcher", &format!("{} confidence {:.3} below threshold", variant.as_str(), confidence));
            return None;
        }

        let [x, a, b, c, d] = *points;
        let direction = match d.kind {
            SwingKind::Low => Direction::Bullish,
            SwingKind::High => Direction::Bearish,
        };
        Some(Pattern {
            id: format!("{}-{}", variant.as_str(), d.ts),
            x,
            a,
            b,
            c,
            d,
            variant,
            direction,
            confidence,
            ratios,
            detected_at: now,
        })
    }
}

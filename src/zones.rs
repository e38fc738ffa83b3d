//! Price zones derived from a scored pattern.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::exchange::Direction;
use crate::harmonic::Pattern;

pub const RETRACEMENT: f64 = 0.886;
pub const TAKE_PROFIT_FRACTIONS: [f64; 5] = [0.236, 0.382, 0.5, 0.618, 0.786];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub lo: f64,
    pub hi: f64,
}

impl PriceRange {
    /// Range spanning two prices in either order.
    pub fn between(a: f64, b: f64) -> Self {
        Self { lo: a.min(b), hi: a.max(b) }
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.lo && price <= self.hi
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneParams {
    /// Extension of the entry zone past the 0.886 level, as a fraction of |A − D|.
    pub zone_buffer: f64,
}

impl Default for ZoneParams {
    fn default() -> Self {
        Self { zone_buffer: 0.02 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub pattern_id: String,
    pub direction: Direction,
    pub level_886: f64,
    /// Far side of the entry zone from D.
    pub outer_edge: f64,
    pub entry_zone: PriceRange,
    pub rebound_zone: PriceRange,
    /// Nearest first in the trade direction.
    pub take_profits: Vec<f64>,
    pub built_at: u64,
}

pub fn build_zone(pattern: &Pattern, params: &ZoneParams, now: u64) -> Result<Zone> {
    let [x, a, b, c, d] = pattern.points();
    let legs = [
        ("XA", (a.price - x.price).abs()),
        ("AB", (b.price - a.price).abs()),
        ("BC", (c.price - b.price).abs()),
        ("CD", (d.price - c.price).abs()),
        ("AD", (a.price - d.price).abs()),
    ];
    for (leg, len) in legs {
        if len <= f64::EPSILON {
            return Err(CoreError::DegenerateLeg { leg });
        }
    }

    let sign = pattern.direction.sign();
    let ad = (a.price - d.price).abs();
    let cd = (c.price - d.price).abs();

    let level_886 = d.price + sign * RETRACEMENT * ad;
    let outer_edge = level_886 + sign * params.zone_buffer * ad;
    let take_profits = TAKE_PROFIT_FRACTIONS.iter().map(|f| level_886 + sign * f * cd).collect();

    Ok(Zone {
        pattern_id: pattern.id.clone(),
        direction: pattern.direction,
        level_886,
        outer_edge,
        entry_zone: PriceRange::between(d.price, outer_edge),
        rebound_zone: PriceRange::between(level_886, c.price),
        take_profits,
        built_at: now,
    })
}

//! Position sizing and stop placement.
//!
//! All sizing functions return a quantity (in base asset units).

use crate::exchange::Direction;

// =============================================================================
// Stop placement
// =============================================================================

/// Stop just past the D point, away from the trade direction.
///
/// buffer_pct: fraction of D's price (e.g., 0.0005 = 0.05%)
pub fn stop_loss_for(direction: Direction, d_price: f64, buffer_pct: f64) -> f64 {
    d_price - direction.sign() * d_price * buffer_pct
}

pub fn stop_distance(entry: f64, stop: f64) -> f64 {
    (entry - stop).abs()
}

// =============================================================================
// Risk-Based Sizing
// =============================================================================

/// Size so that a stop-out loses `risk_pct` percent of equity.
///
/// risk_pct: percentage, e.g., 1.0 = risk 1% of equity per trade
pub fn risk_based_size(equity: f64, risk_pct: f64, entry: f64, stop: f64) -> f64 {
    let distance = stop_distance(entry, stop);
    if distance <= 0.0 || equity <= 0.0 || risk_pct <= 0.0 {
        return 0.0;
    }
    let risk_amount = equity * risk_pct / 100.0;
    risk_amount / distance
}

/// Amount lost if the stop is hit at full size, before fees.
pub fn risk_amount(size: f64, entry: f64, stop: f64) -> f64 {
    size * stop_distance(entry, stop)
}

/// Signed PnL of a round trip, net of both fees.
pub fn realized_pnl(
    direction: Direction,
    entry: f64,
    exit: f64,
    size: f64,
    entry_fee: f64,
    exit_fee: f64,
) -> f64 {
    (exit - entry) * size * direction.sign() - entry_fee - exit_fee
}

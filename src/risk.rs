//! Admission checks for new entries.

use crate::logging::log_risk_check;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Accepted,
    Rejected(Rejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MaxPositions,
    ZeroStopDistance,
    NoEquity,
    CircuitOpen,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::MaxPositions => "max_positions",
            Rejection::ZeroStopDistance => "zero_stop_distance",
            Rejection::NoEquity => "no_equity",
            Rejection::CircuitOpen => "circuit_open",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionInput {
    /// Open positions plus entries whose order is in flight.
    pub slots_in_use: usize,
    pub stop_distance: f64,
    pub equity: f64,
    pub circuit_allows: bool,
}

pub struct RiskEngine {
    max_positions: usize,
}

impl RiskEngine {
    pub fn new(max_positions: usize) -> Self {
        Self { max_positions }
    }

    pub fn max_positions(&self) -> usize {
        self.max_positions
    }

    /// Concurrency check alone, used before equity is fetched.
    pub fn has_capacity(&self, slots_in_use: usize) -> bool {
        slots_in_use < self.max_positions
    }

    pub fn admit(&self, input: &AdmissionInput) -> Admission {
        let rejection = if !self.has_capacity(input.slots_in_use) {
            log_risk_check("max_positions", "reject", input.slots_in_use as f64, self.max_positions as f64);
            Some(Rejection::MaxPositions)
        } else if !input.circuit_allows {
            log_risk_check("circuit", "reject", 1.0, 0.0);
            Some(Rejection::CircuitOpen)
        } else if !(input.stop_distance > 0.0) {
            log_risk_check("stop_distance", "reject", input.stop_distance, 0.0);
            Some(Rejection::ZeroStopDistance)
        } else if !(input.equity > 0.0) {
            log_risk_check("equity", "reject", input.equity, 0.0);
            Some(Rejection::NoEquity)
        } else {
            None
        };
        match rejection {
            Some(r) => Admission::Rejected(r),
            None => {
                log_risk_check("admission", "accept", input.slots_in_use as f64, self.max_positions as f64);
                Admission::Accepted
            }
        }
    }
}

use crate::logging::{log, obj, v_num, v_str, Domain, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    /// Cooldown elapsed; the next attempt decides.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Trips after `threshold` consecutive execution failures. While open, new
/// entries are refused until `cooldown_secs` have passed, then a single
/// trial is let through.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    pub state: CircuitState,
    pub failures: u32,
    pub threshold: u32,
    pub cooldown_secs: u64,
    opened_at: u64,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown_secs: u64) -> Self {
        Self { state: CircuitState::Closed, failures: 0, threshold: threshold.max(1), cooldown_secs, opened_at: 0 }
    }

    pub fn record_success(&mut self) {
        if self.state != CircuitState::Closed {
            log(Level::Info, Domain::Exec, "circuit_closed", obj(&[("failures", v_num(self.failures as f64))]));
        }
        self.failures = 0;
        self.state = CircuitState::Closed;
    }

    pub fn record_failure(&mut self, now: u64) {
        self.failures += 1;
        let trip = self.state == CircuitState::HalfOpen || self.failures >= self.threshold;
        if trip && self.state != CircuitState::Open {
            self.state = CircuitState::Open;
            self.opened_at = now;
            log(
                Level::Warn,
                Domain::Exec,
                "circuit_open",
                obj(&[
                    ("failures", v_num(self.failures as f64)),
                    ("cooldown_secs", v_num(self.cooldown_secs as f64)),
                    ("state", v_str(self.state.as_str())),
                ]),
            );
        }
    }

    /// Whether a new entry may be attempted at `now`.
    pub fn allow(&mut self, now: u64) -> bool {
        if self.state == CircuitState::Open && now >= self.opened_at.saturating_add(self.cooldown_secs) {
            self.state = CircuitState::HalfOpen;
        }
        matches!(self.state, CircuitState::Closed | CircuitState::HalfOpen)
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_opens_on_threshold() {
        let mut cb = CircuitBreaker::new(3, 60);
        assert!(cb.allow(0));
        cb.record_failure(1);
        cb.record_failure(2);
        assert!(cb.allow(2));
        cb.record_failure(3);
        assert!(!cb.allow(4));
        assert_eq!(cb.state, CircuitState::Open);
    }

    #[test]
    fn test_circuit_resets_on_success() {
        let mut cb = CircuitBreaker::new(2, 60);
        cb.record_failure(0);
        cb.record_failure(0);
        assert!(!cb.allow(10));
        cb.record_success();
        assert!(cb.allow(10));
        assert_eq!(cb.state, CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let mut cb = CircuitBreaker::new(1, 60);
        cb.record_failure(100);
        assert!(!cb.allow(159));
        assert!(cb.allow(160));
        assert_eq!(cb.state, CircuitState::HalfOpen);
        // A failed trial reopens immediately.
        cb.record_failure(161);
        assert!(!cb.allow(162));
        assert!(cb.allow(221));
    }
}

//! Bounded retries for venue calls: every attempt runs under a timeout and
//! retryable failures back off exponentially with jitter.

use std::future::Future;

use rand::Rng;
use tokio::time::{sleep, timeout, Duration};

use crate::error::{CoreError, Result};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Relative spread of the random jitter, 0.3 = ±30%.
    pub jitter_factor: f64,
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
            jitter_factor: 0.3,
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    pub fn with_timeout_secs(secs: u64) -> Self {
        Self { attempt_timeout: Duration::from_secs(secs), ..Default::default() }
    }

    /// Un-jittered delay before retry number `retry` (0-based), capped at
    /// `max_delay_ms`.
    fn backoff_ms(&self, retry: u32) -> u64 {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms)
    }

    fn delay(&self, retry: u32) -> Duration {
        let base = self.backoff_ms(retry) as f64;
        let spread = base * self.jitter_factor.max(0.0);
        let jitter = if spread > 0.0 { rand::thread_rng().gen_range(-spread..=spread) } else { 0.0 };
        Duration::from_millis((base + jitter).max(0.0) as u64)
    }
}

/// Run `fut`, failing with `Timeout` once `limit` elapses.
pub async fn with_timeout<T, Fut>(limit: Duration, op: &str, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    timeout(limit, fut)
        .await
        .unwrap_or_else(|_| Err(CoreError::Timeout { op: op.to_string(), secs: limit.as_secs() }))
}

/// Call `operation` until it succeeds, fails with a non-retryable error, or
/// the retries run out. The last error is returned.
pub async fn retry_async<F, Fut, T>(config: &RetryConfig, op: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        let err = match with_timeout(config.attempt_timeout, op, operation()).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if !err.is_retryable() || retry >= config.max_retries {
            if retry > 0 {
                log(
                    Level::Error,
                    Domain::Exec,
                    "retry_exhausted",
                    obj(&[("op", v_str(op)), ("attempts", v_num((retry + 1) as f64)), ("error", v_str(&err.to_string()))]),
                );
            }
            return Err(err);
        }

        let delay = config.delay(retry);
        log(
            Level::Warn,
            Domain::Exec,
            "retry",
            obj(&[
                ("op", v_str(op)),
                ("attempt", v_num((retry + 1) as f64)),
                ("max_attempts", v_num((config.max_retries + 1) as f64)),
                ("error", v_str(&err.to_string())),
                ("delay_ms", v_num(delay.as_millis() as f64)),
            ]),
        );
        sleep(delay).await;
        retry += 1;
    }
}

/// HTTP statuses worth another attempt: timeouts, rate limits, 5xx gateways.
pub fn is_retryable_http_error(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter_factor: 0.0,
            attempt_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let cfg = RetryConfig { base_delay_ms: 100, max_delay_ms: 1000, jitter_factor: 0.0, ..Default::default() };
        let delays: Vec<u64> = (0..5).map(|r| cfg.backoff_ms(r)).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000]);
        assert_eq!(cfg.backoff_ms(80), 1000);
        assert_eq!(cfg.delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_jitter_stays_in_spread() {
        let cfg = RetryConfig { base_delay_ms: 100, max_delay_ms: 100, jitter_factor: 0.5, ..Default::default() };
        for _ in 0..50 {
            let ms = cfg.delay(0).as_millis();
            assert!((50..=150).contains(&ms));
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let result = retry_async(&quick(3), "place_order", || async move {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(CoreError::Execution("busy".into())),
                _ => Ok("filled"),
            }
        })
        .await;
        assert_eq!(result, Ok("filled"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_returns_last_error_when_exhausted() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = retry_async(&quick(2), "close_order", || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::Execution(format!("down {}", n)))
        })
        .await;
        assert_eq!(result, Err(CoreError::Execution("down 2".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_configuration_error_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = retry_async(&quick(3), "get_equity", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::Configuration("bad key".into()))
        })
        .await;
        assert!(matches!(result, Err(CoreError::Configuration(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_attempt_times_out() {
        let result: Result<u8> = with_timeout(Duration::from_millis(10), "klines", async {
            sleep(Duration::from_secs(5)).await;
            Ok(1)
        })
        .await;
        assert_eq!(result, Err(CoreError::Timeout { op: "klines".into(), secs: 0 }));
        assert!(is_retryable_http_error(429) && !is_retryable_http_error(400));
    }
}

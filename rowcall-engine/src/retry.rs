//! Bounded retry with exponential backoff

use rowcall_core::{CallError, EngineConfig};
use std::future::Future;
use std::time::Duration;

/// How often and how patiently a transient failure is re-attempted.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never below 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts.max(1),
            initial_backoff: config.retry_initial_backoff(),
            max_backoff: config.retry_max_backoff(),
            multiplier: config.retry_backoff_multiplier,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    ///
    /// `initial * multiplier^(attempt-1)`, capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let initial_ms = self.initial_backoff.as_millis() as f64;
        let max_ms = self.max_backoff.as_millis() as f64;
        let delay_ms = initial_ms * self.multiplier.powi(exponent);
        if !delay_ms.is_finite() || delay_ms >= max_ms {
            return self.max_backoff;
        }
        Duration::from_millis(delay_ms as u64)
    }

    /// Delay before the next attempt.
    ///
    /// A service-provided retry-after replaces the computed backoff, but is
    /// still capped at `max_backoff`.
    pub fn delay_for(&self, err: &CallError, attempt: u32) -> Duration {
        match err.retry_after_ms() {
            Some(ms) => Duration::from_millis(ms).min(self.max_backoff),
            None => self.backoff_for(attempt),
        }
    }

    /// Run `op` until it succeeds, fails non-transiently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. The last error is returned
    /// unchanged.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, CallError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(&err, attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error_type = %err.error_type(),
                        error = %err,
                        "Transient call failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    fn connection_error() -> CallError {
        CallError::Connection {
            service: "svc".to_string(),
            reason: "reset by peer".to_string(),
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1_000),
            multiplier: 2.0,
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(800));
        assert_eq!(policy.backoff_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_for(500), Duration::from_millis(1_000));
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let policy = RetryPolicy::default();
        let err = CallError::RateLimited {
            service: "svc".to_string(),
            retry_after_ms: 7,
        };
        assert_eq!(policy.delay_for(&err, 3), Duration::from_millis(7));
        assert_eq!(
            policy.delay_for(&connection_error(), 1),
            policy.initial_backoff
        );
    }

    #[test]
    fn test_retry_after_is_capped() {
        let policy = fast_policy(3);
        let err = CallError::RateLimited {
            service: "svc".to_string(),
            retry_after_ms: 1_000_000_000_000,
        };
        assert_eq!(policy.delay_for(&err, 1), Duration::from_millis(5));
    }

    #[test]
    fn test_no_retry_policy() {
        assert_eq!(RetryPolicy::no_retry().max_attempts, 1);
    }

    #[tokio::test]
    async fn test_run_succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let result = fast_policy(3)
            .run(|_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(connection_error())
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(4)
            .run(|_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(connection_error())
            })
            .await;
        assert_eq!(result, Err(connection_error()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_remote_failure() {
        let calls = AtomicU32::new(0);
        let err = CallError::RequestFailed {
            service: "svc".to_string(),
            status: 400,
            message: "bad".to_string(),
        };
        let result: Result<(), _> = fast_policy(5)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                let err = err.clone();
                async move { Err(err) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_passes_attempt_numbers() {
        let mut seen = Vec::new();
        let _: Result<(), _> = fast_policy(3)
            .run(|attempt| {
                seen.push(attempt);
                async { Err(connection_error()) }
            })
            .await;
        assert_eq!(seen, vec![1, 2, 3]);
    }
}

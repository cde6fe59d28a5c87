//! Shared outbound rate limiter

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rowcall_core::{ConfigError, EngineConfig, RowcallResult};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Throttles outbound calls to at most `calls` per `period`.
///
/// One instance is built per invocation and shared by every worker through an
/// `Arc`. A caller over quota waits for a slot; quota alone never fails a call.
pub struct CallLimiter {
    inner: Option<DefaultDirectRateLimiter>,
    quota: Option<(u32, Duration)>,
    granted: AtomicU64,
}

impl CallLimiter {
    /// A limiter that never waits.
    pub fn unlimited() -> Self {
        Self {
            inner: None,
            quota: None,
            granted: AtomicU64::new(0),
        }
    }

    /// Allow `calls` calls per `period`, with a burst of `calls`.
    pub fn new(calls: u32, period: Duration) -> Result<Self, ConfigError> {
        let burst = NonZeroU32::new(calls).ok_or_else(|| ConfigError::InvalidValue {
            field: "rate_limit_calls".to_string(),
            value: calls.to_string(),
            reason: "rate_limit_calls must be greater than 0".to_string(),
        })?;
        let quota = Quota::with_period(period / calls)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "rate_limit_period_secs".to_string(),
                value: format!("{:?}", period),
                reason: "rate limit period is too short for the number of calls".to_string(),
            })?
            .allow_burst(burst);

        Ok(Self {
            inner: Some(RateLimiter::direct(quota)),
            quota: Some((calls, period)),
            granted: AtomicU64::new(0),
        })
    }

    /// Build the limiter described by `config`, unlimited if no quota is set.
    pub fn from_config(config: &EngineConfig) -> RowcallResult<Self> {
        match config.rate_limit()? {
            Some((calls, period)) => Ok(Self::new(calls, period)?),
            None => Ok(Self::unlimited()),
        }
    }

    /// Wait until a call slot is available and take it.
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.inner {
            limiter.until_ready().await;
        }
        self.granted.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of slots handed out so far.
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }

    pub fn is_limited(&self) -> bool {
        self.inner.is_some()
    }

    pub fn quota(&self) -> Option<(u32, Duration)> {
        self.quota
    }
}

impl std::fmt::Debug for CallLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallLimiter")
            .field("quota", &self.quota)
            .field("granted", &self.granted())
            .finish()
    }
}

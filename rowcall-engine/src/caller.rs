//! Unit caller and the per-attempt call pipeline
//!
//! [`CallPipeline`] is the object every worker runs. For one unit or batch it
//! takes a limiter slot, runs the user call (optionally under a timeout),
//! retries transient failures, and finally lets [`UnitCaller`] decide whether
//! a failure is isolated onto the unit or aborts the run.

use crate::batch::{correlate, BatchEntryError, BatchResponse};
use crate::call::{BatchCall, RowCall};
use crate::limiter::CallLimiter;
use crate::retry::RetryPolicy;
use rowcall_core::{
    Batch, BatchError, CallError, CallFailure, CallResult, EngineConfig, ErrorHandling, ErrorKind,
    RowcallError, RowcallResult, Unit,
};
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// DECLARED ERRORS
// ============================================================================

/// Error kinds that may be isolated onto a unit under [`ErrorHandling::Log`].
///
/// [`ErrorKind::Fatal`] can never be declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredErrors {
    kinds: BTreeSet<ErrorKind>,
}

impl Default for DeclaredErrors {
    fn default() -> Self {
        Self::none()
            .with(ErrorKind::Transient)
            .with(ErrorKind::RemoteFailure)
    }
}

impl DeclaredErrors {
    /// Declare nothing; every failure aborts the run.
    pub fn none() -> Self {
        Self {
            kinds: BTreeSet::new(),
        }
    }

    /// Also isolate `kind`. Declaring `Fatal` has no effect.
    pub fn with(mut self, kind: ErrorKind) -> Self {
        if kind != ErrorKind::Fatal {
            self.kinds.insert(kind);
        }
        self
    }

    pub fn contains(&self, kind: ErrorKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = ErrorKind> + '_ {
        self.kinds.iter().copied()
    }
}

// ============================================================================
// UNIT CALLER
// ============================================================================

/// Turns the final outcome of a call into a [`CallResult`] or a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitCaller {
    policy: ErrorHandling,
    declared: DeclaredErrors,
    verbose: bool,
}

impl UnitCaller {
    pub fn new(policy: ErrorHandling, declared: DeclaredErrors, verbose: bool) -> Self {
        Self {
            policy,
            declared,
            verbose,
        }
    }

    pub fn policy(&self) -> ErrorHandling {
        self.policy
    }

    fn isolates(&self, kind: ErrorKind) -> bool {
        self.policy == ErrorHandling::Log && self.declared.contains(kind)
    }

    /// Classify the outcome of the call for the unit at `position`.
    pub fn settle(
        &self,
        position: usize,
        outcome: Result<Value, CallError>,
    ) -> RowcallResult<CallResult> {
        match outcome {
            Ok(response) => Ok(CallResult::success(response)),
            Err(err) if self.isolates(err.kind()) => {
                tracing::warn!(
                    position,
                    error_type = %err.error_type(),
                    error = %err,
                    "API call failed, recording error on row"
                );
                Ok(CallResult::Failure(CallFailure::from_call_error(
                    &err,
                    self.verbose,
                )))
            }
            Err(err) => Err(RowcallError::Call {
                position,
                source: err,
            }),
        }
    }

    /// Classify the outcome of a whole batch call, one result per unit.
    ///
    /// A failed call gives every unit the same failure. A successful call is
    /// correlated by embedded position; under [`ErrorHandling::Fail`] any
    /// per-entry error aborts the run. A malformed response aborts the run
    /// under either policy.
    pub fn settle_batch(
        &self,
        batch: &Batch,
        service: &str,
        outcome: Result<BatchResponse, CallError>,
    ) -> RowcallResult<Vec<(usize, CallResult)>> {
        let response = match outcome {
            Ok(response) => response,
            Err(CallError::MalformedBatch { reason, .. }) => {
                return Err(BatchError::MalformedResponse {
                    batch: batch.index(),
                    reason,
                }
                .into());
            }
            Err(err) => {
                let first = batch.origin_of(0).unwrap_or_default();
                let failure = self.settle(first, Err(err))?;
                tracing::debug!(
                    batch = batch.index(),
                    size = batch.len(),
                    "Batch call failed as a whole"
                );
                return Ok(batch
                    .units()
                    .iter()
                    .map(|unit| (unit.position(), failure.clone()))
                    .collect());
            }
        };

        if self.policy == ErrorHandling::Fail && response.has_errors() {
            return Err(BatchError::RemoteErrors {
                batch: batch.index(),
                count: response.errors.len(),
                messages: response.errors.iter().map(|e| e.message.clone()).collect(),
            }
            .into());
        }

        let outcomes = correlate(batch, response)?;
        Ok(outcomes
            .into_iter()
            .map(|(origin, outcome)| {
                let result = match outcome {
                    Ok(value) => CallResult::success(value),
                    Err(entry) => {
                        tracing::warn!(
                            position = origin,
                            batch = batch.index(),
                            error = %entry.message,
                            "API returned an error for row in batch"
                        );
                        CallResult::Failure(self.entry_failure(service, entry))
                    }
                };
                (origin, result)
            })
            .collect())
    }

    fn entry_failure(&self, service: &str, entry: BatchEntryError) -> CallFailure {
        CallFailure {
            kind: ErrorKind::RemoteFailure,
            error_type: entry
                .error_type
                .map(|t| format!("{}.{}", service, t))
                .unwrap_or_else(|| format!("{}.{}", service, ErrorKind::RemoteFailure)),
            message: entry.message,
            raw: if self.verbose { entry.raw } else { None },
        }
    }
}

// ============================================================================
// CALL PIPELINE
// ============================================================================

/// Rate limit, timeout, retry and classification for one unit or batch.
///
/// Built once per invocation; the limiter inside is shared by every task.
#[derive(Debug, Clone)]
pub struct CallPipeline {
    limiter: Arc<CallLimiter>,
    retry: RetryPolicy,
    timeout: Option<Duration>,
    caller: UnitCaller,
}

impl CallPipeline {
    pub fn new(
        limiter: Arc<CallLimiter>,
        retry: RetryPolicy,
        timeout: Option<Duration>,
        caller: UnitCaller,
    ) -> Self {
        Self {
            limiter,
            retry,
            timeout,
            caller,
        }
    }

    /// Build the pipeline described by `config`, with its own limiter.
    pub fn from_config(config: &EngineConfig, declared: DeclaredErrors) -> RowcallResult<Self> {
        Ok(Self::new(
            Arc::new(CallLimiter::from_config(config)?),
            RetryPolicy::from_config(config),
            config.call_timeout(),
            UnitCaller::new(config.error_handling, declared, config.verbose),
        ))
    }

    pub fn limiter(&self) -> &Arc<CallLimiter> {
        &self.limiter
    }

    pub fn caller(&self) -> &UnitCaller {
        &self.caller
    }

    /// One attempt: take a limiter slot, then run the call.
    async fn attempt<T, Fut>(&self, service: &str, call: Fut) -> Result<T, CallError>
    where
        Fut: Future<Output = Result<T, CallError>>,
    {
        self.limiter.acquire().await;
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| {
                    Err(CallError::Timeout {
                        service: service.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    })
                }),
            None => call.await,
        }
    }

    /// Run the full pipeline for one unit.
    pub async fn call_unit(&self, call: &dyn RowCall, unit: &Unit) -> RowcallResult<CallResult> {
        let service = call.service_name();
        let outcome = self
            .retry
            .run(move |_| self.attempt(service, call.call(unit)))
            .await;
        self.caller.settle(unit.position(), outcome)
    }

    /// Run the full pipeline for one batch, one result per unit.
    pub async fn call_batch(
        &self,
        call: &dyn BatchCall,
        batch: &Batch,
    ) -> RowcallResult<Vec<(usize, CallResult)>> {
        let service = call.service_name();
        let outcome = self
            .retry
            .run(move |_| self.attempt(service, call.call_batch(batch)))
            .await;
        self.caller.settle_batch(batch, service, outcome)
    }
}

// =============================================================================
// TESTS
// =============================================================================

//! Remote call traits
//!
//! The engine never knows what a call does. Implementations turn a unit (or a
//! batch of units) into a request, send it, and hand back the parsed response
//! or a classified [`CallError`].

use crate::batch::BatchResponse;
use async_trait::async_trait;
use rowcall_core::{Batch, CallError, Unit};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Default service label for calls that do not name one.
pub const DEFAULT_SERVICE_NAME: &str = "api";

// ============================================================================
// ROW CALL
// ============================================================================

/// A remote call made once per unit.
/// Implementations must be thread-safe (Send + Sync).
///
/// # Example
/// ```ignore
/// struct Sentiment { client: HttpRowCall }
///
/// #[async_trait]
/// impl RowCall for Sentiment {
///     async fn call(&self, unit: &Unit) -> Result<Value, CallError> {
///         self.client.call(unit).await
///     }
/// }
/// ```
#[async_trait]
pub trait RowCall: Send + Sync {
    /// Call the remote service for one unit.
    async fn call(&self, unit: &Unit) -> Result<Value, CallError>;

    /// Service label used for errors the engine raises on the call's behalf.
    fn service_name(&self) -> &str {
        DEFAULT_SERVICE_NAME
    }
}

#[async_trait]
impl<T: RowCall + ?Sized> RowCall for Arc<T> {
    async fn call(&self, unit: &Unit) -> Result<Value, CallError> {
        (**self).call(unit).await
    }

    fn service_name(&self) -> &str {
        (**self).service_name()
    }
}

// ============================================================================
// BATCH CALL
// ============================================================================

/// A remote call made once per batch of units.
///
/// The response must report each unit's outcome by its position within the
/// batch; list order carries no meaning.
#[async_trait]
pub trait BatchCall: Send + Sync {
    async fn call_batch(&self, batch: &Batch) -> Result<BatchResponse, CallError>;

    fn service_name(&self) -> &str {
        DEFAULT_SERVICE_NAME
    }
}

#[async_trait]
impl<T: BatchCall + ?Sized> BatchCall for Arc<T> {
    async fn call_batch(&self, batch: &Batch) -> Result<BatchResponse, CallError> {
        (**self).call_batch(batch).await
    }

    fn service_name(&self) -> &str {
        (**self).service_name()
    }
}

// ============================================================================
// CLOSURE ADAPTERS
// ============================================================================

/// [`RowCall`] backed by an async closure.
pub struct RowCallFn<F> {
    service: String,
    f: F,
}

/// Adapt an async closure taking an owned [`Unit`] into a [`RowCall`].
pub fn row_call_fn<F, Fut>(service: impl Into<String>, f: F) -> RowCallFn<F>
where
    F: Fn(Unit) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, CallError>> + Send,
{
    RowCallFn {
        service: service.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> RowCall for RowCallFn<F>
where
    F: Fn(Unit) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, CallError>> + Send,
{
    async fn call(&self, unit: &Unit) -> Result<Value, CallError> {
        (self.f)(unit.clone()).await
    }

    fn service_name(&self) -> &str {
        &self.service
    }
}

impl<F> std::fmt::Debug for RowCallFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowCallFn")
            .field("service", &self.service)
            .finish()
    }
}

/// [`BatchCall`] backed by an async closure.
pub struct BatchCallFn<F> {
    service: String,
    f: F,
}

/// Adapt an async closure taking an owned [`Batch`] into a [`BatchCall`].
pub fn batch_call_fn<F, Fut>(service: impl Into<String>, f: F) -> BatchCallFn<F>
where
    F: Fn(Batch) -> Fut + Send + Sync,
    Fut: Future<Output = Result<BatchResponse, CallError>> + Send,
{
    BatchCallFn {
        service: service.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> BatchCall for BatchCallFn<F>
where
    F: Fn(Batch) -> Fut + Send + Sync,
    Fut: Future<Output = Result<BatchResponse, CallError>> + Send,
{
    async fn call_batch(&self, batch: &Batch) -> Result<BatchResponse, CallError> {
        (self.f)(batch.clone()).await
    }

    fn service_name(&self) -> &str {
        &self.service
    }
}

impl<F> std::fmt::Debug for BatchCallFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCallFn")
            .field("service", &self.service)
            .finish()
    }
}

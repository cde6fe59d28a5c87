//! Bounded parallel dispatch
//!
//! At most `workers` tasks run at once on the tokio runtime. A new task is
//! submitted each time one completes. Results are tagged with the index of
//! the task that produced them; completion order carries no meaning.

use rowcall_core::{RowcallError, RowcallResult};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;

// ============================================================================
// PROGRESS
// ============================================================================

/// Completed vs total tasks of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchProgress {
    pub completed: usize,
    pub total: usize,
}

/// Receives a progress update after each task completes.
/// Implementations must be thread-safe (Send + Sync).
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, progress: DispatchProgress);
}

// ============================================================================
// DISPATCHER
// ============================================================================

/// Runs tasks on a bounded pool of tokio tasks.
#[derive(Clone)]
pub struct Dispatcher {
    workers: usize,
    listener: Option<Arc<dyn ProgressListener>>,
}

impl Dispatcher {
    /// A dispatcher keeping at most `workers` tasks in flight (at least one).
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `task_fn` over every task, at most `workers` at a time.
    ///
    /// Returns `(task index, result)` pairs in completion order. The first
    /// error stops further submissions; tasks already running are drained and
    /// their results discarded, and that first error is returned. A panicking
    /// task counts as an error.
    pub async fn dispatch<T, R, F, Fut>(
        &self,
        tasks: Vec<T>,
        task_fn: F,
    ) -> RowcallResult<Vec<(usize, R)>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future<Output = RowcallResult<R>> + Send + 'static,
    {
        let total = tasks.len();
        let mut pending = tasks.into_iter().enumerate();
        let mut in_flight: JoinSet<(usize, RowcallResult<R>)> = JoinSet::new();
        let mut results = Vec::with_capacity(total);
        let mut first_error: Option<RowcallError> = None;
        let mut completed = 0;

        self.submit(&mut in_flight, &mut pending, &task_fn);

        while let Some(joined) = in_flight.join_next().await {
            completed += 1;
            match joined {
                Ok((index, Ok(result))) => {
                    if first_error.is_none() {
                        results.push((index, result));
                    }
                }
                Ok((index, Err(e))) => {
                    if first_error.is_none() {
                        tracing::error!(task = index, error = %e, "Task failed, stopping dispatch");
                        first_error = Some(e);
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        tracing::error!(error = %join_err, "Task panicked, stopping dispatch");
                        first_error = Some(RowcallError::Worker {
                            reason: join_err.to_string(),
                        });
                    }
                }
            }

            tracing::debug!(completed, total, in_flight = in_flight.len(), "Task completed");
            if let Some(listener) = &self.listener {
                listener.on_progress(DispatchProgress { completed, total });
            }

            if first_error.is_none() {
                self.submit(&mut in_flight, &mut pending, &task_fn);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }

    fn submit<T, R, F, Fut>(
        &self,
        in_flight: &mut JoinSet<(usize, RowcallResult<R>)>,
        pending: &mut impl Iterator<Item = (usize, T)>,
        task_fn: &F,
    ) where
        R: Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future<Output = RowcallResult<R>> + Send + 'static,
    {
        while in_flight.len() < self.workers {
            let Some((index, task)) = pending.next() else {
                break;
            };
            let fut = task_fn(task);
            in_flight.spawn(async move { (index, fut.await) });
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers)
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rowcall_core::TableError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<DispatchProgress>>,
    }

    impl ProgressListener for Recorder {
        fn on_progress(&self, progress: DispatchProgress) {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(progress);
            }
        }
    }

    #[tokio::test]
    async fn test_dispatch_returns_every_result() {
        let dispatcher = Dispatcher::new(3);
        let tasks: Vec<u64> = (0..10).collect();
        let mut results = dispatcher
            .dispatch(tasks, |n| async move {
                tokio::time::sleep(Duration::from_millis(10 - n)).await;
                Ok(n * 2)
            })
            .await
            .unwrap();

        results.sort_by_key(|(index, _)| *index);
        assert_eq!(results.len(), 10);
        for (index, value) in results {
            assert_eq!(value, index as u64 * 2);
        }
    }

    #[tokio::test]
    async fn test_dispatch_bounds_concurrency() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new(2);

        let tasks: Vec<usize> = (0..8).collect();
        dispatcher
            .dispatch(tasks, |_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_dispatch_stops_on_first_error() {
        let started = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new(1);
        let tasks: Vec<usize> = (0..5).collect();

        let err = dispatcher
            .dispatch(tasks, |n| {
                let started = Arc::clone(&started);
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if n == 1 {
                        Err(RowcallError::Table(TableError::MissingColumnName))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RowcallError::Table(_)));
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dispatch_panic_is_worker_error() {
        let dispatcher = Dispatcher::new(2);
        let err = dispatcher
            .dispatch(vec![0usize, 1], |n| async move {
                if n == 1 {
                    panic!("worker blew up");
                }
                Ok(n)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RowcallError::Worker { .. }));
    }

    #[tokio::test]
    async fn test_dispatch_reports_progress() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(4).with_listener(recorder.clone());
        dispatcher
            .dispatch((0..6).collect::<Vec<usize>>(), |n| async move { Ok(n) })
            .await
            .unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 6);
        assert_eq!(seen.last(), Some(&DispatchProgress { completed: 6, total: 6 }));
    }

    #[tokio::test]
    async fn test_dispatch_empty() {
        let results = Dispatcher::new(4)
            .dispatch(Vec::<usize>::new(), |n| async move { Ok(n) })
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_zero_workers_means_one() {
        assert_eq!(Dispatcher::new(0).workers(), 1);
    }
}

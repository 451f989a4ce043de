// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Bounded concurrency primitive.
//!
//! CPU-bound closures run on the blocking pool behind a semaphore sized to
//! the CPU count; I/O-bound futures run behind a larger pool (cpu × 2).
//! Ordered fan-out preserves input order in its results and fails fast
//! unless told to continue on error.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("cancelled")]
    Cancelled,

    #[error("task failed: {0}")]
    Task(String),

    #[error("task panicked: {0}")]
    Panic(String),

    #[error("dependency cycle involving: {0:?}")]
    Cycle(Vec<String>),

    #[error("operation '{op}' depends on unknown operation '{dep}'")]
    UnknownDependency { op: String, dep: String },

    #[error("duplicate operation id '{0}'")]
    DuplicateId(String),
}

#[derive(Debug, Default)]
struct Metrics {
    tasks_executed: AtomicU64,
    cpu_tasks: AtomicU64,
    io_tasks: AtomicU64,
    active: AtomicU64,
    peak_active: AtomicU64,
}

impl Metrics {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_active.fetch_max(now, Ordering::Relaxed);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of executor activity.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecMetricsSnapshot {
    pub tasks_executed: u64,
    pub cpu_tasks: u64,
    pub io_tasks: u64,
    pub peak_active: u64,
}

pub struct ParallelExecutor {
    cpu: Arc<Semaphore>,
    io: Arc<Semaphore>,
    pub(crate) io_limit: usize,
    metrics: Arc<Metrics>,
}

impl ParallelExecutor {
    /// Pools sized from the machine: cpu = core count, io = cpu × 2.
    pub fn new() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::with_limits(cpus, cpus * 2)
    }

    pub fn with_limits(cpu: usize, io: usize) -> Self {
        Self {
            cpu: Arc::new(Semaphore::new(cpu.max(1))),
            io: Arc::new(Semaphore::new(io.max(1))),
            io_limit: io.max(1),
            metrics: Arc::new(Metrics::default()),
        }
    }

    pub fn metrics(&self) -> ExecMetricsSnapshot {
        ExecMetricsSnapshot {
            tasks_executed: self.metrics.tasks_executed.load(Ordering::Relaxed),
            cpu_tasks: self.metrics.cpu_tasks.load(Ordering::Relaxed),
            io_tasks: self.metrics.io_tasks.load(Ordering::Relaxed),
            peak_active: self.metrics.peak_active.load(Ordering::Relaxed),
        }
    }

    /// Run a CPU-bound closure on the blocking pool.
    pub async fn execute_cpu<T, F>(
        &self,
        task: F,
        cancel: &CancellationToken,
    ) -> Result<T, ExecError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExecError::Cancelled),
            p = self.cpu.clone().acquire_owned() => p.map_err(|_| ExecError::Cancelled)?,
        };
        self.metrics.cpu_tasks.fetch_add(1, Ordering::Relaxed);
        self.metrics.enter();
        let metrics = Arc::clone(&self.metrics);
        let handle = tokio::task::spawn_blocking(move || {
            let out = task();
            drop(permit);
            out
        });
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExecError::Cancelled),
            joined = handle => joined.map_err(|e| ExecError::Panic(e.to_string())),
        };
        metrics.exit();
        result
    }

    /// Run an I/O-bound future under the io pool.
    pub async fn execute_io<T, Fut>(
        &self,
        task: Fut,
        cancel: &CancellationToken,
    ) -> Result<T, ExecError>
    where
        Fut: Future<Output = T> + Send,
        T: Send,
    {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExecError::Cancelled),
            p = self.io.acquire() => p.map_err(|_| ExecError::Cancelled)?,
        };
        self.metrics.io_tasks.fetch_add(1, Ordering::Relaxed);
        self.metrics.enter();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExecError::Cancelled),
            out = task => Ok(out),
        };
        self.metrics.exit();
        result
    }

    /// Run a batch of fallible tasks concurrently, preserving input order in
    /// the results.
    ///
    /// Fail-fast by default: the first task error aborts everything still
    /// pending and becomes the call's error.  With `continue_on_error`, every
    /// task runs to completion and per-task results are returned.
    pub async fn execute_parallel<T>(
        &self,
        tasks: Vec<Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>>,
        continue_on_error: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Result<T, ExecError>>, ExecError>
    where
        T: Send + 'static,
    {
        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let io = Arc::clone(&self.io);
            let metrics = Arc::clone(&self.metrics);
            let child = cancel.child_token();
            handles.push(tokio::spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = child.cancelled() => return Err(ExecError::Cancelled),
                    p = io.acquire_owned() => p.map_err(|_| ExecError::Cancelled)?,
                };
                metrics.io_tasks.fetch_add(1, Ordering::Relaxed);
                metrics.enter();
                let result = tokio::select! {
                    biased;
                    _ = child.cancelled() => Err(ExecError::Cancelled),
                    out = task => out.map_err(|e| ExecError::Task(e.to_string())),
                };
                metrics.exit();
                result
            }));
        }

        let mut results: Vec<Result<T, ExecError>> = Vec::with_capacity(handles.len());
        let mut abort_rest = false;
        for handle in handles {
            if abort_rest {
                handle.abort();
                results.push(Err(ExecError::Cancelled));
                continue;
            }
            let result = match handle.await {
                Ok(r) => r,
                Err(e) => Err(ExecError::Panic(e.to_string())),
            };
            if result.is_err() && !continue_on_error {
                // Fail fast: everything still pending is aborted via the
                // remaining handles; the first error becomes the call's error.
                abort_rest = true;
            }
            results.push(result);
        }

        if !continue_on_error {
            if let Some(pos) = results.iter().position(|r| r.is_err()) {
                return Err(results
                    .swap_remove(pos)
                    .err()
                    .unwrap_or(ExecError::Cancelled));
            }
        }
        Ok(results)
    }
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[tokio::test]
    async fn cpu_task_returns_value() {
        let exec = ParallelExecutor::with_limits(2, 4);
        let out = exec
            .execute_cpu(|| 40 + 2, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, 42);
        assert_eq!(exec.metrics().cpu_tasks, 1);
    }

    #[tokio::test]
    async fn io_task_returns_value() {
        let exec = ParallelExecutor::with_limits(2, 4);
        let out = exec
            .execute_io(async { "done" }, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "done");
        assert_eq!(exec.metrics().io_tasks, 1);
    }

    #[tokio::test]
    async fn cancelled_cpu_task_reports_cancelled() {
        let exec = ParallelExecutor::with_limits(1, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = exec.execute_cpu(|| 1, &cancel).await.unwrap_err();
        assert!(matches!(err, ExecError::Cancelled));
    }

    #[tokio::test]
    async fn parallel_preserves_input_order() {
        let exec = ParallelExecutor::with_limits(2, 8);
        let tasks: Vec<Pin<Box<dyn Future<Output = anyhow::Result<usize>> + Send>>> = (0..6)
            .map(|i| {
                let fut: Pin<Box<dyn Future<Output = anyhow::Result<usize>> + Send>> =
                    Box::pin(async move {
                        // Later tasks finish earlier; order must still hold.
                        tokio::time::sleep(std::time::Duration::from_millis(60 - i as u64 * 10))
                            .await;
                        Ok(i)
                    });
                fut
            })
            .collect();
        let results = exec
            .execute_parallel(tasks, true, &CancellationToken::new())
            .await
            .unwrap();
        let values: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn parallel_fail_fast_surfaces_first_error() {
        let exec = ParallelExecutor::with_limits(2, 8);
        let tasks: Vec<Pin<Box<dyn Future<Output = anyhow::Result<u32>> + Send>>> = vec![
            Box::pin(async { Ok(1) }),
            Box::pin(async { anyhow::bail!("boom") }),
            Box::pin(async { Ok(3) }),
        ];
        let err = exec
            .execute_parallel(tasks, false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Task(msg) if msg.contains("boom")));
    }

    #[tokio::test]
    async fn parallel_continue_on_error_returns_all() {
        let exec = ParallelExecutor::with_limits(2, 8);
        let tasks: Vec<Pin<Box<dyn Future<Output = anyhow::Result<u32>> + Send>>> = vec![
            Box::pin(async { Ok(1) }),
            Box::pin(async { anyhow::bail!("boom") }),
            Box::pin(async { Ok(3) }),
        ];
        let results = exec
            .execute_parallel(tasks, true, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(*results[0].as_ref().unwrap(), 1);
        assert!(results[1].is_err());
        assert_eq!(*results[2].as_ref().unwrap(), 3);
    }

    #[tokio::test]
    async fn io_pool_bounds_concurrency() {
        static ACTIVE: AtomicUsize = AtomicUsize::new(0);
        static PEAK: AtomicUsize = AtomicUsize::new(0);

        let exec = ParallelExecutor::with_limits(1, 2);
        let tasks: Vec<Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>> = (0..6)
            .map(|_| {
                let fut: Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> =
                    Box::pin(async {
                        let now = ACTIVE.fetch_add(1, Ordering::SeqCst) + 1;
                        PEAK.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        ACTIVE.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    });
                fut
            })
            .collect();
        exec.execute_parallel(tasks, true, &CancellationToken::new())
            .await
            .unwrap();
        assert!(
            PEAK.load(Ordering::SeqCst) <= 2,
            "io pool of 2 must never run more than 2 tasks at once (peak {})",
            PEAK.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn metrics_track_peak_active() {
        let exec = ParallelExecutor::with_limits(2, 4);
        let tasks: Vec<Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>> = (0..4)
            .map(|_| {
                let fut: Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> =
                    Box::pin(async {
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        Ok(())
                    });
                fut
            })
            .collect();
        exec.execute_parallel(tasks, true, &CancellationToken::new())
            .await
            .unwrap();
        let m = exec.metrics();
        assert_eq!(m.tasks_executed, 4);
        assert!(m.peak_active >= 1);
    }
}

// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Dependency-ordered execution.
//!
//! Operations form a DAG; cycles are detected up front and yield an error
//! with zero executions.  Execution proceeds in topological waves: within a
//! wave every ready operation runs concurrently, and each operation receives
//! the completed results of its dependencies.  A failing operation fails all
//! transitive dependents; independent subgraphs continue.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{ExecError, ParallelExecutor};

pub type DagFuture<T> = Pin<Box<dyn std::future::Future<Output = anyhow::Result<T>> + Send>>;

/// One operation in a dependency graph.
pub struct DagOp<T> {
    pub id: String,
    pub dependencies: Vec<String>,
    /// Invoked with the completed results of this op's dependencies, keyed
    /// by dependency id.
    pub task: Arc<dyn Fn(HashMap<String, T>) -> DagFuture<T> + Send + Sync>,
}

impl<T> DagOp<T> {
    pub fn new<F>(id: impl Into<String>, dependencies: Vec<String>, task: F) -> Self
    where
        F: Fn(HashMap<String, T>) -> DagFuture<T> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            dependencies,
            task: Arc::new(task),
        }
    }
}

/// Outcome of one DAG operation, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DagResult<T> {
    Completed(T),
    Failed(String),
    /// Not executed because a (transitive) dependency failed.
    Skipped { failed_dependency: String },
}

impl<T> DagResult<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, DagResult::Completed(_))
    }
}

impl ParallelExecutor {
    /// Execute a dependency DAG.  Results come back in input order.
    pub async fn execute_with_dependencies<T>(
        &self,
        ops: Vec<DagOp<T>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<DagResult<T>>, ExecError>
    where
        T: Clone + Send + 'static,
    {
        validate_graph(&ops)?;

        let order: Vec<String> = ops.iter().map(|op| op.id.clone()).collect();
        let mut pending: HashMap<String, DagOp<T>> =
            ops.into_iter().map(|op| (op.id.clone(), op)).collect();
        let mut completed: HashMap<String, T> = HashMap::new();
        // op id → the originally failing dependency id.
        let mut failed: HashMap<String, String> = HashMap::new();
        let mut errors: HashMap<String, String> = HashMap::new();

        while !pending.is_empty() {
            if cancel.is_cancelled() {
                return Err(ExecError::Cancelled);
            }

            // Propagate failures to dependents before looking for ready work.
            loop {
                let newly_skipped: Vec<(String, String)> = pending
                    .values()
                    .filter_map(|op| {
                        op.dependencies.iter().find_map(|dep| {
                            failed
                                .get(dep)
                                .map(|root| (op.id.clone(), root.clone()))
                        })
                    })
                    .collect();
                if newly_skipped.is_empty() {
                    break;
                }
                for (id, root) in newly_skipped {
                    pending.remove(&id);
                    failed.insert(id, root);
                }
            }
            if pending.is_empty() {
                break;
            }

            let ready: Vec<String> = pending
                .values()
                .filter(|op| op.dependencies.iter().all(|d| completed.contains_key(d)))
                .map(|op| op.id.clone())
                .collect();
            debug_assert!(
                !ready.is_empty(),
                "cycle check guarantees progress while ops are pending"
            );

            debug!(wave_size = ready.len(), "executing DAG wave");

            // Within a wave all ready ops run concurrently.
            let mut wave_tasks: Vec<DagFuture<T>> = Vec::with_capacity(ready.len());
            for id in &ready {
                let op = pending.remove(id).unwrap_or_else(|| unreachable!());
                let inputs: HashMap<String, T> = op
                    .dependencies
                    .iter()
                    .map(|d| (d.clone(), completed[d].clone()))
                    .collect();
                let task = Arc::clone(&op.task);
                wave_tasks.push(Box::pin(async move { task(inputs).await }));
            }

            let wave_results = self
                .execute_parallel(wave_tasks, true, cancel)
                .await?;

            for (id, result) in ready.into_iter().zip(wave_results) {
                match result {
                    Ok(value) => {
                        completed.insert(id, value);
                    }
                    Err(ExecError::Cancelled) => return Err(ExecError::Cancelled),
                    Err(e) => {
                        errors.insert(id.clone(), e.to_string());
                        failed.insert(id.clone(), id);
                    }
                }
            }
        }

        Ok(order
            .into_iter()
            .map(|id| {
                if let Some(value) = completed.remove(&id) {
                    DagResult::Completed(value)
                } else if let Some(message) = errors.remove(&id) {
                    DagResult::Failed(message)
                } else {
                    let root = failed.remove(&id).unwrap_or_else(|| "unknown".into());
                    DagResult::Skipped { failed_dependency: root }
                }
            })
            .collect())
    }
}

/// Reject duplicate ids, unknown dependencies, and cycles (Kahn's
/// algorithm).  Runs before anything executes.
fn validate_graph<T>(ops: &[DagOp<T>]) -> Result<(), ExecError> {
    let mut ids = HashSet::new();
    for op in ops {
        if !ids.insert(op.id.as_str()) {
            return Err(ExecError::DuplicateId(op.id.clone()));
        }
    }
    for op in ops {
        for dep in &op.dependencies {
            if !ids.contains(dep.as_str()) {
                return Err(ExecError::UnknownDependency {
                    op: op.id.clone(),
                    dep: dep.clone(),
                });
            }
        }
    }

    let mut in_degree: HashMap<&str, usize> = ops
        .iter()
        .map(|op| (op.id.as_str(), op.dependencies.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for op in ops {
        for dep in &op.dependencies {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(op.id.as_str());
        }
    }

    let mut queue: Vec<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0usize;
    while let Some(id) = queue.pop() {
        visited += 1;
        for dependent in dependents.get(id).into_iter().flatten() {
            let d = in_degree
                .get_mut(dependent)
                .unwrap_or_else(|| unreachable!());
            *d -= 1;
            if *d == 0 {
                queue.push(dependent);
            }
        }
    }

    if visited != ops.len() {
        let cyclic: Vec<String> = in_degree
            .into_iter()
            .filter(|(_, d)| *d > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        return Err(ExecError::Cycle(cyclic));
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

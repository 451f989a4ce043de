// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Append-only NDJSON log of diff operations.
//!
//! Every patch-engine invocation records exactly one [`DiffMetric`].  Writes
//! are serialized through a single mutex; reads scan the tail of the file
//! for the most recent records.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

/// Which engine performed a diff operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStrategy {
    Remote,
    Local,
}

impl std::fmt::Display for DiffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffStrategy::Remote => write!(f, "remote"),
            DiffStrategy::Local => write!(f, "local"),
        }
    }
}

/// One recorded diff operation.  Never mutated after being appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffMetric {
    pub timestamp: DateTime<Utc>,
    pub strategy: DiffStrategy,
    pub file: String,
    pub file_size_bytes: u64,
    pub execution_time_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub original_length: usize,
    pub updated_length: usize,
    #[serde(default)]
    pub fallback_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

/// Per-strategy rollup within a report window.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyReport {
    pub strategy: DiffStrategy,
    pub count: usize,
    pub success_rate: f64,
    pub mean_execution_ms: f64,
    pub median_execution_ms: f64,
    pub fallback_rate: f64,
    pub mean_file_size_bytes: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffReport {
    pub total: usize,
    pub strategies: Vec<StrategyReport>,
}

/// Append-only tracker backed by an NDJSON file.
pub struct DiffTracker {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl DiffTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Append one metric record.  Failures are logged, never propagated —
    /// metrics must not break the patch path.
    pub async fn record(&self, metric: &DiffMetric) {
        let _guard = self.write_lock.lock().await;
        if let Err(e) = self.append_line(metric) {
            warn!(path = %self.path.display(), "failed to record diff metric: {e}");
        }
    }

    fn append_line(&self, metric: &DiffMetric) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(metric)?;
        writeln!(f, "{line}")?;
        Ok(())
    }

    /// Return up to `max` of the most recent records, oldest first,
    /// optionally bounded below by `since`.
    pub async fn query(
        &self,
        since: Option<DateTime<Utc>>,
        max: usize,
    ) -> anyhow::Result<Vec<DiffMetric>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        // Scan from the tail: newest lines are last in an append-only log.
        let mut recent: Vec<DiffMetric> = text
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str::<DiffMetric>(line).ok())
            .filter(|m| since.map(|s| m.timestamp >= s).unwrap_or(true))
            .take(max)
            .collect();
        recent.reverse();
        Ok(recent)
    }

    /// Roll up the most recent `window` records grouped by strategy.
    pub async fn report(&self, window: usize) -> anyhow::Result<DiffReport> {
        let metrics = self.query(None, window).await?;
        Ok(build_report(&metrics))
    }
}

fn build_report(metrics: &[DiffMetric]) -> DiffReport {
    let mut strategies = Vec::new();
    for strategy in [DiffStrategy::Remote, DiffStrategy::Local] {
        let group: Vec<&DiffMetric> =
            metrics.iter().filter(|m| m.strategy == strategy).collect();
        if group.is_empty() {
            continue;
        }
        let count = group.len();
        let successes = group.iter().filter(|m| m.success).count();
        let fallbacks = group.iter().filter(|m| m.fallback_used).count();
        let mut times: Vec<u64> = group.iter().map(|m| m.execution_time_ms).collect();
        times.sort_unstable();
        let median = if times.len() % 2 == 1 {
            times[times.len() / 2] as f64
        } else {
            (times[times.len() / 2 - 1] + times[times.len() / 2]) as f64 / 2.0
        };
        strategies.push(StrategyReport {
            strategy,
            count,
            success_rate: successes as f64 / count as f64,
            mean_execution_ms: times.iter().sum::<u64>() as f64 / count as f64,
            median_execution_ms: median,
            fallback_rate: fallbacks as f64 / count as f64,
            mean_file_size_bytes: group.iter().map(|m| m.file_size_bytes).sum::<u64>() as f64
                / count as f64,
        });
    }
    DiffReport {
        total: metrics.len(),
        strategies,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

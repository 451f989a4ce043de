// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod dag;
mod executor;

pub use dag::{DagFuture, DagOp, DagResult};
pub use executor::{ExecError, ExecMetricsSnapshot, ParallelExecutor};

// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod dialect;
mod engine;
mod error;
mod local;
mod remote;

pub use dialect::{is_patch_dialect, parse_patch, FileOp, FileSection, Hunk, PatchSet};
pub use engine::{PatchEngine, PatchOutcome, PatchRequest};
pub use error::PatchError;
pub use local::apply_section;

// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
pub mod apply_edit;
pub mod grep;
pub mod list_dir;
pub mod parallel_commands;
pub mod read_file;
pub mod run_command;
pub mod write_file;

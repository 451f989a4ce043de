// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod events;
pub mod params;
pub mod registry;
pub mod tool;
pub mod validate;

pub use events::ToolEvent;
pub use params::{ArgError, ToolArgs};
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolCall, ToolOutput};

pub use builtin::apply_edit::ApplyEditTool;
pub use builtin::grep::GrepTool;
pub use builtin::list_dir::ListDirTool;
pub use builtin::parallel_commands::ParallelCommandsTool;
pub use builtin::read_file::ReadFileTool;
pub use builtin::run_command::RunCommandTool;
pub use builtin::write_file::WriteFileTool;

// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod agent;
mod error;
mod events;
mod session;

pub use agent::{Agent, AgentStatus};
pub use error::AgentError;
pub use events::AgentEvent;
pub use session::Session;

// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod error;
pub mod mock;
mod openai_compat;
mod provider;
mod types;

pub use error::ModelError;
pub use mock::{MockProvider, ScriptedProvider};
pub use openai_compat::OpenAICompatProvider;
pub use provider::{ModelProvider, ResponseStream};
pub use types::{
    AssistantTurn, CompletionRequest, FinishReason, FunctionCall, Message, MessageContent,
    ResponseEvent, Role, ToolCallRequest, ToolSchema, Usage,
};

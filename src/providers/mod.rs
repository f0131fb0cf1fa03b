//! Provider module for Chatloom
//!
//! This module contains the completion-backend abstraction and the
//! OpenAI-compatible implementation used for every configured model.

pub mod base;
pub mod openai;

pub use base::{
    CompletionRequest, CompletionResponse, FunctionCall, Message, Provider, TokenUsage, ToolCall,
};
pub use openai::OpenAiProvider;

use crate::error::Result;
use std::sync::Arc;

/// Create the default provider instance
///
/// Returns the process-wide OpenAI-compatible client. The orchestrator
/// replaces this instance atomically on configuration reload.
///
/// # Errors
///
/// Returns error if the underlying HTTP client cannot be constructed.
pub fn create_provider() -> Result<Arc<dyn Provider>> {
    Ok(Arc::new(OpenAiProvider::new()?))
}

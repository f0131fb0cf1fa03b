//! Error types for Chatloom
//!
//! This module defines all error types used throughout the library,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Chatloom operations
///
/// This enum encompasses all possible errors that can occur during
/// turn orchestration, configuration loading, provider interactions,
/// tool dispatch, and session persistence.
#[derive(Error, Debug)]
pub enum ChatloomError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider-related errors (API calls, malformed responses, etc.)
    #[error("Provider error: {0}")]
    Provider(String),

    /// A tool name has no entry in the dispatch map
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A tool handler failed or was given malformed arguments
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// A requested model name or alias is not configured
    #[error("Model {0} not found in config")]
    ModelNotFound(String),

    /// The configuration contains zero models
    #[error("No models configured")]
    NoModelsConfigured,

    /// Session storage errors (database operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Default-model preference state file errors
    #[error("Preference state error: {0}")]
    Preference(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ChatloomError {
    /// Returns true for routing failures the caller surfaces verbatim
    /// to the end user before any provider call is made.
    pub fn is_routing(&self) -> bool {
        matches!(
            self,
            ChatloomError::ModelNotFound(_) | ChatloomError::NoModelsConfigured
        )
    }
}

/// Result type alias for Chatloom operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

//! Configuration management for Chatloom
//!
//! This module handles loading, parsing, and validating configuration
//! from YAML files, including the ordered list of model endpoints and
//! the conversation settings consumed by the orchestrator.

use crate::error::{ChatloomError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Built-in provider endpoint used when neither the model nor the global
/// configuration overrides it.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

/// Main configuration structure for Chatloom
///
/// Holds the global provider fallbacks, the ordered list of configured
/// models, and conversation behavior settings. Reloadable at runtime via
/// [`crate::orchestrator::Orchestrator::reload`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Global API key, used as fallback for models without their own key
    #[serde(default)]
    pub api_key: Option<String>,

    /// Global base URL, used as fallback for models still on the built-in default
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Global system prompt, used as fallback for models without their own
    #[serde(default)]
    pub prompt: String,

    /// Ordered list of configured models; the first entry is the
    /// fallback when no default preference is persisted
    #[serde(default)]
    pub models: Vec<ScopedModelConfig>,

    /// Conversation behavior settings
    #[serde(default)]
    pub conversation: ConversationConfig,
}

/// One configured model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopedModelConfig {
    /// Canonical model name sent to the provider
    pub name: String,

    /// Optional short alias accepted wherever a model name is accepted
    #[serde(default)]
    pub alias: Option<String>,

    /// API key for this model; falls back to the global key when absent
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL for this model; a value still equal to the built-in
    /// default is overridden by a non-default global URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// System prompt for this model; falls back to the global prompt when empty
    #[serde(default)]
    pub prompt: String,

    /// Opaque extra parameters merged into every completion call
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ScopedModelConfig {
    /// Creates a minimal model config with defaults for everything but the name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            api_key: None,
            base_url: default_base_url(),
            prompt: String::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Checks whether `candidate` matches this model's name or alias
    pub fn matches(&self, candidate: &str) -> bool {
        self.name == candidate || self.alias.as_deref() == Some(candidate)
    }
}

/// Conversation behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Maximum number of persisted entries loaded into each provider call;
    /// older entries stay in storage but are not sent
    #[serde(default = "default_context_length")]
    pub context_length: usize,
}

fn default_context_length() -> usize {
    64
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            context_length: default_context_length(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            prompt: String::new(),
            models: Vec::new(),
            conversation: ConversationConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns `ChatloomError::Io` if the file cannot be read or
    /// `ChatloomError::Yaml` if parsing fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(ChatloomError::Io)?;
        let config: Config = serde_yaml::from_str(&contents).map_err(ChatloomError::Yaml)?;
        Ok(config)
    }

    /// Validates the configuration
    ///
    /// Zero models is allowed (routing fails later with
    /// `NoModelsConfigured`), but duplicate names or aliases and a zero
    /// context length are rejected outright.
    ///
    /// # Errors
    ///
    /// Returns `ChatloomError::Config` describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.conversation.context_length == 0 {
            return Err(
                ChatloomError::Config("context_length must be greater than 0".to_string()).into(),
            );
        }

        let mut seen = std::collections::HashSet::new();
        for model in &self.models {
            if model.name.is_empty() {
                return Err(ChatloomError::Config("model name must not be empty".to_string()).into());
            }
            if !seen.insert(model.name.as_str()) {
                return Err(ChatloomError::Config(format!(
                    "duplicate model name: {}",
                    model.name
                ))
                .into());
            }
            if let Some(alias) = model.alias.as_deref() {
                if !seen.insert(alias) {
                    return Err(ChatloomError::Config(format!(
                        "duplicate model alias: {}",
                        alias
                    ))
                    .into());
                }
            }
        }

        Ok(())
    }
}

/// A model configuration after router resolution
///
/// All global fallbacks have been applied: the key, base URL, and prompt
/// are the values the provider call should actually use.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    /// Canonical model name
    pub name: String,
    /// Effective API key, if any
    pub api_key: Option<String>,
    /// Effective endpoint base URL
    pub base_url: String,
    /// Effective system prompt; empty means no system message
    pub prompt: String,
    /// Extra parameters merged into every completion payload
    pub extra: serde_json::Map<String, serde_json::Value>,
}

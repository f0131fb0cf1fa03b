//! Model routing for Chatloom
//!
//! Resolves a logical model name (or none) to concrete provider connection
//! parameters, applying the global fallbacks, and maintains the persisted
//! default-model preference reconciled against the live model list.

use crate::config::{Config, ResolvedModel, ScopedModelConfig, DEFAULT_BASE_URL};
use crate::error::{ChatloomError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{info, warn};

/// Persisted router state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RouterState {
    /// Canonical name of the default model, or absent
    #[serde(default)]
    default_model: Option<String>,
}

/// Storage for the default-model preference
///
/// A small JSON state file in the user's data directory; the path can be
/// overridden with the `CHATLOOM_STATE_FILE` environment variable or
/// [`PreferenceStore::with_path`]. Reads are tolerant: a missing or
/// corrupt file is treated as an empty preference.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    /// Create a store at the default state-file location
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var("CHATLOOM_STATE_FILE") {
            return Ok(Self::with_path(override_path));
        }

        let proj_dirs = ProjectDirs::from("com", "chatloom", "chatloom").ok_or_else(|| {
            ChatloomError::Preference("Could not determine data directory".to_string())
        })?;
        Ok(Self::with_path(proj_dirs.data_dir().join("state.json")))
    }

    /// Create a store at an explicit path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Read the persisted preference
    pub fn get(&self) -> Option<String> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        let state: RouterState = serde_json::from_str(&contents).unwrap_or_default();
        state.default_model.filter(|name| !name.is_empty())
    }

    /// Write the preference, creating parent directories as needed
    pub fn set(&self, default_model: Option<&str>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ChatloomError::Preference(format!("Failed to create state directory: {}", e))
            })?;
        }
        let state = RouterState {
            default_model: default_model
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        };
        let contents = serde_json::to_string_pretty(&state).map_err(ChatloomError::Serialization)?;
        std::fs::write(&self.path, contents)
            .map_err(|e| ChatloomError::Preference(format!("Failed to write state: {}", e)))?;
        Ok(())
    }
}

/// Resolves logical model names against the live configuration
pub struct ModelRouter {
    config: RwLock<Config>,
    prefs: PreferenceStore,
}

impl ModelRouter {
    /// Create a router over `config`, reconciling the stored preference
    pub fn new(config: Config, prefs: PreferenceStore) -> Result<Self> {
        let router = Self {
            config: RwLock::new(config),
            prefs,
        };
        router.reconcile()?;
        Ok(router)
    }

    fn read_config(&self) -> Result<std::sync::RwLockReadGuard<'_, Config>> {
        self.config.read().map_err(|_| {
            ChatloomError::Config("Failed to acquire read lock on configuration".to_string()).into()
        })
    }

    /// Resolve a model name (or none) to connection parameters
    ///
    /// With no name, the persisted default is used when it still matches a
    /// configured model or alias, otherwise the first configured model.
    /// Global fallbacks are applied on a match: the global API key when the
    /// scoped one is absent, the global base URL when the scoped one is
    /// still the built-in default, and the global prompt when the scoped
    /// one is empty.
    ///
    /// # Errors
    ///
    /// - `ChatloomError::NoModelsConfigured` when the model list is empty
    /// - `ChatloomError::ModelNotFound` when a name matches nothing
    pub fn resolve(&self, name: Option<&str>) -> Result<ResolvedModel> {
        let config = self.read_config()?;
        if config.models.is_empty() {
            return Err(ChatloomError::NoModelsConfigured.into());
        }

        let requested = match name {
            Some(explicit) => explicit.to_string(),
            None => {
                let preferred = self
                    .prefs
                    .get()
                    .filter(|pref| config.models.iter().any(|m| m.matches(pref)));
                preferred.unwrap_or_else(|| config.models[0].name.clone())
            }
        };

        let model = config
            .models
            .iter()
            .find(|m| m.matches(&requested))
            .ok_or_else(|| ChatloomError::ModelNotFound(requested.clone()))?;

        Ok(fill_from_globals(model, &config))
    }

    /// Read the persisted default-model preference
    pub fn current_default(&self) -> Option<String> {
        self.prefs.get()
    }

    /// Persist a new default-model preference
    ///
    /// A name is normalized to the canonical model name when it matches an
    /// alias; an unknown name fails with `ModelNotFound`.
    pub fn set_default(&self, name: Option<&str>) -> Result<()> {
        match name {
            None => self.prefs.set(None),
            Some(requested) => {
                let config = self.read_config()?;
                let model = config
                    .models
                    .iter()
                    .find(|m| m.matches(requested))
                    .ok_or_else(|| ChatloomError::ModelNotFound(requested.to_string()))?;
                self.prefs.set(Some(&model.name))
            }
        }
    }

    /// Reconcile the persisted preference against the live model list
    ///
    /// Clears the preference when no models are configured, resets it to
    /// the first model when empty or unmatched, and normalizes an alias to
    /// the canonical name. Idempotent: returns whether a write happened;
    /// a second run with unchanged configuration writes nothing.
    pub fn reconcile(&self) -> Result<bool> {
        let config = self.read_config()?;
        let stored = self.prefs.get();

        if config.models.is_empty() {
            return if stored.is_some() {
                warn!("No models configured, clearing stored default model");
                self.prefs.set(None)?;
                Ok(true)
            } else {
                Ok(false)
            };
        }

        let first = &config.models[0].name;
        let stored = match stored {
            None => {
                info!(model = %first, "No stored default model, using first configured model");
                self.prefs.set(Some(first))?;
                return Ok(true);
            }
            Some(stored) => stored,
        };

        match config.models.iter().find(|m| m.matches(&stored)) {
            None => {
                warn!(
                    stored = %stored,
                    reset_to = %first,
                    "Stored default model is not configured, resetting"
                );
                self.prefs.set(Some(first))?;
                Ok(true)
            }
            Some(matched) if matched.name != stored => {
                info!(alias = %stored, canonical = %matched.name, "Normalizing default model alias");
                self.prefs.set(Some(&matched.name))?;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    /// Atomically adopt a new configuration, then reconcile the preference
    ///
    /// In-flight resolutions finished against the old configuration stay
    /// valid; the next resolution observes the new one.
    pub fn reload(&self, new_config: Config) -> Result<()> {
        {
            let mut config = self.config.write().map_err(|_| {
                ChatloomError::Config(
                    "Failed to acquire write lock on configuration".to_string(),
                )
            })?;
            *config = new_config;
        }
        self.reconcile()?;
        Ok(())
    }

    /// Snapshot of the configured models, in configuration order
    pub fn models(&self) -> Result<Vec<ScopedModelConfig>> {
        Ok(self.read_config()?.models.clone())
    }

    /// Maximum number of history entries sent per provider call
    pub fn context_length(&self) -> usize {
        self.read_config()
            .map(|config| config.conversation.context_length)
            .unwrap_or(64)
    }
}

fn fill_from_globals(model: &ScopedModelConfig, config: &Config) -> ResolvedModel {
    let api_key = model.api_key.clone().or_else(|| config.api_key.clone());
    let base_url = if model.base_url == DEFAULT_BASE_URL && config.base_url != DEFAULT_BASE_URL {
        config.base_url.clone()
    } else {
        model.base_url.clone()
    };
    let prompt = if model.prompt.is_empty() {
        config.prompt.clone()
    } else {
        model.prompt.clone()
    };

    ResolvedModel {
        name: model.name.clone(),
        api_key,
        base_url,
        prompt,
        extra: model.extra.clone(),
    }
}

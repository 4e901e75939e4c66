//! Named model configurations and default resolution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::base::error::PipelineError;

/// Default output token budget when an entry does not set one.
fn default_max_tokens() -> u32 {
    600
}

/// The two backend shapes the bot can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Plain text completion, no roles.
    Base,
    /// Chat completion with system/user/assistant roles, driven by prefill.
    Instruct,
}

/// A model entry as it appears in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    /// Registry key, used with `-M` and `default_model`.
    pub id: String,
    /// Human-readable name for logs.
    #[serde(default)]
    pub display_name: Option<String>,
    pub kind: ModelKind,
    /// OpenAI-compatible API base URL (e.g., `https://openrouter.ai/api/v1`).
    pub endpoint: String,
    /// Model name sent to the provider; defaults to `id`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Whether the provider accepts the `n` (number of candidates) parameter.
    #[serde(default)]
    pub supports_n_parameter: bool,
    /// Required for instruct models.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Required for instruct models.
    #[serde(default)]
    pub user_prefix: Option<String>,
}

/// A validated model configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub id: String,
    pub display_name: String,
    pub kind: ModelKind,
    pub endpoint: String,
    pub provider_model: String,
    pub max_tokens: u32,
    pub supports_n_parameter: bool,
    pub system_prompt: Option<String>,
    pub user_prefix: Option<String>,
}

impl TryFrom<ModelEntry> for ModelConfig {
    type Error = PipelineError;

    fn try_from(entry: ModelEntry) -> Result<Self, Self::Error> {
        let invalid = |reason: &str| PipelineError::InvalidModelConfig {
            id: entry.id.clone(),
            reason: reason.to_string(),
        };

        if entry.id.trim().is_empty() {
            return Err(invalid("`id` must not be empty"));
        }

        if entry.endpoint.trim().is_empty() {
            return Err(invalid("`endpoint` must not be empty"));
        }

        if entry.max_tokens == 0 {
            return Err(invalid("`max_tokens` must be at least 1"));
        }

        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());

        if entry.kind == ModelKind::Instruct {
            if !present(&entry.system_prompt) {
                return Err(invalid("instruct models require `system_prompt`"));
            }
            if !present(&entry.user_prefix) {
                return Err(invalid("instruct models require `user_prefix`"));
            }
        }

        // Base models never use the chat fields, so drop them rather than carry dead values.
        let (system_prompt, user_prefix) = match entry.kind {
            ModelKind::Base => (None, None),
            ModelKind::Instruct => (entry.system_prompt, entry.user_prefix),
        };

        Ok(Self {
            display_name: entry.display_name.unwrap_or_else(|| entry.id.clone()),
            provider_model: entry.model.unwrap_or_else(|| entry.id.clone()),
            id: entry.id,
            kind: entry.kind,
            endpoint: entry.endpoint,
            max_tokens: entry.max_tokens,
            supports_n_parameter: entry.supports_n_parameter,
            system_prompt,
            user_prefix,
        })
    }
}

/// Read-only table of models, keyed by id.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: HashMap<String, ModelConfig>,
    default_id: String,
}

impl ModelRegistry {
    /// Validate every entry and build the registry.
    ///
    /// Entries sharing an id resolve last-write-wins. A missing default is a load error.
    pub fn load(entries: impl IntoIterator<Item = ModelEntry>, default_id: &str) -> Result<Self, PipelineError> {
        let mut models = HashMap::new();

        for entry in entries {
            let model = ModelConfig::try_from(entry)?;

            if let Some(replaced) = models.insert(model.id.clone(), model) {
                warn!("Model `{}` is defined more than once; the later entry replaces the earlier one.", replaced.id);
            }
        }

        if !models.contains_key(default_id) {
            return Err(PipelineError::MissingDefaultModel(default_id.to_string()));
        }

        info!("Loaded {} model(s); default is `{}`.", models.len(), default_id);

        Ok(Self {
            models,
            default_id: default_id.to_string(),
        })
    }

    /// Resolve a model by id, or the default when no id is given.
    pub fn resolve(&self, id: Option<&str>) -> Result<&ModelConfig, PipelineError> {
        match id {
            Some(id) => self.models.get(id).ok_or_else(|| PipelineError::UnknownModel(id.to_string())),
            None => self.models.get(&self.default_id).ok_or_else(|| PipelineError::MissingDefaultModel(self.default_id.clone())),
        }
    }

    /// All registered models.
    pub fn models(&self) -> impl Iterator<Item = &ModelConfig> {
        self.models.values()
    }
}

//! Load configuration via `config` crate with env-override support.

use std::{ops::Deref, sync::Arc, time::Duration};

use serde::Deserialize;
use serde_with::{DurationSeconds, serde_as};

use crate::pipeline::registry::ModelEntry;

use super::types::Res;

/// Default trigger keyword.
fn default_keyword() -> String {
    "obliqueme".to_string()
}

/// Default number of history messages to read.
fn default_history_limit() -> u16 {
    80
}

/// Default sampling temperature when `-p` is not given.
fn default_temperature() -> f32 {
    0.8
}

/// Default prompt ceiling, in characters.
fn default_max_prompt_chars() -> usize {
    120_000
}

/// Default number of turns returned in `full` mode.
fn default_full_mode_max_lines() -> usize {
    8
}

/// By default, `full` mode stops when a speaker takes a second turn.
fn default_full_mode_stop_on_repeated_speaker() -> bool {
    true
}

/// Default deadline for a single model call.
fn default_request_timeout() -> Duration {
    Duration::from_secs(120)
}

/// Default message that cuts history off.
fn default_clear_marker() -> String {
    "oblique_clear".to_string()
}

/// Configuration for the oblique-bot application.
#[derive(Debug, Clone)]
pub struct Config {
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct ConfigInner {
    /// API key for the OpenAI-compatible model provider (`LLM_API_KEY`).
    pub llm_api_key: String,
    /// Slack app token (`SLACK_APP_TOKEN`).
    pub slack_app_token: String,
    /// Slack bot token (`SLACK_BOT_TOKEN`).
    pub slack_bot_token: String,
    /// Slack signing secret (`SLACK_SIGNING_SECRET`).
    pub slack_signing_secret: String,
    /// Trigger keyword (`KEYWORD`).
    #[serde(default = "default_keyword")]
    pub keyword: String,
    /// Number of history messages read per trigger (`HISTORY_LIMIT`).
    #[serde(default = "default_history_limit")]
    pub history_limit: u16,
    /// Model used when the invocation does not name one (`DEFAULT_MODEL`).
    pub default_model: String,
    /// Model table; later entries replace earlier ones with the same id.
    #[serde(default)]
    pub models: Vec<ModelEntry>,
    /// Temperature used when `-p` is not given (`DEFAULT_TEMPERATURE`).
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
    /// Prompt ceiling in characters (`MAX_PROMPT_CHARS`).
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    /// Maximum turns returned in `full` mode (`FULL_MODE_MAX_LINES`).
    #[serde(default = "default_full_mode_max_lines")]
    pub full_mode_max_lines: usize,
    /// Whether `full` mode stops at a speaker's second turn (`FULL_MODE_STOP_ON_REPEATED_SPEAKER`).
    #[serde(default = "default_full_mode_stop_on_repeated_speaker")]
    pub full_mode_stop_on_repeated_speaker: bool,
    /// Deadline for one model call, in seconds (`REQUEST_TIMEOUT`).
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// A message with exactly this content hides everything before it (`CLEAR_MARKER`).
    #[serde(default = "default_clear_marker")]
    pub clear_marker: String,
}

impl Default for ConfigInner {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            slack_app_token: String::new(),
            slack_bot_token: String::new(),
            slack_signing_secret: String::new(),
            keyword: default_keyword(),
            history_limit: default_history_limit(),
            default_model: String::new(),
            models: Vec::new(),
            default_temperature: default_temperature(),
            max_prompt_chars: default_max_prompt_chars(),
            full_mode_max_lines: default_full_mode_max_lines(),
            full_mode_stop_on_repeated_speaker: default_full_mode_stop_on_repeated_speaker(),
            request_timeout: default_request_timeout(),
            clear_marker: default_clear_marker(),
        }
    }
}

impl Config {
    pub fn load(explicit_path: Option<&std::path::Path>) -> Res<Self> {
        let mut cfg = config::Config::builder().add_source(config::Environment::default().prefix("OBLIQUE_BOT"));

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if std::path::Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        Self::from_inner(cfg.build()?.try_deserialize()?)
    }

    /// Wrap and validate an already-deserialized configuration.
    pub fn from_inner(inner: ConfigInner) -> Res<Self> {
        let result = Config { inner: Arc::new(inner) };

        if result.keyword.trim().is_empty() {
            return Err(anyhow::anyhow!("The trigger keyword must not be empty."));
        }

        if result.history_limit < 1 || result.history_limit > 80 {
            return Err(anyhow::anyhow!("History limit must be between 1 and 80."));
        }

        if !(0.1..=1.0).contains(&result.default_temperature) {
            return Err(anyhow::anyhow!("Default temperature must be between 0.1 and 1.0."));
        }

        if result.max_prompt_chars < 1 {
            return Err(anyhow::anyhow!("Max prompt chars must be at least 1."));
        }

        if result.full_mode_max_lines < 1 {
            return Err(anyhow::anyhow!("Full mode max lines must be at least 1."));
        }

        if result.request_timeout.is_zero() {
            return Err(anyhow::anyhow!("Request timeout must be at least one second."));
        }

        Ok(result)
    }
}

//! Prompt construction and response filtering.
//!
//! Control flow for one invocation:
//! trigger text -> [`options`] -> ([`format`] + [`registry`]) -> [`prompt`]
//! -> model call -> [`filter`] -> posted text.
//!
//! Everything here is synchronous and pure except the single awaited model
//! call in [`Pipeline::generate`]; the only shared state is the read-only
//! model registry.

pub mod filter;
pub mod format;
pub mod options;
pub mod prompt;
pub mod registry;

use std::{ops::Deref, sync::Arc};

use tracing::{info, instrument};

use crate::{
    base::{
        config::Config,
        error::PipelineError,
        types::{ChatMessage, Res},
    },
    service::llm::LlmClient,
};

use filter::{FullModePolicy, GenerationResult, filter_response};
use options::GenerationRequest;
use prompt::PromptPayload;
use registry::{ModelConfig, ModelRegistry};

/// Tunables for the pipeline, lifted out of [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub default_temperature: f32,
    pub max_prompt_chars: usize,
    pub full_mode: FullModePolicy,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_temperature: config.default_temperature,
            max_prompt_chars: config.max_prompt_chars,
            full_mode: FullModePolicy {
                max_lines: config.full_mode_max_lines,
                stop_on_repeated_speaker: config.full_mode_stop_on_repeated_speaker,
            },
        }
    }
}

/// The generation pipeline.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Debug, Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

#[derive(Debug)]
pub struct PipelineInner {
    pub registry: ModelRegistry,
    pub settings: PipelineSettings,
}

impl Deref for Pipeline {
    type Target = PipelineInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Pipeline {
    /// Build the pipeline from configuration, loading the model registry.
    ///
    /// Registry defects are fatal here, before the bot connects anywhere.
    #[instrument(name = "Pipeline::new", skip_all)]
    pub fn new(config: &Config) -> Res<Self> {
        let registry = ModelRegistry::load(config.models.iter().cloned(), &config.default_model)?;

        Ok(Self::with_registry(registry, PipelineSettings::from(config)))
    }

    pub fn with_registry(registry: ModelRegistry, settings: PipelineSettings) -> Self {
        Self {
            inner: Arc::new(PipelineInner { registry, settings }),
        }
    }

    /// Parse invocation arguments for a user.
    pub fn parse_request(&self, args: &str, display_name: &str) -> Result<GenerationRequest, PipelineError> {
        options::parse_options(args, display_name, self.settings.default_temperature)
    }

    /// Resolve the model and build its payload, without calling anything.
    pub fn prepare(&self, request: &GenerationRequest, history: &[ChatMessage]) -> Result<(&ModelConfig, PromptPayload), PipelineError> {
        let model = self.registry.resolve(request.model_id.as_deref())?;
        let lines = format::format_history(history, model.kind);
        let payload = prompt::build_payload(model, &lines, request, self.settings.max_prompt_chars)?;

        Ok((model, payload))
    }

    /// Run one generation end to end.
    #[instrument(name = "Pipeline::generate", skip_all, fields(mode = %request.mode, model = request.model_id.as_deref().unwrap_or("default")))]
    pub async fn generate(&self, llm: &LlmClient, request: &GenerationRequest, history: &[ChatMessage]) -> Result<GenerationResult, PipelineError> {
        let (model, payload) = self.prepare(request, history)?;

        self.run(llm, request, model, &payload).await
    }

    /// Call the model with a prepared payload and filter what comes back.
    pub async fn run(&self, llm: &LlmClient, request: &GenerationRequest, model: &ModelConfig, payload: &PromptPayload) -> Result<GenerationResult, PipelineError> {
        info!("Requesting completion from `{}` ({} prompt chars).", model.display_name, payload.char_count());

        let raw = llm.complete(model, payload).await?;

        info!("Received {} chars (truncated: {}).", raw.text.len(), raw.truncated);

        let filtered_text = filter_response(&raw, request, model.kind, &self.settings.full_mode)?;

        Ok(GenerationResult {
            raw_text: raw.text,
            filtered_text,
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        pipeline::{
            filter::RawCompletion,
            format::tests::message,
            registry::tests::{base_entry, instruct_entry},
        },
        service::llm::GenericLlmClient,
    };

    /// Echoes a fixed completion and records the payload it was given.
    struct FixedLlm {
        text: &'static str,
        seen: std::sync::Mutex<Vec<PromptPayload>>,
    }

    #[async_trait]
    impl GenericLlmClient for FixedLlm {
        async fn complete(&self, _model: &ModelConfig, payload: &PromptPayload) -> Result<RawCompletion, PipelineError> {
            self.seen.lock().unwrap().push(payload.clone());
            Ok(RawCompletion::from(self.text))
        }
    }

    fn pipeline() -> Pipeline {
        let registry = ModelRegistry::load([base_entry("base"), instruct_entry("chat")], "base").unwrap();

        Pipeline::with_registry(
            registry,
            PipelineSettings {
                default_temperature: 0.8,
                max_prompt_chars: 10_000,
                full_mode: FullModePolicy::default(),
            },
        )
    }

    fn llm(text: &'static str) -> (LlmClient, Arc<FixedLlm>) {
        let fixed = Arc::new(FixedLlm {
            text,
            seen: std::sync::Mutex::new(Vec::new()),
        });

        (LlmClient::new(fixed.clone()), fixed)
    }

    #[tokio::test]
    async fn test_instruct_generation() {
        let pipeline = pipeline();
        let (llm, fixed) = llm("assistant: sup\nalice: what's new");
        let request = pipeline.parse_request("-M chat", "alice").unwrap();
        let history = [message("U1", "alice", "hi"), message("U2", "bob", "yo")];

        let result = pipeline.generate(&llm, &request, &history).await.unwrap();

        assert_eq!(result.filtered_text, "sup\n- alice");
        assert_eq!(result.raw_text, "assistant: sup\nalice: what's new");

        let seen = fixed.seen.lock().unwrap();
        assert!(seen[0].continuation_text().ends_with("alice: hi\nbob: yo\nassistant:"));
    }

    #[tokio::test]
    async fn test_unknown_model_makes_no_call() {
        let pipeline = pipeline();
        let (llm, fixed) = llm("unused");
        let request = pipeline.parse_request("-M gpt-nonexistent", "alice").unwrap();

        let result = pipeline.generate(&llm, &request, &[]).await;

        assert_eq!(result, Err(PipelineError::UnknownModel("gpt-nonexistent".to_string())));
        assert!(fixed.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_seed_round_trip() {
        let pipeline = pipeline();
        let (llm, _) = llm(" and that is final");
        let request = pipeline.parse_request("-s -m self I disagree", "alice").unwrap();

        let result = pipeline.generate(&llm, &request, &[message("U2", "bob", "pizza is good")]).await.unwrap();

        assert_eq!(result.filtered_text, "I disagree and that is final");
    }
}

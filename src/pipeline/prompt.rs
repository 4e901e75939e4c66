//! Build the request payload for the selected backend shape.

use serde::Serialize;

use crate::base::error::PipelineError;

use super::{
    options::GenerationRequest,
    registry::{ModelConfig, ModelKind},
};

/// Sampling parameters shared by both backend shapes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Number of candidates to request, for providers that accept `n`.
    pub candidates: Option<u8>,
}

/// Role of one chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message of a chat payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// The request body for one model call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum PromptPayload {
    /// Plain completion for base models.
    Completion { prompt: String, params: SamplingParams },
    /// Chat completion for instruct models; the last message is assistant prefill
    /// that the provider continues rather than answers.
    Chat { messages: Vec<ChatTurn>, params: SamplingParams },
}

impl PromptPayload {
    pub fn params(&self) -> &SamplingParams {
        match self {
            PromptPayload::Completion { params, .. } | PromptPayload::Chat { params, .. } => params,
        }
    }

    /// The text the model continues from.
    pub fn continuation_text(&self) -> &str {
        match self {
            PromptPayload::Completion { prompt, .. } => prompt,
            PromptPayload::Chat { messages, .. } => messages.last().map(|turn| turn.content.as_str()).unwrap_or_default(),
        }
    }

    /// Total characters sent to the provider.
    pub fn char_count(&self) -> usize {
        match self {
            PromptPayload::Completion { prompt, .. } => prompt.chars().count(),
            PromptPayload::Chat { messages, .. } => messages.iter().map(|turn| turn.content.chars().count()).sum(),
        }
    }
}

/// Join formatted lines (ending in the cue) and append the seed text to the cue.
fn transcript(lines: &[String], seed_text: Option<&str>) -> String {
    let mut text = lines.join("\n");

    if let Some(seed) = seed_text {
        text.push(' ');
        text.push_str(seed);
    }

    text
}

/// Build the payload for `model` from formatted history lines.
///
/// `max_prompt_chars` is a hard ceiling: history is never truncated to fit.
pub fn build_payload(model: &ModelConfig, lines: &[String], request: &GenerationRequest, max_prompt_chars: usize) -> Result<PromptPayload, PipelineError> {
    let transcript = transcript(lines, request.seed_text.as_deref());

    let payload = match model.kind {
        ModelKind::Base => PromptPayload::Completion {
            prompt: transcript,
            params: SamplingParams {
                max_tokens: model.max_tokens,
                temperature: request.temperature,
                candidates: model.supports_n_parameter.then_some(1),
            },
        },
        ModelKind::Instruct => {
            let missing = |field: &str| PipelineError::InvalidModelConfig {
                id: model.id.clone(),
                reason: format!("instruct models require `{field}`"),
            };
            let system_prompt = model.system_prompt.as_deref().ok_or_else(|| missing("system_prompt"))?;
            let user_prefix = model.user_prefix.as_deref().ok_or_else(|| missing("user_prefix"))?;

            PromptPayload::Chat {
                messages: vec![
                    ChatTurn::new(ChatRole::System, system_prompt),
                    ChatTurn::new(ChatRole::User, user_prefix),
                    ChatTurn::new(ChatRole::Assistant, transcript),
                ],
                params: SamplingParams {
                    max_tokens: model.max_tokens,
                    temperature: request.temperature,
                    candidates: None,
                },
            }
        }
    };

    let length = payload.char_count();
    if length > max_prompt_chars {
        return Err(PipelineError::PromptTooLong { length, limit: max_prompt_chars });
    }

    Ok(payload)
}

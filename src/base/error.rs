//! Typed failures of the generation pipeline.
//!
//! Plumbing code uses `anyhow` (see [`crate::base::types::Res`]); the pipeline
//! keeps its own error so callers can tell user mistakes from configuration
//! defects and provider outages.

use thiserror::Error;

use super::prompts;

/// Every way a generation request can fail.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    // User input.
    /// `-m` was given something other than `self` or `full`.
    #[error("invalid mode `{0}`: expected `self` or `full`")]
    InvalidMode(String),
    /// `-n` was empty or contained whitespace.
    #[error("invalid name `{0}`: names must be a single word")]
    InvalidName(String),
    /// `-p` was not a number in `[0.1, 1.0]`.
    #[error("invalid temperature `{0}`: expected a number between 0.1 and 1.0")]
    InvalidTemperature(String),

    // Configuration.
    /// The requested model is not registered.
    #[error("unknown model `{0}`")]
    UnknownModel(String),
    /// The configured default model is not registered.
    #[error("default model `{0}` is not configured")]
    MissingDefaultModel(String),
    /// A model entry is missing a field its kind requires.
    #[error("invalid configuration for model `{id}`: {reason}")]
    InvalidModelConfig { id: String, reason: String },

    // Pipeline.
    /// The prompt exceeds the configured ceiling.
    #[error("prompt is {length} characters, over the limit of {limit}")]
    PromptTooLong { length: usize, limit: usize },
    /// Nothing was left after filtering the model output.
    #[error("the model produced no usable text")]
    EmptyGeneration,

    // Model provider.
    /// Network or HTTP failure talking to the provider.
    #[error("transport error: {0}")]
    TransportError(String),
    /// The provider throttled the request.
    #[error("rate limited by the model provider")]
    RateLimited,
    /// The provider did not answer before the deadline.
    #[error("the model provider timed out")]
    Timeout,
}

impl PipelineError {
    /// Whether a single retry is allowed for this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::RateLimited | PipelineError::Timeout)
    }

    /// The text shown in the channel when this error aborts a request.
    pub fn user_notice(&self) -> String {
        match self {
            PipelineError::InvalidMode(_) | PipelineError::InvalidName(_) | PipelineError::InvalidTemperature(_) | PipelineError::UnknownModel(_) => {
                format!("{} {}", prompts::NOTICE_PREFIX, self)
            }
            PipelineError::PromptTooLong { .. } => prompts::PROMPT_TOO_LONG_NOTICE.to_string(),
            PipelineError::EmptyGeneration => prompts::EMPTY_GENERATION_NOTICE.to_string(),
            PipelineError::MissingDefaultModel(_) | PipelineError::InvalidModelConfig { .. } | PipelineError::TransportError(_) | PipelineError::RateLimited | PipelineError::Timeout => {
                prompts::GENERIC_FAILURE_NOTICE.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_input_errors_are_reported_verbatim() {
        let notice = PipelineError::InvalidTemperature("1.5".to_string()).user_notice();

        assert!(notice.starts_with(prompts::NOTICE_PREFIX));
        assert!(notice.contains("1.5"));
    }

    #[test]
    fn test_collaborator_errors_are_generic() {
        assert_eq!(PipelineError::Timeout.user_notice(), prompts::GENERIC_FAILURE_NOTICE);
        assert_eq!(PipelineError::TransportError("boom".into()).user_notice(), prompts::GENERIC_FAILURE_NOTICE);
    }

    #[test]
    fn test_only_throttling_and_timeouts_retry() {
        assert!(PipelineError::RateLimited.is_retryable());
        assert!(PipelineError::Timeout.is_retryable());
        assert!(!PipelineError::TransportError("400 Bad Request".into()).is_retryable());
        assert!(!PipelineError::EmptyGeneration.is_retryable());
    }
}

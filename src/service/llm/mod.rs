pub mod openai;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::{
    base::error::PipelineError,
    pipeline::{filter::RawCompletion, prompt::PromptPayload, registry::ModelConfig},
};

// Traits.

/// Generic LLM client trait that clients must implement.
///
/// This is the model transport: it sends one payload to the endpoint of the
/// given model and returns the verbatim output. Implementing this trait allows
/// different providers (or test doubles) to be used with the oblique-bot.
#[async_trait]
pub trait GenericLlmClient: Send + Sync + 'static {
    /// Send a payload and wait for the raw completion.
    ///
    /// Failures are reported as `TransportError`, `RateLimited`, or `Timeout`.
    async fn complete(&self, model: &ModelConfig, payload: &PromptPayload) -> Result<RawCompletion, PipelineError>;
}

// Structs.

/// LLM client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct LlmClient {
    inner: Arc<dyn GenericLlmClient>,
}

impl Deref for LlmClient {
    type Target = dyn GenericLlmClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl LlmClient {
    pub fn new(inner: Arc<dyn GenericLlmClient>) -> Self {
        Self { inner }
    }
}

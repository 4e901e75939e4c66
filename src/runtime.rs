//! Runtime services and shared state for the oblique-bot.

use tracing::instrument;

use crate::{
    base::{
        config::Config,
        types::{Res, Void},
    },
    pipeline::Pipeline,
    service::{chat::ChatClient, llm::LlmClient},
};

/// Runtime service context that can be shared across the application.
///
/// This struct holds the pipeline, the model and chat clients, and configuration.
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The generation pipeline, holding the model registry.
    pub pipeline: Pipeline,
    /// The LLM client instance.
    pub llm: LlmClient,
    /// The chat client instance.
    pub chat: ChatClient,
}

impl Runtime {
    /// Create a new runtime instance.
    #[instrument(skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        // Load the model registry; a bad registry stops startup here.
        let pipeline = Pipeline::new(&config)?;

        // Initialize the LLM client.
        let llm = LlmClient::openai(&config, &pipeline.registry);

        // Initialize the chat client.
        let chat = ChatClient::slack(&config, pipeline.clone(), llm.clone()).await?;

        Ok(Self { config, pipeline, llm, chat })
    }

    pub async fn start(&self) -> Void {
        self.chat.start().await
    }
}

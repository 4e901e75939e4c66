//! Integration with OpenAI-compatible model providers.
//!
//! Base models go through the legacy `/completions` endpoint; instruct models
//! go through `/chat/completions` with the transcript sent as an assistant
//! message, which the provider continues instead of answering. Each model
//! names its own API base, so one bot can mix providers (OpenRouter,
//! Hyperbolic, OpenAI, a local server).

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs, CompletionFinishReason,
        CreateChatCompletionRequestArgs, CreateCompletionRequestArgs, FinishReason,
    },
};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::{
    base::{config::Config, error::PipelineError},
    pipeline::{
        filter::RawCompletion,
        prompt::{ChatRole, ChatTurn, PromptPayload, SamplingParams},
        registry::{ModelConfig, ModelRegistry},
    },
};

use super::{GenericLlmClient, LlmClient};

// Extra methods on `LlmClient` applied by the openai implementation.

impl LlmClient {
    pub fn openai(config: &Config, registry: &ModelRegistry) -> Self {
        let client = OpenAiLlmClient::new(config, registry);
        Self { inner: Arc::new(client) }
    }
}

// Specific implementations.

/// OpenAI-compatible LLM client implementation.
#[derive(Clone)]
pub struct OpenAiLlmClient {
    api_key: String,
    clients: HashMap<String, Client<OpenAIConfig>>,
    request_timeout: Duration,
}

impl OpenAiLlmClient {
    /// Create a new client with one connection per distinct model endpoint.
    #[instrument(name = "OpenAiLlmClient::new", skip_all)]
    pub fn new(config: &Config, registry: &ModelRegistry) -> Self {
        let mut result = Self {
            api_key: config.llm_api_key.clone(),
            clients: HashMap::new(),
            request_timeout: config.request_timeout,
        };

        for model in registry.models() {
            if !result.clients.contains_key(&model.endpoint) {
                let client = result.build_client(&model.endpoint);
                result.clients.insert(model.endpoint.clone(), client);
            }
        }

        info!("Prepared clients for {} endpoint(s).", result.clients.len());

        result
    }

    fn build_client(&self, endpoint: &str) -> Client<OpenAIConfig> {
        let cfg = OpenAIConfig::new().with_api_key(self.api_key.clone()).with_api_base(endpoint.trim_end_matches('/'));

        // Retries belong to `call_with_retry`; the client gives up after the first failure.
        let backoff = ExponentialBackoffBuilder::new().with_max_elapsed_time(Some(Duration::ZERO)).build();

        Client::with_config(cfg).with_backoff(backoff)
    }

    fn client_for(&self, endpoint: &str) -> Client<OpenAIConfig> {
        self.clients.get(endpoint).cloned().unwrap_or_else(|| self.build_client(endpoint))
    }

    /// Run a provider call under the deadline, retrying once on throttling or timeout.
    async fn call_with_retry<F, Fut>(&self, mut call: F) -> Result<RawCompletion, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<RawCompletion, OpenAIError>>,
    {
        const MAX_RETRIES: u32 = 1;
        const RETRY_DELAY_MS: u64 = 1000;

        let mut retries = 0;

        loop {
            let error = match timeout(self.request_timeout, call()).await {
                Ok(Ok(raw)) => {
                    info!("Model call succeeded after {} attempt(s).", retries + 1);
                    return Ok(raw);
                }
                Ok(Err(err)) => classify_error(err),
                Err(_) => PipelineError::Timeout,
            };

            if !error.is_retryable() || retries >= MAX_RETRIES {
                return Err(error);
            }

            retries += 1;
            warn!("Model call failed, retrying {retries}/{MAX_RETRIES}: {error}");

            tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
        }
    }
}

#[async_trait]
impl GenericLlmClient for OpenAiLlmClient {
    #[instrument(name = "OpenAiLlmClient::complete", skip_all, fields(model = %model.id))]
    async fn complete(&self, model: &ModelConfig, payload: &PromptPayload) -> Result<RawCompletion, PipelineError> {
        debug!("Payload: {}", serde_json::to_string(payload).unwrap_or_default());

        let client = self.client_for(&model.endpoint);

        match payload {
            PromptPayload::Completion { prompt, params } => self.call_with_retry(|| create_completion(&client, &model.provider_model, prompt, params)).await,
            PromptPayload::Chat { messages, params } => self.call_with_retry(|| create_chat_completion(&client, &model.provider_model, messages, params)).await,
        }
    }
}

/// Plain completion for base models.
async fn create_completion(client: &Client<OpenAIConfig>, model: &str, prompt: &str, params: &SamplingParams) -> Result<RawCompletion, OpenAIError> {
    let mut request = CreateCompletionRequestArgs::default();
    request.model(model).prompt(prompt.to_string()).max_tokens(params.max_tokens).temperature(params.temperature);

    if let Some(candidates) = params.candidates {
        request.n(candidates);
    }

    let response = client.completions().create(request.build()?).await?;

    Ok(response
        .choices
        .into_iter()
        .next()
        .map(|choice| RawCompletion::new(choice.text, matches!(choice.finish_reason, Some(CompletionFinishReason::Length))))
        .unwrap_or_default())
}

/// Chat completion with assistant prefill for instruct models.
#[allow(deprecated)]
async fn create_chat_completion(client: &Client<OpenAIConfig>, model: &str, messages: &[ChatTurn], params: &SamplingParams) -> Result<RawCompletion, OpenAIError> {
    let messages = messages.iter().map(to_request_message).collect::<Result<Vec<_>, _>>()?;

    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages(messages)
        .max_tokens(params.max_tokens)
        .temperature(params.temperature)
        .build()?;

    let response = client.chat().create(request).await?;

    Ok(response
        .choices
        .into_iter()
        .next()
        .map(|choice| RawCompletion::new(choice.message.content.unwrap_or_default(), matches!(choice.finish_reason, Some(FinishReason::Length))))
        .unwrap_or_default())
}

/// Convert a payload message into the provider's typed message.
fn to_request_message(turn: &ChatTurn) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    let content = turn.content.clone();

    Ok(match turn.role {
        ChatRole::System => ChatCompletionRequestSystemMessageArgs::default().content(content).build()?.into(),
        ChatRole::User => ChatCompletionRequestUserMessageArgs::default().content(content).build()?.into(),
        ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default().content(content).build()?.into(),
    })
}

/// Map a provider error onto the transport taxonomy.
fn classify_error(err: OpenAIError) -> PipelineError {
    match err {
        OpenAIError::Reqwest(e) if e.is_timeout() => PipelineError::Timeout,
        OpenAIError::ApiError(e) if is_rate_limit_message(&e.message) || e.r#type.as_deref().is_some_and(is_rate_limit_message) => PipelineError::RateLimited,
        other => PipelineError::TransportError(other.to_string()),
    }
}

/// Providers word throttling differently; match the common phrasings.
fn is_rate_limit_message(message: &str) -> bool {
    let message = message.to_lowercase();

    message.contains("rate limit") || message.contains("rate_limit") || message.contains("too many requests") || message.contains("429")
}

// Tests.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        time::Instant,
    };

    use super::*;
    use crate::{
        base::config::ConfigInner,
        pipeline::registry::{ModelEntry, ModelKind},
    };

    const RATE_LIMIT_BODY: &str = r#"{"error":{"message":"Rate limit exceeded: free-models-per-min","type":"rate_limit_error","param":null,"code":null}}"#;

    fn config(request_timeout: Duration) -> Config {
        Config::from_inner(ConfigInner {
            llm_api_key: "test_key".to_string(),
            request_timeout,
            ..Default::default()
        })
        .unwrap()
    }

    fn registry(endpoint: &str) -> ModelRegistry {
        let entry = ModelEntry {
            id: "local".to_string(),
            display_name: None,
            kind: ModelKind::Base,
            endpoint: endpoint.to_string(),
            model: None,
            max_tokens: 10,
            supports_n_parameter: false,
            system_prompt: None,
            user_prefix: None,
        };

        ModelRegistry::load([entry], "local").unwrap()
    }

    fn payload() -> PromptPayload {
        PromptPayload::Completion {
            prompt: "<alice> hi\n<assistant>".to_string(),
            params: SamplingParams {
                max_tokens: 10,
                temperature: 0.8,
                candidates: None,
            },
        }
    }

    /// Read one HTTP request (headers plus `content-length` body).
    async fn read_request(socket: &mut TcpStream) {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 4096];

        loop {
            let Ok(n) = socket.read(&mut chunk).await else { return };
            if n == 0 {
                return;
            }
            buffer.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buffer);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);

                if buffer.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    /// A local provider that throttles every request, returning its base URL and a hit counter.
    async fn throttling_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let counter = counter.clone();

                tokio::spawn(async move {
                    read_request(&mut socket).await;
                    counter.fetch_add(1, Ordering::SeqCst);

                    let response = format!(
                        "HTTP/1.1 429 Too Many Requests\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        RATE_LIMIT_BODY.len(),
                        RATE_LIMIT_BODY
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (format!("http://{address}/v1"), hits)
    }

    #[test]
    fn test_rate_limit_detection() {
        assert!(is_rate_limit_message("Rate limit exceeded: free-models-per-min"));
        assert!(is_rate_limit_message("rate_limit_exceeded"));
        assert!(is_rate_limit_message("HTTP 429 Too Many Requests"));
        assert!(!is_rate_limit_message("Invalid API key"));
    }

    #[test]
    fn test_invalid_argument_is_transport_error() {
        let error = classify_error(OpenAIError::InvalidArgument("bad".to_string()));

        assert!(matches!(error, PipelineError::TransportError(_)));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_prefill_is_an_assistant_message() {
        let message = to_request_message(&ChatTurn::new(ChatRole::Assistant, "alice: hi\nassistant:")).unwrap();

        assert!(matches!(message, ChatCompletionRequestMessage::Assistant(_)));
    }

    #[test]
    fn test_roles_map_one_to_one() {
        let system = to_request_message(&ChatTurn::new(ChatRole::System, "s")).unwrap();
        let user = to_request_message(&ChatTurn::new(ChatRole::User, "u")).unwrap();

        assert!(matches!(system, ChatCompletionRequestMessage::System(_)));
        assert!(matches!(user, ChatCompletionRequestMessage::User(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let registry = registry("http://127.0.0.1:9/v1");
        let client = OpenAiLlmClient::new(&config(Duration::from_secs(5)), &registry);
        let model = registry.resolve(None).unwrap();

        let result = client.complete(model, &payload()).await;

        assert!(matches!(result, Err(PipelineError::TransportError(_)) | Err(PipelineError::Timeout)));
    }

    #[tokio::test]
    async fn test_throttling_is_retried_once_then_reported() {
        let (endpoint, hits) = throttling_server().await;
        let registry = registry(&endpoint);
        let client = OpenAiLlmClient::new(&config(Duration::from_secs(5)), &registry);
        let model = registry.resolve(None).unwrap();

        let started = Instant::now();
        let result = client.complete(model, &payload()).await;

        assert_eq!(result, Err(PipelineError::RateLimited));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

//! uniform completion interface over the supported llm backends
//!
//! Two hosted chat-completion backends (OpenAI and the OpenAI-compatible
//! Groq api) and two self-hosted inference servers (Ollama's generate api
//! and LocalAI's completion api). [`build_provider`] is the registry: it
//! validates the provider name at startup and rejects unknown names with a
//! typed error instead of failing deep inside the pipeline.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use thiserror::Error;

/// system message sent to the chat-completion backends
const SYSTEM_PROMPT: &str = "You are an expert Kubernetes administrator.";
/// completion budget for the hosted backends
const MAX_TOKENS: u32 = 500;

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";
const DEFAULT_LOCALAI_ENDPOINT: &str = "http://localhost:8080";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unsupported llm provider: {0}")]
    UnsupportedProvider(String),
    #[error("llm provider misconfigured: {0}")]
    Config(String),
    #[error("llm request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("llm api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("llm response contained no completion text")]
    EmptyCompletion,
}

impl ProviderError {
    /// transient errors are worth one more attempt before the fallback kicks in
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Api { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

/// connection parameters shared by all providers, resolved by
/// [`LlmSettings`](super::LlmSettings) before construction
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub endpoint: Option<Url>,
    pub model: Option<String>,
    pub request_timeout: Duration,
}

/// the one capability the pipeline needs from an llm backend
#[async_trait]
pub trait CompletionProvider: Send + Sync + std::fmt::Debug {
    /// Returns the completion text for `prompt` or surfaces the underlying
    /// transport/api error. Swallowing errors is the service layer's job.
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Builds the provider registered under `name` (case-insensitive).
pub fn build_provider(
    name: &str,
    config: &ProviderConfig,
) -> Result<Box<dyn CompletionProvider>, ProviderError> {
    match name.to_ascii_lowercase().as_str() {
        "openai" => Ok(Box::new(ChatCompletionProvider::new(
            OPENAI_URL,
            "gpt-4",
            config,
        )?)),
        "groq" => Ok(Box::new(ChatCompletionProvider::new(
            GROQ_URL,
            "llama-3.3-70b-versatile",
            config,
        )?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        "localai" => Ok(Box::new(LocalAiProvider::new(config)?)),
        other => Err(ProviderError::UnsupportedProvider(other.to_string())),
    }
}

fn http_client(config: &ProviderConfig) -> Result<reqwest::Client, ProviderError> {
    Ok(reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()?)
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// hosted backend speaking the OpenAI chat-completion wire format.
/// covers both OpenAI itself and Groq, which differ only in endpoint,
/// default model and api key
#[derive(Debug)]
pub struct ChatCompletionProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl ChatCompletionProvider {
    fn new(url: &str, default_model: &str, config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::Config(format!("api key required for {url}")))?;

        Ok(Self {
            client: http_client(config)?,
            url: url.to_string(),
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
        })
    }
}

#[async_trait]
impl CompletionProvider for ChatCompletionProvider {
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Api {
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: ChatResponse = response.json().await?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(ProviderError::EmptyCompletion)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// self-hosted Ollama instance, generate-style api
#[derive(Debug)]
pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaProvider {
    fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let endpoint = config
            .endpoint
            .as_ref()
            .map(Url::to_string)
            .unwrap_or_else(|| DEFAULT_OLLAMA_ENDPOINT.to_string());

        Ok(Self {
            client: http_client(config)?,
            url: format!("{}/api/generate", endpoint.trim_end_matches('/')),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| String::from("llama3")),
        })
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let response = self.client.post(&self.url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Api {
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: GenerateResponse = response.json().await?;

        Ok(parsed.response)
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<TextChoice>,
}

#[derive(Debug, Deserialize)]
struct TextChoice {
    text: String,
}

/// self-hosted LocalAI instance, completion-style api
#[derive(Debug)]
pub struct LocalAiProvider {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl LocalAiProvider {
    fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let endpoint = config
            .endpoint
            .as_ref()
            .map(Url::to_string)
            .unwrap_or_else(|| DEFAULT_LOCALAI_ENDPOINT.to_string());

        Ok(Self {
            client: http_client(config)?,
            url: format!("{}/v1/completions", endpoint.trim_end_matches('/')),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| String::from("llama3")),
        })
    }
}

#[async_trait]
impl CompletionProvider for LocalAiProvider {
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let request = CompletionRequest {
            model: &self.model,
            prompt,
            max_tokens: MAX_TOKENS,
        };

        let response = self.client.post(&self.url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Api {
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: CompletionResponse = response.json().await?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.text)
            .ok_or(ProviderError::EmptyCompletion)
    }
}

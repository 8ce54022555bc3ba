// Client for the chat-completion API the gateway forwards prompts to.
//
// The dispatch layer only sees the `LlmClient` trait: one completion call in,
// the reply text out. `OpenAiClient` implements it against any
// OpenAI-compatible `chat/completions` endpoint and can be re-pointed at new
// credentials while the server is running.
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::settings::SystemSettings;
use crate::types::{ChatCompletionRequest, ChatCompletionResponse, CompletionRequest, Message};

// Errors that can occur when calling the completion API.
#[derive(Debug, Error)]
pub enum LlmError {
    // HTTP request errors (connection failures, timeouts, etc.)
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    // API-level errors returned by the completion service
    #[error("API error: {status} - {message}")]
    ApiError { status: StatusCode, message: String },

    // Reply parsed but carried no message content
    #[error("Completion response contained no content")]
    EmptyResponse,

    // Configuration or initialization errors
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Runs one completion with `system_prompt` as the system message and
    /// `user_text` as the user message, returning the reply text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;

    /// Points the client at the API URL and key in `settings`.
    fn configure(&self, settings: &SystemSettings) -> Result<(), LlmError>;
}

#[derive(Debug, Clone)]
struct Credentials {
    base_url: String,
    api_key: String,
}

// Client for OpenAI-compatible chat-completion services.
pub struct OpenAiClient {
    // HTTP client for making API requests
    client: Client,

    // Current API location and key, replaced on settings updates
    credentials: RwLock<Credentials>,
}

impl OpenAiClient {
    // Creates a client configured from `settings`.
    pub fn new(settings: &SystemSettings) -> Result<Self, LlmError> {
        let credentials = credentials_from(settings)?;
        Ok(Self {
            client: Client::new(),
            credentials: RwLock::new(credentials),
        })
    }

    fn endpoint(&self) -> (String, String) {
        let credentials = self.credentials.read();
        (
            format!("{}/chat/completions", credentials.base_url),
            credentials.api_key.clone(),
        )
    }
}

fn credentials_from(settings: &SystemSettings) -> Result<Credentials, LlmError> {
    let base_url = settings.openai_api_url.trim_end_matches('/').to_string();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(LlmError::ConfigError(format!(
            "API URL must start with http:// or https://, got {:?}",
            settings.openai_api_url
        )));
    }
    Ok(Credentials {
        base_url,
        api_key: settings.openai_api_key.clone(),
    })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let (url, api_key) = self.endpoint();
        let body = ChatCompletionRequest {
            model: request.model,
            messages: vec![
                Message::system(&request.system_prompt),
                Message::user(&request.user_text),
            ],
            temperature: request.temperature,
        };
        debug!("Forwarding completion request to {} (model={})", url, body.model);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Request to completion API failed: {}", e);
                LlmError::RequestError(e)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Completion API error: {} - {}", status, message);
            return Err(LlmError::ApiError { status, message });
        }

        let completion: ChatCompletionResponse = response.json().await?;
        debug!("Successfully received completion response");

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(LlmError::EmptyResponse)
    }

    fn configure(&self, settings: &SystemSettings) -> Result<(), LlmError> {
        let credentials = credentials_from(settings)?;
        info!("Completion client now targets {}", credentials.base_url);
        *self.credentials.write() = credentials;
        Ok(())
    }
}

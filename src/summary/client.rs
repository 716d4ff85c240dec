use async_trait::async_trait;
use log::{debug, trace, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

static OVERFLOW_TOKENS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"your messages resulted in (\d+) tokens").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Assistant,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Concatenated text of every returned choice plus accounting data.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub text: String,
    pub usage: Usage,
    pub elapsed: Duration,
}

#[derive(Error, Debug)]
pub enum ChatError {
    /// The prompt did not fit the model's context window.
    #[error("context length exceeded: {offending_tokens:?} tokens")]
    ContextOverflow { offending_tokens: Option<usize> },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ChatError {
    /// Whether another attempt (with the next key) may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ChatError::RateLimited(_) | ChatError::Network(_) => true,
            ChatError::Api { status, .. } => *status >= 500,
            ChatError::ContextOverflow { .. }
            | ChatError::Unauthorized(_)
            | ChatError::MalformedResponse(_) => false,
        }
    }
}

/// Token count quoted in a context-length error message, if any.
pub fn parse_offending_tokens(message: &str) -> Option<usize> {
    OVERFLOW_TOKENS_REGEX
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Map an unsuccessful HTTP response onto a `ChatError`.
pub fn classify_error(status: StatusCode, body: &str) -> ChatError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string());

    if message.contains("maximum context") {
        return ChatError::ContextOverflow {
            offending_tokens: parse_offending_tokens(&message),
        };
    }
    match status {
        StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimited(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChatError::Unauthorized(message),
        _ => ChatError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

/// A chat-completion backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(
        &self,
        api_key: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatCompletion, ChatError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/v1/chat/completions` client.
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ChatError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatProvider for OpenAiClient {
    async fn complete(
        &self,
        api_key: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatCompletion, ChatError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        debug!("POST {} ({} messages)", url, messages.len());
        let started = Instant::now();

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!("Chat API returned status {}", status);
            trace!("Error body: {}", body);
            return Err(classify_error(status, &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ChatError::MalformedResponse(e.to_string()))?;
        if parsed.choices.is_empty() {
            return Err(ChatError::MalformedResponse("no choices returned".to_string()));
        }
        let text = parsed
            .choices
            .into_iter()
            .filter_map(|c| c.message.content)
            .collect::<String>();

        Ok(ChatCompletion {
            text,
            usage: parsed.usage,
            elapsed: started.elapsed(),
        })
    }
}

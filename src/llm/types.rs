//! Request, response and error types for model execution.

use crate::domain::{ModelTarget, Provider};

/// Message fragments recognised as a rate-limit signal when a provider
/// reports one without a structured status.
const RATE_LIMIT_MARKERS: [&str; 6] = ["429", "rate limit", "rate_limit", "ratelimit", "too many requests", "quota"];

/// Everything needed for one model call.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub target: ModelTarget,
    pub credential: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ExecutionRequest {
    pub fn provider(&self) -> Provider {
        self.target.provider
    }
}

/// A finished model call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    /// Final answer text
    pub text: String,
    /// Reasoning text streamed separately by some providers
    pub thought: String,
    pub tokens_used: u64,
}

impl Completion {
    pub fn new(text: impl Into<String>, tokens_used: u64) -> Self {
        Self {
            text: text.into(),
            thought: String::new(),
            tokens_used,
        }
    }
}

/// Errors that can occur during model execution
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("Rate limited: {message}")]
    RateLimited {
        retry_after_ms: Option<u64>,
        message: String,
    },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No credential configured for {0}")]
    MissingCredential(Provider),

    #[error("Cancelled")]
    Cancelled,
}

impl LlmError {
    /// Whether the provider asked us to slow down.
    ///
    /// Structured 429s are authoritative. Other errors fall back to a
    /// case-insensitive scan of the message.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::Api { status: 429, .. } => true,
            LlmError::Api { message, .. } | LlmError::Network(message) | LlmError::InvalidResponse(message) => {
                message_signals_rate_limit(message)
            }
            LlmError::MissingCredential(_) | LlmError::Cancelled => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => LlmError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => LlmError::Network(err.to_string()),
        }
    }
}

/// Heuristic rate-limit detection on free-form error text.
pub fn message_signals_rate_limit(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m))
}

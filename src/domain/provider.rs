//! Provider catalogue and model addressing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An external model vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Openai,
    Anthropic,
    Gemini,
    Groq,
    Mistral,
    Cerebras,
    Openrouter,
}

impl Provider {
    pub const ALL: [Provider; 7] = [
        Provider::Openai,
        Provider::Anthropic,
        Provider::Gemini,
        Provider::Groq,
        Provider::Mistral,
        Provider::Cerebras,
        Provider::Openrouter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Openai => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
            Provider::Groq => "groq",
            Provider::Mistral => "mistral",
            Provider::Cerebras => "cerebras",
            Provider::Openrouter => "openrouter",
        }
    }

    /// Providers that speak the chat-completions wire format.
    pub fn is_openai_compatible(&self) -> bool {
        !matches!(self, Provider::Anthropic | Provider::Gemini)
    }

    /// Providers billed at zero for the models we use.
    pub fn is_free_tier(&self) -> bool {
        matches!(
            self,
            Provider::Groq | Provider::Gemini | Provider::Mistral | Provider::Cerebras | Provider::Openrouter
        )
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("unknown provider: {}", s))
    }
}

/// A concrete model at a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelTarget {
    pub provider: Provider,
    pub model: String,
}

impl ModelTarget {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Rate-bucket key, `provider:model`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }

    /// Human label recorded on generation jobs, `provider/model`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

impl fmt::Display for ModelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// Parses `provider:model`. The model part may itself contain colons.
impl FromStr for ModelTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, model) = s
            .split_once(':')
            .ok_or_else(|| format!("expected provider:model, got {}", s))?;
        if model.trim().is_empty() {
            return Err(format!("missing model name in {}", s));
        }
        Ok(ModelTarget::new(provider.parse()?, model.trim()))
    }
}

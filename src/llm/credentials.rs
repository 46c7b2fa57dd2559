//! Credential lookup per provider.

use std::collections::BTreeMap;

use crate::domain::Provider;

/// Resolves the API key for a provider.
pub trait CredentialResolver: Send + Sync {
    /// `None` means the provider must not be called.
    fn resolve(&self, provider: Provider) -> Option<String>;

    fn has_credential(&self, provider: Provider) -> bool {
        self.resolve(provider).is_some()
    }
}

/// Reads keys from environment variables named in config.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    vars: BTreeMap<Provider, String>,
}

impl EnvCredentials {
    pub fn new(vars: BTreeMap<Provider, String>) -> Self {
        Self { vars }
    }
}

impl CredentialResolver for EnvCredentials {
    fn resolve(&self, provider: Provider) -> Option<String> {
        let var = self.vars.get(&provider)?;
        std::env::var(var).ok().filter(|v| !v.trim().is_empty())
    }
}

/// Fixed keys, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    keys: BTreeMap<Provider, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Provider, key: impl Into<String>) -> Self {
        self.keys.insert(provider, key.into());
        self
    }
}

impl CredentialResolver for StaticCredentials {
    fn resolve(&self, provider: Provider) -> Option<String> {
        self.keys.get(&provider).filter(|k| !k.is_empty()).cloned()
    }
}

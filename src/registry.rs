//! Provider registry: maps provider names to upstream base URLs.
//!
//! The registry is seeded once at startup and is read-only afterwards.

use serde::Serialize;
use std::collections::HashMap;

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::storage::ProviderRepository;

/// Built-in providers seeded on every start.
pub const DEFAULT_PROVIDERS: &[(&str, &str)] = &[
    ("OpenAI", "https://api.openai.com/v1"),
    ("Groq", "https://api.groq.com/openai/v1"),
    ("x-Grok", "https://api.x.ai/v1"),
    ("OpenRouter", "https://openrouter.ai/api/v1"),
    ("TogetherAI", "https://api.together.xyz/v1"),
];

/// A known upstream provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ProviderType {
    pub id: i64,
    pub name: String,
    pub base_url: String,
}

/// Read-only snapshot of the seeded providers.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: Vec<ProviderType>,
    by_name: HashMap<String, usize>,
    default_provider: String,
}

impl ProviderRegistry {
    /// Upsert the built-in providers plus `extra` and load the result.
    ///
    /// Entries in `extra` win over built-ins of the same name.
    pub async fn seed(
        repo: &dyn ProviderRepository,
        extra: &[ProviderConfig],
        default_provider: &str,
    ) -> Result<Self> {
        for (name, base_url) in DEFAULT_PROVIDERS {
            if extra.iter().any(|p| p.name == *name) {
                continue;
            }
            repo.upsert(name, base_url).await?;
        }
        for provider in extra {
            repo.upsert(&provider.name, &provider.base_url).await?;
        }

        let registry = Self::from_providers(repo.list().await?, default_provider);
        if registry.get(default_provider).is_none() {
            return Err(Error::NotFound(format!(
                "Default provider '{}' is not registered",
                default_provider
            )));
        }

        tracing::info!(
            providers = registry.providers.len(),
            default = %default_provider,
            "Provider registry seeded"
        );
        Ok(registry)
    }

    /// Build a registry from already-loaded rows.
    pub fn from_providers(providers: Vec<ProviderType>, default_provider: &str) -> Self {
        let by_name = providers
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();
        Self {
            providers,
            by_name,
            default_provider: default_provider.to_string(),
        }
    }

    fn get(&self, name: &str) -> Option<&ProviderType> {
        self.by_name.get(name).map(|&i| &self.providers[i])
    }

    /// Look up a provider by exact name.
    pub fn resolve(&self, name: &str) -> Result<&ProviderType> {
        self.get(name)
            .ok_or_else(|| Error::NotFound(format!("Unknown API type: {}", name)))
    }

    pub fn by_id(&self, id: i64) -> Option<&ProviderType> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// Base URL used by the gateway when no override header is sent.
    pub fn default_base_url(&self) -> Result<&str> {
        self.resolve(&self.default_provider)
            .map(|p| p.base_url.as_str())
    }

    pub fn providers(&self) -> &[ProviderType] {
        &self.providers
    }
}

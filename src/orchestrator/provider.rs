//! Seams to the translation provider and credential checks.

use crate::model::{HistoricalContextEntry, TranslationResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Provider selection and sampling options, swappable at runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationSettings {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub system_prompt: Option<String>,
    pub source_language: Option<String>,
    pub target_language: String,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.3,
            system_prompt: None,
            source_language: None,
            target_language: "English".to_string(),
        }
    }
}

impl TranslationSettings {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// Everything the provider needs for one chapter
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub request_id: String,
    pub unit_id: String,
    pub title: String,
    pub content: String,
    pub settings: TranslationSettings,
    /// Earlier chapters, oldest first
    pub history: Vec<HistoricalContextEntry>,
    /// The unit's own previous translation, if any
    pub prior: Option<TranslationResult>,
    pub max_retries: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutput {
    pub translated_title: String,
    pub translated_content: String,
    /// Model that actually served the request, when it differs from the settings
    pub model: Option<String>,
}

impl ProviderOutput {
    pub fn new(translated_title: impl Into<String>, translated_content: impl Into<String>) -> Self {
        Self {
            translated_title: translated_title.into(),
            translated_content: translated_content.into(),
            model: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The request's cancellation token fired
    #[error("request aborted")]
    Aborted,

    #[error("rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, ProviderError::Aborted)
    }
}

/// Calls the remote translation service.
///
/// Implementations must return [`ProviderError::Aborted`] promptly once
/// `cancel` fires.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn translate(
        &self,
        request: TranslationRequest,
        cancel: CancellationToken,
    ) -> Result<ProviderOutput, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialCheck {
    pub valid: bool,
    pub message: Option<String>,
}

impl CredentialCheck {
    pub fn ok() -> Self {
        Self {
            valid: true,
            message: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
        }
    }
}

pub trait CredentialValidator: Send + Sync {
    fn validate(&self, settings: &TranslationSettings) -> CredentialCheck;
}

/// Requires a non-blank API key for every provider not listed as keyless
#[derive(Debug, Clone)]
pub struct ApiKeyValidator {
    keyless: HashSet<String>,
}

impl Default for ApiKeyValidator {
    fn default() -> Self {
        Self {
            keyless: HashSet::from(["ollama".to_string(), "local".to_string()]),
        }
    }
}

impl ApiKeyValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keyless_provider(mut self, provider: impl Into<String>) -> Self {
        self.keyless.insert(provider.into().to_lowercase());
        self
    }
}

impl CredentialValidator for ApiKeyValidator {
    fn validate(&self, settings: &TranslationSettings) -> CredentialCheck {
        let provider = settings.provider.trim().to_lowercase();
        if provider.is_empty() {
            return CredentialCheck::invalid("No provider selected");
        }
        if self.keyless.contains(&provider) {
            return CredentialCheck::ok();
        }
        match settings.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => CredentialCheck::ok(),
            _ => CredentialCheck::invalid(format!("API key for {} is missing", settings.provider)),
        }
    }
}

//! Backend construction from configuration.

use std::sync::Arc;

use paperwatch_common::SandboxClient;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::backend::{
    AnthropicBackend, GeminiBackend, LlmBackend, LlmError, OpenAiBackend, ANTHROPIC_BASE_URL,
    GEMINI_BASE_URL, OPENAI_BASE_URL,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
    /// Any OpenAI-compatible endpoint; `base_url` is required, the key optional.
    #[serde(rename = "openai_compatible")]
    OpenAiCompatible,
    Anthropic,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Gemini           => "gemini",
            BackendKind::OpenAi           => "openai",
            BackendKind::OpenAiCompatible => "openai_compatible",
            BackendKind::Anthropic        => "anthropic",
        }
    }

    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            BackendKind::Gemini           => Some(GEMINI_BASE_URL),
            BackendKind::OpenAi           => Some(OPENAI_BASE_URL),
            BackendKind::OpenAiCompatible => None,
            BackendKind::Anthropic        => Some(ANTHROPIC_BASE_URL),
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, BackendKind::OpenAiCompatible)
    }
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
}

impl BackendConfig {
    /// Base URL the backend will talk to, after applying the provider default.
    pub fn resolved_base_url(&self) -> Option<String> {
        self.base_url
            .clone()
            .or_else(|| self.kind.default_base_url().map(String::from))
    }
}

/// Build a backend for `cfg`. The sandbox client must already allow the
/// backend's host.
pub fn build_backend(
    cfg: &BackendConfig,
    client: SandboxClient,
) -> Result<Arc<dyn LlmBackend>, LlmError> {
    let base_url = cfg.resolved_base_url().ok_or_else(|| {
        LlmError::Unavailable(format!("{} backend needs a base_url", cfg.kind.as_str()))
    })?;

    let key = || {
        cfg.api_key.clone().ok_or_else(|| {
            LlmError::Unavailable(format!("no API key configured for {}", cfg.kind.as_str()))
        })
    };

    let backend: Arc<dyn LlmBackend> = match cfg.kind {
        BackendKind::Gemini => Arc::new(GeminiBackend::new(client, base_url, &cfg.model, key()?)),
        BackendKind::Anthropic => {
            Arc::new(AnthropicBackend::new(client, base_url, &cfg.model, key()?))
        }
        BackendKind::OpenAi => {
            Arc::new(OpenAiBackend::new(client, base_url, &cfg.model, Some(key()?)))
        }
        BackendKind::OpenAiCompatible => {
            Arc::new(OpenAiBackend::new(client, base_url, &cfg.model, cfg.api_key.clone()))
        }
    };

    tracing::info!(provider = backend.provider(), model = backend.model_id(), "LLM backend ready");
    Ok(backend)
}

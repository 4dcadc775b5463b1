//! paperwatch-llm: LLM backend abstraction layer.
//!
//! Backends:
//!   GeminiBackend          Google Gemini `generateContent`
//!   OpenAiBackend          OpenAI chat completions, or any OpenAI-compatible
//!                            endpoint (Ollama, vLLM, LMStudio, OpenRouter, …)
//!   AnthropicBackend       Anthropic Messages API
//!
//! `factory::build_backend` turns a validated `BackendConfig` into a boxed
//! backend so callers never match on the provider themselves.

pub mod backend;
pub mod factory;

pub use backend::{LlmBackend, LlmError, LlmRequest, LlmResponse, Message};
pub use factory::{build_backend, BackendConfig, BackendKind};

//! LLM backend trait and concrete implementations.
//!
//! Each backend owns its wire types; callers only ever see `LlmRequest` /
//! `LlmResponse`. All traffic goes through the shared `SandboxClient`.

use async_trait::async_trait;
use paperwatch_common::{PaperwatchError, SandboxClient};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1500;
const DEFAULT_TEMPERATURE: f32 = 0.3;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] PaperwatchError),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Rate limit exceeded")]
    RateLimitExceeded,
    #[error("API error [{status}]: {message}")]
    ApiError { status: u16, message: String },
    #[error("Empty completion: {0}")]
    EmptyCompletion(String),
}

// ── Request / Response ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: String, // "system" | "user" | "assistant"
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl LlmRequest {
    fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.as_str())
    }

    fn conversation(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != "system")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

// ── Trait ─────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError>;
    fn model_id(&self) -> &str;
    /// Short provider name used in logs ("gemini", "openai", …).
    fn provider(&self) -> &'static str;
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Read a JSON body, turning non-2xx statuses into `LlmError`.
async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, LlmError> {
    let status = resp.status();
    let body = resp.text().await?;

    if status.as_u16() == 429 {
        return Err(LlmError::RateLimitExceeded);
    }
    if !status.is_success() {
        return Err(LlmError::ApiError {
            status: status.as_u16(),
            message: api_error_message(&body),
        });
    }
    Ok(serde_json::from_str(&body)?)
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v["error"]["message"]
                .as_str()
                .or_else(|| v["message"].as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

// ── 1. OpenAI / OpenAI-compatible ─────────────────────────────────────────────

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl ChatCompletionResponse {
    fn into_response(self, fallback_model: &str) -> Result<LlmResponse, LlmError> {
        let content = self
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LlmError::EmptyCompletion("no choices returned".to_string()))?;
        let usage = self.usage.unwrap_or(ChatUsage { prompt_tokens: 0, completion_tokens: 0 });
        Ok(LlmResponse {
            content,
            model: self.model.unwrap_or_else(|| fallback_model.to_string()),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }
}

/// OpenAI chat completions. With a custom `base_url` and no key this also
/// covers Ollama, vLLM, LMStudio and other OpenAI-compatible servers.
pub struct OpenAiBackend {
    pub base_url: String,
    pub model: String,
    api_key: Option<SecretString>,
    client: SandboxClient,
}

impl OpenAiBackend {
    pub fn new(
        client: SandboxClient,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<SecretString>,
    ) -> Self {
        Self { base_url: base_url.into(), model: model.into(), api_key, client }
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    #[instrument(skip(self, req), fields(model = %self.model))]
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: &req.messages,
            max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: req.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        };
        let mut builder = self
            .client
            .post(&endpoint(&self.base_url, "/v1/chat/completions"))?
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }
        let parsed: ChatCompletionResponse = read_json(builder.send().await?).await?;
        let resp = parsed.into_response(&self.model)?;
        debug!(prompt_tokens = resp.prompt_tokens, completion_tokens = resp.completion_tokens, "OpenAI completion");
        Ok(resp)
    }

    fn model_id(&self) -> &str { &self.model }
    fn provider(&self) -> &'static str { "openai" }
}

// ── 2. Anthropic (claude-*) ───────────────────────────────────────────────────

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<&'a Message>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    model: Option<String>,
    #[serde(default)]
    content: Vec<AnthropicBlock>,
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl AnthropicResponse {
    fn into_response(self, fallback_model: &str) -> Result<LlmResponse, LlmError> {
        let content: String = self
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");
        if content.trim().is_empty() {
            return Err(LlmError::EmptyCompletion("no text blocks returned".to_string()));
        }
        let (prompt_tokens, completion_tokens) = self
            .usage
            .map(|u| (u.input_tokens, u.output_tokens))
            .unwrap_or((0, 0));
        Ok(LlmResponse {
            content,
            model: self.model.unwrap_or_else(|| fallback_model.to_string()),
            prompt_tokens,
            completion_tokens,
        })
    }
}

pub struct AnthropicBackend {
    pub base_url: String,
    pub model: String,
    api_key: SecretString,
    client: SandboxClient,
}

impl AnthropicBackend {
    pub fn new(
        client: SandboxClient,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretString,
    ) -> Self {
        Self { base_url: base_url.into(), model: model.into(), api_key, client }
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    #[instrument(skip(self, req), fields(model = %self.model))]
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        // Messages API takes the system prompt out-of-band
        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: req.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            system: req.system_prompt(),
            messages: req.conversation().collect(),
        };
        let resp = self
            .client
            .post(&endpoint(&self.base_url, "/v1/messages"))?
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;
        let parsed: AnthropicResponse = read_json(resp).await?;
        parsed.into_response(&self.model)
    }

    fn model_id(&self) -> &str { &self.model }
    fn provider(&self) -> &'static str { "anthropic" }
}

// ── 3. Google Gemini ──────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

impl GeminiRequest {
    fn from_llm_request(req: &LlmRequest) -> Self {
        let contents = req
            .conversation()
            .map(|m| GeminiContent {
                role: Some(if m.role == "assistant" { "model" } else { "user" }.to_string()),
                parts: vec![GeminiPart { text: Some(m.content.clone()) }],
            })
            .collect();
        let system_instruction = req.system_prompt().map(|s| GeminiContent {
            role: None,
            parts: vec![GeminiPart { text: Some(s.to_string()) }],
        });
        Self {
            contents,
            system_instruction,
            generation_config: GeminiGenerationConfig {
                max_output_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                temperature: req.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            },
        }
    }
}

impl GeminiResponse {
    fn into_response(self, model: &str) -> Result<LlmResponse, LlmError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(LlmError::EmptyCompletion(format!("prompt blocked: {reason}")));
        }
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::EmptyCompletion("no candidates returned".to_string()))?;
        let finish_reason = candidate.finish_reason;
        let content: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<Vec<_>>().join(""))
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmError::EmptyCompletion(format!(
                "candidate had no text (finish reason: {})",
                finish_reason.as_deref().unwrap_or("unknown")
            )));
        }
        let (prompt_tokens, completion_tokens) = self
            .usage_metadata
            .map(|u| (u.prompt_token_count, u.candidates_token_count))
            .unwrap_or((0, 0));
        Ok(LlmResponse { content, model: model.to_string(), prompt_tokens, completion_tokens })
    }
}

pub struct GeminiBackend {
    pub base_url: String,
    pub model: String,
    api_key: SecretString,
    client: SandboxClient,
}

impl GeminiBackend {
    pub fn new(
        client: SandboxClient,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretString,
    ) -> Self {
        Self { base_url: base_url.into(), model: model.into(), api_key, client }
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    #[instrument(skip(self, req), fields(model = %self.model))]
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        let url = endpoint(
            &self.base_url,
            &format!("/v1beta/models/{}:generateContent", self.model),
        );
        let resp = self
            .client
            .post(&url)?
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&GeminiRequest::from_llm_request(&req))
            .send()
            .await?;
        let parsed: GeminiResponse = read_json(resp).await?;
        parsed.into_response(&self.model)
    }

    fn model_id(&self) -> &str { &self.model }
    fn provider(&self) -> &'static str { "gemini" }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> LlmRequest {
        LlmRequest {
            messages: vec![
                Message::system("You are a careful research assistant."),
                Message::user("Summarize this abstract."),
            ],
            max_tokens: Some(512),
            temperature: None,
        }
    }

    #[test]
    fn test_gemini_request_moves_system_prompt() {
        let body = serde_json::to_value(GeminiRequest::from_llm_request(&sample_request())).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You are a careful research assistant.");
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 512);
    }

    #[test]
    fn test_gemini_response_parsing() {
        let json = r#"{
            "candidates": [{"content": {"role": "model", "parts": [{"text": "{\"summary\":"}, {"text": " \"ok\"}"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 120, "candidatesTokenCount": 30}
        }"#;
        let parsed: GeminiResponse = serde_json::from_str(json).unwrap();
        let resp = parsed.into_response("gemini-2.0-flash").unwrap();
        assert_eq!(resp.content, "{\"summary\": \"ok\"}");
        assert_eq!(resp.prompt_tokens, 120);
        assert_eq!(resp.completion_tokens, 30);
    }

    #[test]
    fn test_gemini_blocked_prompt_is_empty_completion() {
        let json = r#"{"candidates": [], "promptFeedback": {"blockReason": "SAFETY"}}"#;
        let parsed: GeminiResponse = serde_json::from_str(json).unwrap();
        let err = parsed.into_response("gemini-2.0-flash").unwrap_err();
        assert!(matches!(err, LlmError::EmptyCompletion(ref m) if m.contains("SAFETY")));
    }

    #[test]
    fn test_anthropic_request_shape() {
        let req = sample_request();
        let body = AnthropicRequest {
            model: "claude-sonnet-4-5",
            max_tokens: 512,
            temperature: 0.3,
            system: req.system_prompt(),
            messages: req.conversation().collect(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["system"], "You are a careful research assistant.");
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_anthropic_response_joins_text_blocks() {
        let json = r#"{"model": "claude-sonnet-4-5", "content": [{"type": "text", "text": "a"}, {"type": "tool_use"}, {"type": "text", "text": "b"}], "usage": {"input_tokens": 5, "output_tokens": 2}}"#;
        let parsed: AnthropicResponse = serde_json::from_str(json).unwrap();
        let resp = parsed.into_response("fallback").unwrap();
        assert_eq!(resp.content, "ab");
        assert_eq!(resp.model, "claude-sonnet-4-5");
    }

    #[test]
    fn test_openai_response_without_choices_is_error() {
        let parsed: ChatCompletionResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(parsed.into_response("gpt-4o-mini"), Err(LlmError::EmptyCompletion(_))));
    }

    #[test]
    fn test_openai_response_falls_back_to_configured_model() {
        let parsed: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": "hi"}}]}"#).unwrap();
        let resp = parsed.into_response("llama3:8b").unwrap();
        assert_eq!(resp.model, "llama3:8b");
        assert_eq!(resp.prompt_tokens, 0);
    }

    #[test]
    fn test_api_error_message_extraction() {
        assert_eq!(api_error_message(r#"{"error": {"message": "bad key"}}"#), "bad key");
        assert_eq!(api_error_message(r#"{"message": "not found"}"#), "not found");
        assert_eq!(api_error_message("<html>gateway</html>"), "<html>gateway</html>");
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        assert_eq!(endpoint("http://localhost:11434/", "/v1/chat/completions"),
                   "http://localhost:11434/v1/chat/completions");
    }
}

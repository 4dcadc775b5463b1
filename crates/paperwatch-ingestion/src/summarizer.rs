//! LLM-backed paper summarization.
//!
//! One request per paper asking for a JSON digest; the reply is parsed
//! leniently (code fences, stray prose, stringly-typed numbers) but a digest
//! without a summary or tags is a failure.

use std::sync::Arc;

use paperwatch_llm::{LlmBackend, LlmRequest, Message};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::PipelineError;
use crate::models::{Enrichment, PaperRecord};

pub const DEFAULT_MAX_TAGS: usize = 5;

#[derive(Debug, Clone)]
pub struct SummarizerSettings {
    /// Research focus the relevance score is judged against.
    pub focus: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_tags: usize,
}

impl Default for SummarizerSettings {
    fn default() -> Self {
        Self {
            focus: "AI research".to_string(),
            temperature: 0.3,
            max_tokens: 1500,
            max_tags: DEFAULT_MAX_TAGS,
        }
    }
}

pub struct Summarizer {
    backend: Arc<dyn LlmBackend>,
    settings: SummarizerSettings,
}

impl Summarizer {
    pub fn new(backend: Arc<dyn LlmBackend>, settings: SummarizerSettings) -> Self {
        Self { backend, settings }
    }

    pub fn settings(&self) -> &SummarizerSettings {
        &self.settings
    }

    #[instrument(skip(self, paper), fields(paper_id = %paper.id, model = %self.backend.model_id()))]
    pub async fn summarize(&self, paper: &PaperRecord) -> Result<Enrichment, PipelineError> {
        let fail = |reason: String| PipelineError::Summarization {
            paper_id: paper.id.clone(),
            reason,
        };

        let req = LlmRequest {
            messages: vec![
                Message::system(system_prompt(&self.settings.focus)),
                Message::user(user_prompt(paper, &self.settings.focus)),
            ],
            max_tokens: Some(self.settings.max_tokens),
            temperature: Some(self.settings.temperature),
        };

        let resp = self.backend.complete(req).await.map_err(|e| fail(e.to_string()))?;
        debug!(
            prompt_tokens = resp.prompt_tokens,
            completion_tokens = resp.completion_tokens,
            "Summary received"
        );
        parse_enrichment(&resp.content, self.settings.max_tags).map_err(fail)
    }
}

fn system_prompt(focus: &str) -> String {
    format!(
        "You are an expert research analyst tracking new arXiv papers on {focus}. \
         You write short, factual digests for a research reading list and judge how \
         relevant each paper is to that focus. Reply with a single JSON object and nothing else."
    )
}

fn user_prompt(paper: &PaperRecord, focus: &str) -> String {
    format!(
        "Title: {title}\n\
         Authors: {authors}\n\
         Categories: {categories}\n\
         Published: {published}\n\
         Abstract:\n{abstract_text}\n\n\
         Return a JSON object with exactly these fields:\n\
         \"summary\": 2-3 sentence plain-language summary of the contribution,\n\
         \"tags\": array of 3-5 short topical tags,\n\
         \"relevance_score\": number from 0 to 10 rating relevance to {focus},\n\
         \"key_insights\": array of 2-3 short insight strings,\n\
         \"methodology\": one short paragraph describing the approach.",
        title = paper.title,
        authors = paper.authors.join(", "),
        categories = paper.categories.join(", "),
        published = paper.published,
        abstract_text = paper.abstract_text,
    )
}

// ── Reply parsing ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawEnrichment {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    tags: Option<Value>,
    #[serde(default)]
    relevance_score: Option<Value>,
    #[serde(default)]
    key_insights: Option<Value>,
    #[serde(default)]
    methodology: Option<String>,
}

/// Parse a model reply into an [`Enrichment`]. The error is a human-readable
/// reason.
pub fn parse_enrichment(reply: &str, max_tags: usize) -> Result<Enrichment, String> {
    let start = reply
        .find('{')
        .ok_or_else(|| "reply contains no JSON object".to_string())?;
    // Parse one value from the first brace; whatever follows it is ignored.
    let raw: RawEnrichment = serde_json::Deserializer::from_str(&reply[start..])
        .into_iter::<RawEnrichment>()
        .next()
        .ok_or_else(|| "reply contains no JSON object".to_string())?
        .map_err(|e| format!("reply JSON is invalid: {e}"))?;

    let summary = raw
        .summary
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "reply has no summary".to_string())?;

    let tags = clean_tags(string_list(raw.tags.as_ref()), max_tags);
    if tags.is_empty() {
        return Err("reply has no tags".to_string());
    }

    Ok(Enrichment {
        summary,
        tags,
        relevance_score: raw.relevance_score.as_ref().and_then(score),
        key_insights: string_list(raw.key_insights.as_ref()),
        methodology: raw
            .methodology
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty()),
    })
}

/// An array of strings, or one comma-separated string.
fn string_list(value: Option<&Value>) -> Vec<String> {
    let items: Vec<String> = match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn clean_tags(raw: Vec<String>, max_tags: usize) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in raw {
        let tag = tag.replace(',', " ").split_whitespace().collect::<Vec<_>>().join(" ");
        if tag.is_empty() || tags.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
            continue;
        }
        tags.push(tag);
        if tags.len() == max_tags {
            break;
        }
    }
    tags
}

fn score(value: &Value) -> Option<f32> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then(|| n.clamp(0.0, 10.0) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use paperwatch_llm::{LlmError, LlmResponse};
    use std::sync::Mutex;

    #[test]
    fn test_parse_fenced_reply() {
        let reply = "Here you go:\n```json\n{\"summary\": \" Debate helps. \", \"tags\": [\"oversight\", \"debate\"], \
                     \"relevance_score\": 8.5, \"key_insights\": [\"a\", \"b\"], \"methodology\": \"RL\"}\n```";
        let e = parse_enrichment(reply, 5).unwrap();
        assert_eq!(e.summary, "Debate helps.");
        assert_eq!(e.tags, vec!["oversight", "debate"]);
        assert_eq!(e.relevance_score, Some(8.5));
        assert_eq!(e.key_insights, vec!["a", "b"]);
        assert_eq!(e.methodology.as_deref(), Some("RL"));
    }

    #[test]
    fn test_comma_separated_tags_and_string_score() {
        let e = parse_enrichment(r#"{"summary": "s", "tags": "alignment, RLHF, rlhf", "relevance_score": "7"}"#, 5).unwrap();
        assert_eq!(e.tags, vec!["alignment", "RLHF"]);
        assert_eq!(e.relevance_score, Some(7.0));
        assert!(e.key_insights.is_empty());
        assert_eq!(e.methodology, None);
    }

    #[test]
    fn test_score_is_clamped_or_dropped() {
        let hi = parse_enrichment(r#"{"summary": "s", "tags": ["t"], "relevance_score": 42}"#, 5).unwrap();
        assert_eq!(hi.relevance_score, Some(10.0));
        let lo = parse_enrichment(r#"{"summary": "s", "tags": ["t"], "relevance_score": -3}"#, 5).unwrap();
        assert_eq!(lo.relevance_score, Some(0.0));
        let bad = parse_enrichment(r#"{"summary": "s", "tags": ["t"], "relevance_score": "high"}"#, 5).unwrap();
        assert_eq!(bad.relevance_score, None);
    }

    #[test]
    fn test_tags_are_capped_and_comma_free() {
        let e = parse_enrichment(
            r#"{"summary": "s", "tags": ["a", "b", "c", "d", "e", "f", "g"]}"#,
            3,
        )
        .unwrap();
        assert_eq!(e.tags, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_trailing_prose_with_braces_is_ignored() {
        let reply = "{\"summary\": \"s\", \"tags\": [\"t\"]}\n\nNote: scores use the {0-10} scale.";
        let e = parse_enrichment(reply, 5).unwrap();
        assert_eq!(e.summary, "s");
        assert_eq!(e.tags, vec!["t"]);
    }

    #[test]
    fn test_missing_summary_or_tags_fails() {
        assert!(parse_enrichment(r#"{"tags": ["t"]}"#, 5).is_err());
        assert!(parse_enrichment(r#"{"summary": "  ", "tags": ["t"]}"#, 5).is_err());
        assert!(parse_enrichment(r#"{"summary": "s", "tags": []}"#, 5).is_err());
        assert!(parse_enrichment("I cannot help with that.", 5).is_err());
        assert!(parse_enrichment("{not json}", 5).is_err());
    }

    struct CannedBackend {
        reply: Result<String, String>,
        seen: Mutex<Vec<LlmRequest>>,
    }

    #[async_trait]
    impl LlmBackend for CannedBackend {
        async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
            self.seen.lock().unwrap().push(req);
            match &self.reply {
                Ok(content) => Ok(LlmResponse {
                    content: content.clone(),
                    model: "canned".into(),
                    prompt_tokens: 10,
                    completion_tokens: 5,
                }),
                Err(msg) => Err(LlmError::Unavailable(msg.clone())),
            }
        }
        fn model_id(&self) -> &str { "canned" }
        fn provider(&self) -> &'static str { "test" }
    }

    fn paper() -> PaperRecord {
        PaperRecord {
            id: "2401.00001".into(),
            title: "Weak-to-strong generalization".into(),
            abstract_text: "We study supervision of strong models by weak ones.".into(),
            authors: vec!["A. Author".into(), "B. Author".into()],
            published: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            url: "https://arxiv.org/abs/2401.00001".into(),
            categories: vec!["cs.LG".into()],
            pdf_url: None,
        }
    }

    #[tokio::test]
    async fn test_summarize_sends_paper_and_focus() {
        let backend = Arc::new(CannedBackend {
            reply: Ok(r#"{"summary": "s", "tags": ["t"]}"#.into()),
            seen: Mutex::new(vec![]),
        });
        let settings = SummarizerSettings { focus: "scalable oversight".into(), ..Default::default() };
        let s = Summarizer::new(backend.clone(), settings);
        s.summarize(&paper()).await.unwrap();

        let seen = backend.seen.lock().unwrap();
        let req = &seen[0];
        assert_eq!(req.messages[0].role, "system");
        assert!(req.messages[0].content.contains("scalable oversight"));
        assert!(req.messages[1].content.contains("Weak-to-strong generalization"));
        assert!(req.messages[1].content.contains("A. Author, B. Author"));
        assert_eq!(req.temperature, Some(0.3));
        assert_eq!(req.max_tokens, Some(1500));
    }

    #[tokio::test]
    async fn test_backend_failure_is_summarization_error() {
        let backend = Arc::new(CannedBackend { reply: Err("down".into()), seen: Mutex::new(vec![]) });
        let s = Summarizer::new(backend, SummarizerSettings::default());
        match s.summarize(&paper()).await {
            Err(PipelineError::Summarization { paper_id, reason }) => {
                assert_eq!(paper_id, "2401.00001");
                assert!(reason.contains("down"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}

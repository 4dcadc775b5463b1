//! End-to-end run for one topic over one date window.
//!
//! Orchestrates:
//!   1. Build the arXiv query from the topic
//!   2. Load the identifiers the destination already holds
//!   3. Fetch matching papers from the source
//!   4. Drop papers already recorded
//!   5. Summarize, filter and write each remaining paper independently
//!   6. Record each written identifier as it lands and report a `RunResult`
//!
//! Per-paper failures are recorded and never stop the other papers. Only a
//! destination outage stops the run early; papers already written stay
//! written and the rest are reported as unattempted. Dropping the run
//! future has the same effect: every completed write is already recorded
//! with the seen-set provider, so the next run skips it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::dedup;
use crate::error::{ErrorKind, PipelineError};
use crate::models::{DateWindow, EnrichedPaper, Enrichment, PaperRecord};
use crate::query::{build_query, TopicConfig};
use crate::sinks::{PaperSink, SeenSetSource};
use crate::sources::PaperSource;
use crate::summarizer::Summarizer;

// ── Settings ──────────────────────────────────────────────────────────────────

/// Optional post-summary filter. Papers it rejects are counted as filtered
/// and never written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelevanceFilter {
    /// Minimum relevance score; unscored papers fail it.
    #[serde(default)]
    pub min_relevance: Option<f32>,
    /// At least one tag must contain one of these (case-insensitive).
    #[serde(default)]
    pub required_tag_keywords: Vec<String>,
}

impl RelevanceFilter {
    pub fn is_active(&self) -> bool {
        self.min_relevance.is_some() || !self.required_tag_keywords.is_empty()
    }

    /// Why `enrichment` is rejected, if it is.
    pub fn rejects(&self, enrichment: &Enrichment) -> Option<String> {
        if let Some(min) = self.min_relevance {
            match enrichment.relevance_score {
                Some(score) if score >= min => {}
                Some(score) => return Some(format!("relevance {score} below {min}")),
                None => return Some("no relevance score".to_string()),
            }
        }

        if !self.required_tag_keywords.is_empty() {
            let tags: Vec<String> = enrichment.tags.iter().map(|t| t.to_lowercase()).collect();
            let hit = self
                .required_tag_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .any(|k| tags.iter().any(|t| t.contains(&k)));
            if !hit {
                return Some(format!("no tag matches {:?}", self.required_tag_keywords));
            }
        }

        None
    }
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Papers summarized/written at once. 1 processes them in order.
    pub concurrency: usize,
    pub filter: RelevanceFilter,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self { concurrency: 1, filter: RelevanceFilter::default() }
    }
}

// ── Result summary ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaperFailure {
    pub paper_id: String,
    pub title: String,
    pub kind: ErrorKind,
    pub cause: String,
}

/// A paper the run wrote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WrittenPaper {
    pub paper_id: String,
    pub title: String,
    pub relevance_score: Option<f32>,
}

/// Outcome of one run. `considered` always equals
/// `new + skipped + failed + filtered + unattempted`.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub topic: String,
    pub query: String,
    pub window: DateWindow,
    pub started_at: DateTime<Utc>,
    pub considered: usize,
    pub new: usize,
    pub skipped: usize,
    pub failed: usize,
    pub filtered: usize,
    pub unattempted: usize,
    pub failures: Vec<PaperFailure>,
    pub written_ids: Vec<String>,
    pub written: Vec<WrittenPaper>,
    /// Source failure or interruption; the run used whatever was fetched.
    pub source_error: Option<String>,
    /// Why the run stopped early, if it did.
    pub aborted: Option<String>,
    pub duration_ms: u64,
}

impl RunResult {
    fn new(topic: &str, query: String, window: DateWindow) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            topic: topic.to_string(),
            query,
            window,
            started_at: Utc::now(),
            considered: 0,
            new: 0,
            skipped: 0,
            failed: 0,
            filtered: 0,
            unattempted: 0,
            failures: Vec::new(),
            written_ids: Vec::new(),
            written: Vec::new(),
            source_error: None,
            aborted: None,
            duration_ms: 0,
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.considered == self.new + self.skipped + self.failed + self.filtered + self.unattempted
    }

    /// No failures, no source trouble, not aborted.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.source_error.is_none() && self.aborted.is_none()
    }

    fn apply(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Written(paper) => {
                self.new += 1;
                self.written_ids.push(paper.paper_id.clone());
                self.written.push(paper);
            }
            Outcome::Skipped     => self.skipped += 1,
            Outcome::Filtered    => self.filtered += 1,
            Outcome::Unattempted => self.unattempted += 1,
            Outcome::Failed(failure) => {
                if matches!(failure.kind, ErrorKind::SinkUnavailable | ErrorKind::Config) && self.aborted.is_none() {
                    self.aborted = Some(failure.cause.clone());
                }
                self.failed += 1;
                self.failures.push(failure);
            }
        }
    }
}

enum Outcome {
    Written(WrittenPaper),
    Skipped,
    Filtered,
    Failed(PaperFailure),
    Unattempted,
}

fn failure(paper: &PaperRecord, err: PipelineError) -> Outcome {
    let kind = err.kind();
    if kind == ErrorKind::DuplicateWrite {
        // The seen-set said this id was new; something else wrote it meanwhile.
        warn!(anomaly = true, paper_id = %paper.id, error = %err, "Duplicate write refused");
    } else {
        warn!(paper_id = %paper.id, kind = ?kind, error = %err, "Paper failed");
    }
    Outcome::Failed(PaperFailure {
        paper_id: paper.id.clone(),
        title: paper.title.clone(),
        kind,
        cause: err.to_string(),
    })
}

// ── Coordinator ───────────────────────────────────────────────────────────────

pub struct RunCoordinator {
    source: Arc<dyn PaperSource>,
    seen: Arc<dyn SeenSetSource>,
    summarizer: Summarizer,
    sink: Arc<dyn PaperSink>,
    settings: RunSettings,
}

impl RunCoordinator {
    pub fn new(
        source: Arc<dyn PaperSource>,
        seen: Arc<dyn SeenSetSource>,
        summarizer: Summarizer,
        sink: Arc<dyn PaperSink>,
        settings: RunSettings,
    ) -> Self {
        Self { source, seen, summarizer, sink, settings }
    }

    /// Run the pipeline once for `topic` over `window`.
    ///
    /// Returns `Err` only when nothing could be attempted: a topic without
    /// search terms (`Config`) or a destination that cannot say what it
    /// already holds (`SinkUnavailable`). Everything else is reported in the
    /// `RunResult`.
    #[instrument(skip_all, fields(topic = %topic.name, window = %window))]
    pub async fn run(&self, topic: &TopicConfig, window: DateWindow) -> Result<RunResult, PipelineError> {
        let t0 = std::time::Instant::now();

        let query = build_query(topic, Some(&window))?;
        let mut result = RunResult::new(&topic.name, query, window);
        info!(
            run_id = %result.run_id,
            query = %result.query,
            source = self.source.name(),
            sink = self.sink.name(),
            "Starting run"
        );

        let seen = self.seen.load().await.map_err(|e| match e {
            PipelineError::SinkUnavailable(_) => e,
            other => PipelineError::SinkUnavailable(other.to_string()),
        })?;
        debug!(seen = seen.len(), provider = self.seen.name(), "Seen-set loaded");

        let papers = match self.source.fetch(&result.query, &window).await {
            Ok(report) => {
                if let Some(cause) = report.interrupted {
                    result.source_error = Some(format!("fetch interrupted after {} page(s): {cause}", report.pages));
                }
                info!(n = report.papers.len(), pages = report.pages, "Papers retrieved");
                report.papers
            }
            Err(e) => {
                warn!(error = %e, "Source unavailable; continuing with no papers");
                result.source_error = Some(e.to_string());
                Vec::new()
            }
        };

        result.considered = papers.len();
        let candidates = dedup::filter(papers, &seen);
        result.skipped = result.considered - candidates.len();

        if !candidates.is_empty() {
            let claims: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
            let abort = AtomicBool::new(false);

            let mut outcomes = stream::iter(candidates)
                .map(|paper| self.process(paper, &claims, &abort))
                .buffer_unordered(self.settings.concurrency.max(1));

            while let Some(outcome) = outcomes.next().await {
                result.apply(outcome);
            }
        }

        result.duration_ms = t0.elapsed().as_millis() as u64;

        info!(
            run_id      = %result.run_id,
            considered  = result.considered,
            new         = result.new,
            skipped     = result.skipped,
            failed      = result.failed,
            filtered    = result.filtered,
            unattempted = result.unattempted,
            aborted     = result.aborted.is_some(),
            duration_ms = result.duration_ms,
            "Run complete"
        );
        if let Some(ref reason) = result.aborted {
            warn!(run_id = %result.run_id, reason = %reason, "Run aborted");
        }

        Ok(result)
    }

    async fn process(
        &self,
        paper: PaperRecord,
        claims: &Mutex<HashSet<String>>,
        abort: &AtomicBool,
    ) -> Outcome {
        if abort.load(Ordering::SeqCst) {
            return Outcome::Unattempted;
        }
        if !claims.lock().await.insert(paper.id.clone()) {
            debug!(paper_id = %paper.id, "Already handled in this run");
            return Outcome::Skipped;
        }

        let enrichment = match self.summarizer.summarize(&paper).await {
            Ok(enrichment) => enrichment,
            Err(e) => return failure(&paper, e),
        };

        if let Some(reason) = self.settings.filter.rejects(&enrichment) {
            debug!(paper_id = %paper.id, reason = %reason, "Filtered out");
            return Outcome::Filtered;
        }

        if abort.load(Ordering::SeqCst) {
            return Outcome::Unattempted;
        }

        let enriched = EnrichedPaper { paper, enrichment };
        match self.sink.upsert(&enriched).await {
            Ok(receipt) => {
                info!(paper_id = %enriched.paper.id, location = %receipt.location, "Paper written");
                if let Err(e) = self.seen.record(std::slice::from_ref(&enriched.paper.id)).await {
                    warn!(
                        paper_id = %enriched.paper.id,
                        provider = self.seen.name(),
                        error = %e,
                        "Could not record written identifier"
                    );
                }
                Outcome::Written(WrittenPaper {
                    paper_id: enriched.paper.id,
                    title: enriched.paper.title,
                    relevance_score: enriched.enrichment.relevance_score,
                })
            }
            Err(e) => {
                if e.aborts_run() {
                    abort.store(true, Ordering::SeqCst);
                }
                failure(&enriched.paper, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrichment(score: Option<f32>, tags: &[&str]) -> Enrichment {
        Enrichment {
            summary: "s".into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            relevance_score: score,
            ..Default::default()
        }
    }

    #[test]
    fn test_inactive_filter_accepts_everything() {
        let f = RelevanceFilter::default();
        assert!(!f.is_active());
        assert_eq!(f.rejects(&enrichment(None, &[])), None);
    }

    #[test]
    fn test_min_relevance() {
        let f = RelevanceFilter { min_relevance: Some(6.0), ..Default::default() };
        assert!(f.rejects(&enrichment(Some(6.0), &["t"])).is_none());
        assert!(f.rejects(&enrichment(Some(5.9), &["t"])).is_some());
        assert!(f.rejects(&enrichment(None, &["t"])).is_some());
    }

    #[test]
    fn test_required_tag_keywords_match_substrings() {
        let f = RelevanceFilter {
            required_tag_keywords: vec!["oversight".into(), "Alignment".into()],
            ..Default::default()
        };
        assert!(f.rejects(&enrichment(None, &["Scalable Oversight"])).is_none());
        assert!(f.rejects(&enrichment(None, &["AI alignment"])).is_none());
        assert!(f.rejects(&enrichment(None, &["vision", "robotics"])).is_some());
    }

    #[test]
    fn test_apply_keeps_accounting_balanced() {
        let window = DateWindow::last_days(Utc::now().date_naive(), 1).unwrap();
        let mut r = RunResult::new("t", "q".into(), window);
        r.considered = 5;
        r.apply(Outcome::Written(WrittenPaper {
            paper_id: "a".into(),
            title: "A".into(),
            relevance_score: Some(7.0),
        }));
        r.apply(Outcome::Skipped);
        r.apply(Outcome::Filtered);
        r.apply(Outcome::Unattempted);
        r.apply(Outcome::Failed(PaperFailure {
            paper_id: "e".into(),
            title: "E".into(),
            kind: ErrorKind::SinkUnavailable,
            cause: "503".into(),
        }));
        assert!(r.is_balanced());
        assert_eq!(r.written_ids, vec!["a"]);
        assert_eq!(r.written[0].title, "A");
        assert_eq!(r.aborted.as_deref(), Some("503"));
        assert!(!r.is_clean());
    }
}

//! In-process sink used for dry runs and tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use super::{PaperSink, SeenSetSource, WriteReceipt};
use crate::dedup::SeenSet;
use crate::error::PipelineError;
use crate::models::EnrichedPaper;

#[derive(Default)]
pub struct MemorySink {
    records: Mutex<BTreeMap<String, Option<EnrichedPaper>>>,
    attempts: AtomicUsize,
    /// Log each write at info level (dry-run output).
    verbose: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that echoes every accepted paper to the log.
    pub fn dry_run() -> Self {
        Self { verbose: true, ..Self::default() }
    }

    /// Pretend these identifiers were written by an earlier run.
    pub fn with_existing<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sink = Self::default();
        if let Ok(mut records) = sink.records.lock() {
            records.extend(ids.into_iter().map(|id| (id.into(), None)));
        }
        sink
    }

    /// Papers written through [`PaperSink::upsert`], ordered by identifier.
    pub fn written(&self) -> Vec<EnrichedPaper> {
        self.records
            .lock()
            .map(|r| r.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.lock().map(|r| r.contains_key(id)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls to `upsert`, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

fn poisoned() -> PipelineError {
    PipelineError::SinkUnavailable("memory sink lock poisoned".to_string())
}

#[async_trait]
impl PaperSink for MemorySink {
    async fn upsert(&self, paper: &EnrichedPaper) -> Result<WriteReceipt, PipelineError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let id = paper.paper.id.clone();
        let mut records = self.records.lock().map_err(|_| poisoned())?;
        if records.contains_key(&id) {
            return Err(PipelineError::DuplicateWrite(id));
        }
        if self.verbose {
            info!(
                paper_id = %id,
                title = %paper.paper.title,
                tags = ?paper.enrichment.tags,
                score = ?paper.enrichment.relevance_score,
                "[dry-run] would write paper"
            );
        }
        records.insert(id.clone(), Some(paper.clone()));
        Ok(WriteReceipt { location: format!("memory:{id}"), paper_id: id })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[async_trait]
impl SeenSetSource for MemorySink {
    async fn load(&self) -> Result<SeenSet, PipelineError> {
        let records = self.records.lock().map_err(|_| poisoned())?;
        Ok(records.keys().cloned().collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Enrichment, PaperRecord};
    use chrono::NaiveDate;

    fn enriched(id: &str) -> EnrichedPaper {
        EnrichedPaper {
            paper: PaperRecord {
                id: id.into(),
                title: "T".into(),
                abstract_text: String::new(),
                authors: vec![],
                published: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                url: String::new(),
                categories: vec![],
                pdf_url: None,
            },
            enrichment: Enrichment { summary: "s".into(), tags: vec!["t".into()], ..Default::default() },
        }
    }

    #[tokio::test]
    async fn test_upsert_then_duplicate() {
        let sink = MemorySink::new();
        let receipt = sink.upsert(&enriched("a")).await.unwrap();
        assert_eq!(receipt.paper_id, "a");

        let err = sink.upsert(&enriched("a")).await.unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateWrite(ref id) if id == "a"));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.attempts(), 2);
    }

    #[tokio::test]
    async fn test_existing_ids_block_writes_and_seed_the_seen_set() {
        let sink = MemorySink::with_existing(["b"]);
        assert!(sink.upsert(&enriched("b")).await.is_err());
        assert!(sink.written().is_empty());
        assert!(sink.load().await.unwrap().contains("b"));
    }
}

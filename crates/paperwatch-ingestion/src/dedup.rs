//! Deduplication against identifiers already in the destination.

use std::collections::HashSet;

use tracing::debug;

use crate::models::PaperRecord;

/// Identifiers already recorded in the destination when a run starts.
pub type SeenSet = HashSet<String>;

/// Result of a deduplication check.
#[derive(Debug, PartialEq, Eq)]
pub enum DedupResult {
    /// Paper is new, proceed with summarization.
    New,
    /// Identifier is already recorded.
    AlreadyRecorded(String),
}

pub fn check_duplicate(incoming: &PaperRecord, seen: &SeenSet) -> DedupResult {
    if seen.contains(&incoming.id) {
        DedupResult::AlreadyRecorded(incoming.id.clone())
    } else {
        DedupResult::New
    }
}

/// The papers whose identifier is not in `seen`, in input order.
pub fn filter(papers: Vec<PaperRecord>, seen: &SeenSet) -> Vec<PaperRecord> {
    papers
        .into_iter()
        .filter(|p| match check_duplicate(p, seen) {
            DedupResult::New => true,
            DedupResult::AlreadyRecorded(id) => {
                debug!(paper_id = %id, "Already recorded, skipping");
                false
            }
        })
        .collect()
}

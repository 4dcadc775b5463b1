//! Destinations for enriched papers, and the providers that say which
//! papers a destination already holds.

pub mod memory;
pub mod notion;
pub mod snapshot;

use async_trait::async_trait;
use serde::Serialize;

use crate::dedup::SeenSet;
use crate::error::PipelineError;
use crate::models::EnrichedPaper;

pub use memory::MemorySink;
pub use notion::{DatabaseStatus, NotionPaperSink};
pub use snapshot::SnapshotSeenSet;

/// Where a written record ended up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteReceipt {
    pub paper_id: String,
    /// Destination-specific locator (page id, URL, key).
    pub location: String,
}

#[async_trait]
pub trait PaperSink: Send + Sync {
    /// Create the record for `paper`. Fails with `DuplicateWrite` and leaves
    /// the destination untouched if one already exists for the identifier.
    async fn upsert(&self, paper: &EnrichedPaper) -> Result<WriteReceipt, PipelineError>;

    fn name(&self) -> &str;
}

#[async_trait]
pub trait SeenSetSource: Send + Sync {
    /// Identifiers recorded before this run. Failure is `SinkUnavailable`.
    async fn load(&self) -> Result<SeenSet, PipelineError>;

    /// Note identifiers the destination has just accepted. Called after
    /// every successful write, so an interrupted run loses none of them.
    /// Providers that read the destination directly have nothing to do.
    async fn record(&self, _ids: &[String]) -> Result<(), PipelineError> {
        Ok(())
    }

    fn name(&self) -> &str;
}

//! paperwatch-ingestion: arXiv → LLM → Notion pipeline.
//! - Query construction from a topic definition
//! - arXiv Atom client with newest-first paging
//! - Deduplication against the destination's recorded identifiers
//! - LLM summarization into summary / tags / relevance score
//! - Sinks (Notion, in-memory) and seen-set providers (live, snapshot)
//! - The run coordinator tying these together

pub mod dedup;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod sinks;
pub mod sources;
pub mod summarizer;

pub use error::{ErrorKind, PipelineError};
pub use models::{DateWindow, EnrichedPaper, Enrichment, PaperRecord, MAX_LOOKBACK_DAYS};
pub use pipeline::{PaperFailure, RelevanceFilter, RunCoordinator, RunResult, RunSettings, WrittenPaper};
pub use query::{build_query, Combine, TopicConfig};
pub use sinks::{MemorySink, NotionPaperSink, PaperSink, SeenSetSource, SnapshotSeenSet, WriteReceipt};
pub use sources::arxiv::{ArxivClient, ArxivSettings};
pub use sources::{FetchReport, PaperSource};
pub use summarizer::{Summarizer, SummarizerSettings};

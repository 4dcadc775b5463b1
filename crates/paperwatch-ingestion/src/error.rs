//! Pipeline error kinds.
//!
//! Run-scoped kinds (`Config`, `SourceUnavailable`, `SinkUnavailable`) decide
//! whether a run starts or continues; paper-scoped kinds are recorded against
//! a single paper and never stop the others.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Summarization failed for {paper_id}: {reason}")]
    Summarization { paper_id: String, reason: String },

    #[error("Duplicate write for {0}: identifier already present in destination")]
    DuplicateWrite(String),

    #[error("Write rejected for {paper_id}: {reason}")]
    Write { paper_id: String, reason: String },

    #[error("Sink unavailable: {0}")]
    SinkUnavailable(String),
}

/// Serializable discriminant of [`PipelineError`], used in run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    SourceUnavailable,
    Summarization,
    DuplicateWrite,
    Write,
    SinkUnavailable,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Config(_)             => ErrorKind::Config,
            PipelineError::SourceUnavailable(_)  => ErrorKind::SourceUnavailable,
            PipelineError::Summarization { .. }  => ErrorKind::Summarization,
            PipelineError::DuplicateWrite(_)     => ErrorKind::DuplicateWrite,
            PipelineError::Write { .. }          => ErrorKind::Write,
            PipelineError::SinkUnavailable(_)    => ErrorKind::SinkUnavailable,
        }
    }

    /// Whether hitting this error stops the remainder of the run.
    pub fn aborts_run(&self) -> bool {
        matches!(self, PipelineError::Config(_) | PipelineError::SinkUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_config_and_sink_outage_abort() {
        assert!(PipelineError::Config("x".into()).aborts_run());
        assert!(PipelineError::SinkUnavailable("down".into()).aborts_run());
        assert!(!PipelineError::SourceUnavailable("x".into()).aborts_run());
        assert!(!PipelineError::DuplicateWrite("2401.00001".into()).aborts_run());
        assert!(!PipelineError::Summarization { paper_id: "a".into(), reason: "b".into() }.aborts_run());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let v = serde_json::to_value(PipelineError::DuplicateWrite("a".into()).kind()).unwrap();
        assert_eq!(v, "duplicate_write");
    }
}

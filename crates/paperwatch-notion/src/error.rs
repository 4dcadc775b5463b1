//! Notion error types.

use paperwatch_common::PaperwatchError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NotionError>;

#[derive(Debug, Error)]
pub enum NotionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] PaperwatchError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Notion API error [{status} {code}]: {message}")]
    Api { status: u16, code: String, message: String },

    #[error("Notion rate limit hit (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },
}

impl NotionError {
    /// The request itself was rejected as malformed (bad property value,
    /// over-long text, …). Retrying the same payload will not help, but the
    /// service is otherwise reachable.
    pub fn is_validation(&self) -> bool {
        matches!(self, NotionError::Api { status: 400, .. })
    }
}

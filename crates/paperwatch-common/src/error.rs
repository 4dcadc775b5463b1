use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaperwatchError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Egress blocked: host {host} is not in the allowlist")]
    EgressBlocked { host: String },
}

pub type Result<T> = std::result::Result<T, PaperwatchError>;

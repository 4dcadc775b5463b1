//! paperwatch-common: Shared error type and the egress-capped HTTP client
//! used by every crate that talks to arXiv, an LLM provider or Notion.

pub mod error;
pub mod sandbox;

pub use error::{PaperwatchError, Result};
pub use sandbox::SandboxClient;

/// User agent sent with every outbound request.
pub const USER_AGENT: &str = concat!("paperwatch/", env!("CARGO_PKG_VERSION"));

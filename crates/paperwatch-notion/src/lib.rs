//! Notion REST layer
//!
//! A thin, typed client over the handful of Notion endpoints the agent needs:
//! database query (with cursor pagination), page creation, and database
//! retrieval/update for schema checks. Property payloads are plain
//! `serde_json::Value`s built with the helpers in [`properties`].
//!
//! # Example
//!
//! ```rust,no_run
//! use paperwatch_common::SandboxClient;
//! use paperwatch_notion::{NotionClient, NOTION_BASE_URL};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let http = SandboxClient::builder().allow_endpoint(NOTION_BASE_URL)?.build()?;
//! let notion = NotionClient::new(http, NOTION_BASE_URL, "secret_xxx".to_string().into());
//! let pages = notion.query_all("database-id", None).await?;
//! println!("{} pages", pages.len());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod properties;

pub use client::{Database, DatabaseQuery, NotionClient, Page, QueryPage, MAX_PAGE_SIZE, NOTION_BASE_URL, NOTION_VERSION};
pub use error::{NotionError, Result};

//! arXiv API client.
//! Uses the Atom query interface: https://info.arxiv.org/help/api/user-manual.html
//! Results are requested newest first so a date window can end the walk early.

use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use paperwatch_common::SandboxClient;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, instrument, warn};

use super::{collect_pages, FetchReport, PaperSource, Paging};
use crate::error::PipelineError;
use crate::models::{abs_url, normalize_arxiv_id, DateWindow, PaperRecord};

pub const ARXIV_API_URL: &str = "https://export.arxiv.org/api/query";

#[derive(Debug, Clone)]
pub struct ArxivSettings {
    pub base_url: String,
    pub page_size: usize,
    pub max_results: usize,
    /// arXiv asks clients to leave ~3 s between calls.
    pub page_delay: Duration,
}

impl Default for ArxivSettings {
    fn default() -> Self {
        Self {
            base_url: ARXIV_API_URL.to_string(),
            page_size: 100,
            max_results: 200,
            page_delay: Duration::from_secs(3),
        }
    }
}

pub struct ArxivClient {
    client: SandboxClient,
    settings: ArxivSettings,
}

impl ArxivClient {
    pub fn new(client: SandboxClient, settings: ArxivSettings) -> Self {
        Self { client, settings }
    }

    #[instrument(skip(self, query))]
    async fn fetch_page(&self, query: &str, start: usize) -> Result<Vec<PaperRecord>, PipelineError> {
        let start_param = start.to_string();
        let size_param = self.settings.page_size.to_string();
        let resp = self
            .client
            .get(&self.settings.base_url)
            .map_err(unavailable)?
            .query(&[
                ("search_query", query),
                ("start", start_param.as_str()),
                ("max_results", size_param.as_str()),
                ("sortBy", "submittedDate"),
                ("sortOrder", "descending"),
            ])
            .send()
            .await
            .map_err(unavailable)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(unavailable(format!("HTTP {status}")));
        }
        let xml = resp.text().await.map_err(unavailable)?;
        let papers = parse_atom_feed(&xml)?;
        debug!(n = papers.len(), "arXiv page parsed");
        Ok(papers)
    }
}

fn unavailable(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::SourceUnavailable(format!("arXiv: {e}"))
}

#[async_trait]
impl PaperSource for ArxivClient {
    #[instrument(skip(self), fields(source = "arxiv"))]
    async fn fetch(&self, query: &str, window: &DateWindow) -> Result<FetchReport, PipelineError> {
        let paging = Paging {
            page_size: self.settings.page_size,
            max_results: self.settings.max_results,
            page_delay: self.settings.page_delay,
        };
        collect_pages(&paging, window, |start| self.fetch_page(query, start)).await
    }

    fn name(&self) -> &str {
        "arxiv"
    }
}

// ── Atom parsing ──────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq)]
enum Field {
    None,
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
}

#[derive(Default)]
struct RawEntry {
    id: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<String>,
    categories: Vec<String>,
    pdf_url: Option<String>,
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse one page of the arXiv Atom feed.
///
/// The API reports query errors as a feed whose single entry has an
/// `.../api/errors#...` id and the title `Error`; that becomes
/// `SourceUnavailable` carrying the error summary.
pub fn parse_atom_feed(xml: &str) -> Result<Vec<PaperRecord>, PipelineError> {
    let mut papers = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut current: Option<RawEntry> = None;
    let mut field = Field::None;
    let mut author_name = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"entry"     => current = Some(RawEntry::default()),
                b"id"        if current.is_some() => field = Field::Id,
                b"title"     if current.is_some() => field = Field::Title,
                b"summary"   if current.is_some() => field = Field::Summary,
                b"published" if current.is_some() => field = Field::Published,
                b"author"    => author_name.clear(),
                b"name"      if current.is_some() => field = Field::AuthorName,
                b"category" | b"link" => entry_attrs(e, current.as_mut()),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => {
                if matches!(e.local_name().as_ref(), b"category" | b"link") {
                    entry_attrs(e, current.as_mut());
                }
            }
            Ok(Event::Text(ref e)) => {
                if let Some(ref mut entry) = current {
                    let text = e.unescape().unwrap_or_default();
                    match field {
                        Field::Id         => entry.id.push_str(&text),
                        Field::Title      => entry.title.push_str(&text),
                        Field::Summary    => entry.summary.push_str(&text),
                        Field::Published  => entry.published.push_str(&text),
                        Field::AuthorName => author_name.push_str(&text),
                        Field::None       => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"author" => {
                    if let Some(ref mut entry) = current {
                        let name = collapse_whitespace(&author_name);
                        if !name.is_empty() {
                            entry.authors.push(name);
                        }
                    }
                }
                b"entry" => {
                    if let Some(entry) = current.take() {
                        if entry.id.contains("/api/errors") {
                            return Err(PipelineError::SourceUnavailable(format!(
                                "arXiv API error: {}",
                                collapse_whitespace(&entry.summary)
                            )));
                        }
                        if let Some(paper) = finish_entry(entry) {
                            papers.push(paper);
                        }
                    }
                    field = Field::None;
                }
                _ => field = Field::None,
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(PipelineError::SourceUnavailable(format!(
                    "malformed arXiv feed at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(papers)
}

fn entry_attrs(e: &BytesStart<'_>, entry: Option<&mut RawEntry>) {
    let Some(entry) = entry else { return };
    match e.local_name().as_ref() {
        b"category" => {
            if let Some(term) = attr(e, b"term") {
                if !entry.categories.contains(&term) {
                    entry.categories.push(term);
                }
            }
        }
        b"link" => {
            if attr(e, b"title").as_deref() == Some("pdf") {
                entry.pdf_url = attr(e, b"href");
            }
        }
        _ => {}
    }
}

fn finish_entry(entry: RawEntry) -> Option<PaperRecord> {
    let id = normalize_arxiv_id(&entry.id);
    let title = collapse_whitespace(&entry.title);
    if id.is_empty() || title.is_empty() {
        warn!(raw_id = %entry.id, "Skipping arXiv entry without id or title");
        return None;
    }
    let published = match DateTime::parse_from_rfc3339(entry.published.trim()) {
        Ok(ts) => ts.date_naive(),
        Err(e) => {
            warn!(paper_id = %id, published = %entry.published, error = %e, "Skipping arXiv entry with bad date");
            return None;
        }
    };

    Some(PaperRecord {
        url: abs_url(&id),
        id,
        title,
        abstract_text: collapse_whitespace(&entry.summary),
        authors: entry.authors,
        published,
        categories: entry.categories,
        pdf_url: entry.pdf_url,
    })
}

//! Paper source clients.

pub mod arxiv;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::models::{DateWindow, PaperRecord};

/// What one fetch produced.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub papers: Vec<PaperRecord>,
    /// Result pages successfully read.
    pub pages: usize,
    /// Set when a later page failed and `papers` is only what came before it.
    pub interrupted: Option<String>,
}

/// Common interface for paper sources.
#[async_trait]
pub trait PaperSource: Send + Sync {
    /// Fetch every record matching `query` published inside `window`,
    /// newest first.
    async fn fetch(&self, query: &str, window: &DateWindow) -> Result<FetchReport, PipelineError>;

    fn name(&self) -> &str;
}

/// Paging limits shared by offset-paginated sources.
#[derive(Debug, Clone)]
pub struct Paging {
    pub page_size: usize,
    pub max_results: usize,
    pub page_delay: Duration,
}

/// Drive an offset-paginated, newest-first listing until it runs dry, leaves
/// `window`, or `max_results` records have been kept.
///
/// `fetch_page(start)` returns the page beginning at offset `start`. A failure
/// before any record was kept is returned as-is; a later one ends the walk
/// and is reported in [`FetchReport::interrupted`].
pub async fn collect_pages<F, Fut>(
    paging: &Paging,
    window: &DateWindow,
    mut fetch_page: F,
) -> Result<FetchReport, PipelineError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<PaperRecord>, PipelineError>>,
{
    let mut report = FetchReport::default();
    let mut start = 0usize;

    loop {
        if start > 0 && !paging.page_delay.is_zero() {
            tokio::time::sleep(paging.page_delay).await;
        }

        let page = match fetch_page(start).await {
            Ok(page) => page,
            Err(e) if report.papers.is_empty() => return Err(e),
            Err(e) => {
                warn!(start, kept = report.papers.len(), error = %e, "Page fetch failed; keeping earlier pages");
                report.interrupted = Some(e.to_string());
                break;
            }
        };
        report.pages += 1;

        let page_len = page.len();
        let mut left_window = false;
        for paper in page {
            if paper.published < window.start {
                left_window = true;
                continue;
            }
            if paper.published > window.end || report.papers.len() >= paging.max_results {
                continue;
            }
            report.papers.push(paper);
        }
        debug!(start, page_len, kept = report.papers.len(), "Page processed");

        if report.papers.len() >= paging.max_results {
            debug!(max_results = paging.max_results, "Result cap reached");
            break;
        }
        if left_window || page_len < paging.page_size {
            break;
        }
        start += page_len;
    }

    Ok(report)
}

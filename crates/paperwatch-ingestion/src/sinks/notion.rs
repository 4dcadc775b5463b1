//! Notion database sink.
//!
//! One page per paper, keyed by the `ArXiv ID` rich-text property. The same
//! database doubles as the live seen-set provider and backs the `status` and
//! `setup-db` commands.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use paperwatch_notion::{properties as prop, NotionClient, NotionError, Page};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};

use super::{PaperSink, SeenSetSource, WriteReceipt};
use crate::dedup::SeenSet;
use crate::error::PipelineError;
use crate::models::{normalize_arxiv_id, EnrichedPaper};

// Property names
pub const TITLE: &str           = "Title";
pub const AUTHORS: &str         = "Authors";
pub const ABSTRACT: &str        = "Abstract";
pub const ARXIV_ID: &str        = "ArXiv ID";
pub const PUBLISHED_DATE: &str  = "Published Date";
pub const CATEGORIES: &str      = "Categories";
pub const ARXIV_URL: &str       = "ArXiv URL";
pub const PDF_URL: &str         = "PDF URL";
pub const SUMMARY: &str         = "Summary";
pub const TAGS: &str            = "Tags";
pub const RELEVANCE_SCORE: &str = "Relevance Score";
pub const KEY_INSIGHTS: &str    = "Key Insights";
pub const METHODOLOGY: &str     = "Methodology";
pub const STATUS: &str          = "Status";

/// Review states a page moves through; new pages start as the first.
pub const STATUSES: [&str; 3] = ["New", "Reviewed", "Rejected"];

/// Pages published this many days before today, or later, count as recent.
pub const RECENT_DAYS: u64 = 7;

/// Property definitions the sink writes, as accepted by the database update
/// endpoint.
pub fn schema() -> Vec<(&'static str, Value)> {
    vec![
        (TITLE,           json!({ "title": {} })),
        (AUTHORS,         json!({ "rich_text": {} })),
        (ABSTRACT,        json!({ "rich_text": {} })),
        (ARXIV_ID,        json!({ "rich_text": {} })),
        (PUBLISHED_DATE,  json!({ "date": {} })),
        (CATEGORIES,      json!({ "multi_select": { "options": [] } })),
        (ARXIV_URL,       json!({ "url": {} })),
        (PDF_URL,         json!({ "url": {} })),
        (SUMMARY,         json!({ "rich_text": {} })),
        (TAGS,            json!({ "multi_select": { "options": [] } })),
        (RELEVANCE_SCORE, json!({ "number": { "format": "number" } })),
        (KEY_INSIGHTS,    json!({ "rich_text": {} })),
        (METHODOLOGY,     json!({ "rich_text": {} })),
        (STATUS,          json!({ "select": { "options": [
            { "name": "New",      "color": "blue"  },
            { "name": "Reviewed", "color": "green" },
            { "name": "Rejected", "color": "red"   },
        ] } })),
    ]
}

/// Map a Notion failure to the pipeline's error kinds. With `paper_id` the
/// failure belongs to one page write, and a rejected payload stays scoped to
/// that paper.
fn map_error(err: NotionError, paper_id: Option<&str>) -> PipelineError {
    match (paper_id, &err) {
        (Some(id), e) if e.is_validation() => PipelineError::Write {
            paper_id: id.to_string(),
            reason: err.to_string(),
        },
        (Some(id), NotionError::Serialization(_)) => PipelineError::Write {
            paper_id: id.to_string(),
            reason: err.to_string(),
        },
        _ => PipelineError::SinkUnavailable(err.to_string()),
    }
}

/// Page counts by review status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatabaseStatus {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    /// Pages whose `Published Date` falls in the last [`RECENT_DAYS`] days.
    pub recent: usize,
}

impl DatabaseStatus {
    pub fn count(&self, status: &str) -> usize {
        self.by_status.get(status).copied().unwrap_or(0)
    }

    /// Tally `pages` as of `today`.
    pub fn tally(pages: &[Page], today: NaiveDate) -> Self {
        let since = today.checked_sub_days(Days::new(RECENT_DAYS)).unwrap_or(NaiveDate::MIN);

        let mut status = Self { total: pages.len(), ..Default::default() };
        for name in STATUSES {
            status.by_status.insert(name.to_string(), 0);
        }
        for page in pages {
            let name = page
                .property(STATUS)
                .and_then(prop::select_name)
                .unwrap_or("(unset)")
                .to_string();
            *status.by_status.entry(name).or_insert(0) += 1;

            if page
                .property(PUBLISHED_DATE)
                .and_then(prop::date_start)
                .is_some_and(|day| day >= since)
            {
                status.recent += 1;
            }
        }
        status
    }
}

/// Whether any of `pages` holds `id`. Pages may carry a versioned
/// identifier, so stored values are compared after normalization.
fn holds_id(pages: &[Page], id: &str) -> bool {
    pages
        .iter()
        .filter_map(|page| page.property(ARXIV_ID))
        .any(|v| normalize_arxiv_id(&prop::plain_text(v)) == id)
}

pub struct NotionPaperSink {
    client: NotionClient,
    database_id: String,
}

impl NotionPaperSink {
    pub fn new(client: NotionClient, database_id: impl Into<String>) -> Self {
        Self { client, database_id: database_id.into() }
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    /// Page properties for one paper.
    pub fn page_properties(paper: &EnrichedPaper) -> Map<String, Value> {
        let p = &paper.paper;
        let e = &paper.enrichment;
        let insights = e
            .key_insights
            .iter()
            .map(|i| format!("• {i}"))
            .collect::<Vec<_>>()
            .join("\n");

        let mut props = Map::new();
        props.insert(TITLE.into(),           prop::title(&p.title));
        props.insert(AUTHORS.into(),         prop::rich_text(&p.authors.join(", ")));
        props.insert(ABSTRACT.into(),        prop::rich_text(&p.abstract_text));
        props.insert(ARXIV_ID.into(),        prop::rich_text(&p.id));
        props.insert(PUBLISHED_DATE.into(),  prop::date(p.published));
        props.insert(CATEGORIES.into(),      prop::multi_select(&p.categories));
        props.insert(ARXIV_URL.into(),       prop::url(Some(&p.url)));
        props.insert(PDF_URL.into(),         prop::url(p.pdf_url.as_deref()));
        props.insert(SUMMARY.into(),         prop::rich_text(&e.summary));
        props.insert(TAGS.into(),            prop::multi_select(&e.tags));
        props.insert(RELEVANCE_SCORE.into(), prop::number(e.relevance_score.map(f64::from)));
        props.insert(KEY_INSIGHTS.into(),    prop::rich_text(&insights));
        props.insert(METHODOLOGY.into(),     prop::rich_text(e.methodology.as_deref().unwrap_or("")));
        props.insert(STATUS.into(),          prop::select(STATUSES[0]));
        props
    }

    /// Whether a page for `id` exists. Candidates are fetched by prefix and
    /// checked with [`holds_id`].
    async fn exists(&self, id: &str) -> Result<bool, NotionError> {
        let filter = json!({ "property": ARXIV_ID, "rich_text": { "starts_with": id } });
        let pages = self.client.query_all(&self.database_id, Some(filter)).await?;
        Ok(holds_id(&pages, id))
    }

    /// Page counts by `Status`, plus recently published pages.
    #[instrument(skip(self), fields(database = %self.database_id))]
    pub async fn status(&self) -> Result<DatabaseStatus, PipelineError> {
        let pages = self
            .client
            .query_all(&self.database_id, None)
            .await
            .map_err(|e| map_error(e, None))?;
        Ok(DatabaseStatus::tally(&pages, Utc::now().date_naive()))
    }

    /// Add any property the sink writes that the database lacks, renaming the
    /// database's title column if it is called something else. Returns the
    /// changes made. A property that exists with the wrong type is reported
    /// as a configuration error and left alone.
    #[instrument(skip(self), fields(database = %self.database_id))]
    pub async fn ensure_schema(&self) -> Result<Vec<String>, PipelineError> {
        let db = self
            .client
            .retrieve_database(&self.database_id)
            .await
            .map_err(|e| map_error(e, None))?;
        info!(title = %db.title_text(), "Checking database schema");

        let mut changes = Vec::new();
        let mut update = Map::new();
        let mut mismatched = Vec::new();

        for (name, definition) in schema() {
            let wanted = definition
                .as_object()
                .and_then(|o| o.keys().next())
                .cloned()
                .unwrap_or_default();

            match db.property_type(name) {
                Some(actual) if actual == wanted.as_str() => {}
                Some(actual) => mismatched.push(format!("'{name}' is {actual}, expected {wanted}")),
                None if wanted == "title" => {
                    let current = db
                        .properties
                        .iter()
                        .find(|(_, v)| v["type"] == "title")
                        .map(|(k, _)| k.clone());
                    if let Some(current) = current {
                        update.insert(current.clone(), json!({ "name": name }));
                        changes.push(format!("renamed '{current}' to '{name}'"));
                    }
                }
                None => {
                    update.insert(name.to_string(), definition);
                    changes.push(format!("added '{name}' ({wanted})"));
                }
            }
        }

        if !mismatched.is_empty() {
            return Err(PipelineError::Config(format!(
                "Notion database has incompatible properties: {}",
                mismatched.join("; ")
            )));
        }

        if update.is_empty() {
            debug!("Schema already complete");
        } else {
            self.client
                .update_database_properties(&self.database_id, update)
                .await
                .map_err(|e| map_error(e, None))?;
            info!(changes = changes.len(), "Database schema updated");
        }
        Ok(changes)
    }
}

#[async_trait]
impl PaperSink for NotionPaperSink {
    #[instrument(skip(self, paper), fields(paper_id = %paper.paper.id))]
    async fn upsert(&self, paper: &EnrichedPaper) -> Result<WriteReceipt, PipelineError> {
        let id = paper.paper.id.as_str();

        if self.exists(id).await.map_err(|e| map_error(e, None))? {
            return Err(PipelineError::DuplicateWrite(id.to_string()));
        }

        let page = self
            .client
            .create_page(&self.database_id, Self::page_properties(paper))
            .await
            .map_err(|e| map_error(e, Some(id)))?;

        debug!(page_id = %page.id, "Notion page created");
        Ok(WriteReceipt {
            paper_id: id.to_string(),
            location: page.url.unwrap_or(page.id),
        })
    }

    fn name(&self) -> &str {
        "notion"
    }
}

#[async_trait]
impl SeenSetSource for NotionPaperSink {
    #[instrument(skip(self), fields(database = %self.database_id))]
    async fn load(&self) -> Result<SeenSet, PipelineError> {
        let filter = json!({ "property": ARXIV_ID, "rich_text": { "is_not_empty": true } });
        let pages = self
            .client
            .query_all(&self.database_id, Some(filter))
            .await
            .map_err(|e| map_error(e, None))?;

        let seen: SeenSet = pages
            .iter()
            .filter_map(|page| page.property(ARXIV_ID))
            .map(|v| normalize_arxiv_id(&prop::plain_text(v)))
            .filter(|id| !id.is_empty())
            .collect();
        if seen.len() < pages.len() {
            warn!(pages = pages.len(), ids = seen.len(), "Some pages share an identifier or have none");
        }
        info!(n = seen.len(), "Loaded recorded identifiers from Notion");
        Ok(seen)
    }

    fn name(&self) -> &str {
        "notion"
    }
}

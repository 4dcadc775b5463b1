//! Data models for the ingestion pipeline.

use chrono::{Days, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

lazy_static! {
    static ref VERSION_SUFFIX: Regex = Regex::new(r"v\d+$").unwrap();
}

/// One paper as discovered on arXiv, before enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    /// Versionless arXiv identifier (`2401.01234`, `math.AG/0601001`).
    pub id: String,
    pub title: String,
    pub abstract_text: String,
    pub authors: Vec<String>,
    pub published: NaiveDate,
    /// Canonical abstract page.
    pub url: String,
    pub categories: Vec<String>,
    pub pdf_url: Option<String>,
}

/// Model-produced digest for one paper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub summary: String,
    pub tags: Vec<String>,
    /// 0–10, absent when the model gave nothing usable.
    pub relevance_score: Option<f32>,
    pub key_insights: Vec<String>,
    pub methodology: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedPaper {
    pub paper: PaperRecord,
    pub enrichment: Enrichment,
}

/// Longest lookback accepted from configuration or the command line.
pub const MAX_LOOKBACK_DAYS: u32 = 36_500;

/// Inclusive range of publication dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, PipelineError> {
        if start > end {
            return Err(PipelineError::Config(format!(
                "date window start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// `today` and the `days` days before it.
    pub fn last_days(today: NaiveDate, days: u32) -> Result<Self, PipelineError> {
        let start = today
            .checked_sub_days(Days::new(u64::from(days)))
            .ok_or_else(|| PipelineError::Config(format!("lookback of {days} days from {today} is out of range")))?;
        Ok(Self { start, end: today })
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Strip URL prefix and version suffix from an arXiv identifier.
///
/// `http://arxiv.org/abs/2401.01234v2` → `2401.01234`,
/// `math.AG/0601001v1` → `math.AG/0601001`.
pub fn normalize_arxiv_id(raw: &str) -> String {
    let raw = raw.trim();
    let bare = match raw.find("/abs/") {
        Some(pos) => &raw[pos + "/abs/".len()..],
        None => raw,
    };
    let bare = bare.trim_end_matches('/');
    VERSION_SUFFIX.replace(bare, "").into_owned()
}

pub fn abs_url(id: &str) -> String {
    format!("https://arxiv.org/abs/{id}")
}

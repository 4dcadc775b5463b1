//! arXiv search-query construction.
//!
//! Builds the `search_query` expression for the arXiv API from a topic
//! definition. Pure; no I/O.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::models::DateWindow;

lazy_static! {
    /// `ti:`, `abs:`, `cat:`… prefixes the arXiv query language understands.
    static ref FIELD_PREFIX: Regex = Regex::new(r"^(ti|au|abs|co|jr|cat|rn|id|all):").unwrap();
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combine {
    /// Any term may match.
    #[default]
    Any,
    /// Every term must match.
    All,
}

impl Combine {
    fn operator(self) -> &'static str {
        match self {
            Combine::Any => " OR ",
            Combine::All => " AND ",
        }
    }
}

/// What to watch for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Human-readable focus, also given to the summarizer.
    #[serde(default = "default_topic_name")]
    pub name: String,
    #[serde(default)]
    pub terms: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub combine: Combine,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_topic_name()    -> String { "AI research".to_string() }
fn default_lookback_days() -> u32    { 1 }
fn default_max_results()   -> usize  { 200 }

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            name: default_topic_name(),
            terms: Vec::new(),
            categories: Vec::new(),
            combine: Combine::default(),
            lookback_days: default_lookback_days(),
            max_results: default_max_results(),
        }
    }
}

/// Build the arXiv `search_query` for `topic`, optionally restricted to
/// submissions inside `window`.
pub fn build_query(topic: &TopicConfig, window: Option<&DateWindow>) -> Result<String, PipelineError> {
    let clauses: Vec<String> = topic
        .terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(term_clause)
        .collect();

    if clauses.is_empty() {
        return Err(PipelineError::Config(format!(
            "topic '{}' has no search terms",
            topic.name
        )));
    }

    let mut query = format!("({})", clauses.join(topic.combine.operator()));

    let categories: Vec<String> = topic
        .categories
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(|c| format!("cat:{c}"))
        .collect();
    if !categories.is_empty() {
        query = format!("{query} AND ({})", categories.join(" OR "));
    }

    if let Some(w) = window {
        query = format!(
            "{query} AND submittedDate:[{}0000 TO {}2359]",
            w.start.format("%Y%m%d"),
            w.end.format("%Y%m%d"),
        );
    }

    Ok(query)
}

fn term_clause(term: &str) -> String {
    if FIELD_PREFIX.is_match(term) {
        // Compound expressions must stay grouped once joined with the others.
        if term.contains(" OR ") || term.contains(" AND ") || term.contains(" ANDNOT ") {
            format!("({term})")
        } else {
            term.to_string()
        }
    } else {
        format!("abs:\"{}\"", term.replace('"', ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn topic(terms: &[&str], categories: &[&str]) -> TopicConfig {
        TopicConfig {
            name: "alignment".into(),
            terms: terms.iter().map(|s| s.to_string()).collect(),
            categories: categories.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_bare_phrases_are_quoted_abstract_clauses() {
        let q = build_query(&topic(&["scalable oversight", "reward hacking"], &[]), None).unwrap();
        assert_eq!(q, r#"(abs:"scalable oversight" OR abs:"reward hacking")"#);
    }

    #[test]
    fn test_field_qualified_terms_are_verbatim() {
        let q = build_query(&topic(&["ti:agents", "au:Hinton"], &[]), None).unwrap();
        assert_eq!(q, "(ti:agents OR au:Hinton)");
    }

    #[test]
    fn test_compound_term_is_grouped() {
        let q = build_query(&topic(&[r#"abs:"a" AND abs:"b""#, "c"], &[]), None).unwrap();
        assert_eq!(q, r#"((abs:"a" AND abs:"b") OR abs:"c")"#);
    }

    #[test]
    fn test_all_combines_with_and() {
        let mut t = topic(&["llm", "safety"], &[]);
        t.combine = Combine::All;
        assert_eq!(build_query(&t, None).unwrap(), r#"(abs:"llm" AND abs:"safety")"#);
    }

    #[test]
    fn test_categories_and_window() {
        let w = DateWindow::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 7).unwrap(),
        )
        .unwrap();
        let q = build_query(&topic(&["alignment"], &["cs.AI", "cs.LG"]), Some(&w)).unwrap();
        assert_eq!(
            q,
            r#"(abs:"alignment") AND (cat:cs.AI OR cat:cs.LG) AND submittedDate:[202401010000 TO 202401072359]"#
        );
    }

    #[test]
    fn test_blank_terms_are_a_config_error() {
        let err = build_query(&topic(&["  ", ""], &["cs.AI"]), None).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_topic_defaults() {
        let t: TopicConfig = serde_json::from_str(r#"{"terms": ["x"]}"#).unwrap();
        assert_eq!(t.lookback_days, 1);
        assert_eq!(t.max_results, 200);
        assert_eq!(t.combine, Combine::Any);
    }
}

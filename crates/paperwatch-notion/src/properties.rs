//! Property value builders and readers.
//!
//! Builders produce the JSON Notion expects when creating a page. Readers pull
//! plain values back out of query results.

use chrono::NaiveDate;
use serde_json::{json, Value};

/// Notion rejects rich-text segments longer than this.
pub const MAX_TEXT_SEGMENT: usize = 2000;
/// Notion rejects rich-text arrays with more segments than this.
pub const MAX_TEXT_SEGMENTS: usize = 100;
/// Multi-select option names are capped at this length.
pub const MAX_OPTION_NAME: usize = 100;

fn text_segments(text: &str) -> Vec<Value> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(MAX_TEXT_SEGMENT)
        .take(MAX_TEXT_SEGMENTS)
        .map(|chunk| json!({ "type": "text", "text": { "content": chunk.iter().collect::<String>() } }))
        .collect()
}

pub fn title(text: &str) -> Value {
    json!({ "title": text_segments(text) })
}

pub fn rich_text(text: &str) -> Value {
    json!({ "rich_text": text_segments(text) })
}

pub fn date(day: NaiveDate) -> Value {
    json!({ "date": { "start": day.format("%Y-%m-%d").to_string() } })
}

pub fn url(link: Option<&str>) -> Value {
    json!({ "url": link })
}

pub fn number(value: Option<f64>) -> Value {
    json!({ "number": value })
}

pub fn select(name: &str) -> Value {
    json!({ "select": { "name": option_name(name) } })
}

/// Multi-select from arbitrary labels. Commas are not allowed in option names,
/// blanks are dropped and duplicates collapsed.
pub fn multi_select<S: AsRef<str>>(names: &[S]) -> Value {
    let mut seen: Vec<String> = Vec::new();
    for name in names {
        let clean = option_name(name.as_ref());
        if clean.is_empty() || seen.iter().any(|s| s.eq_ignore_ascii_case(&clean)) {
            continue;
        }
        seen.push(clean);
    }
    let options: Vec<Value> = seen.into_iter().map(|n| json!({ "name": n })).collect();
    json!({ "multi_select": options })
}

fn option_name(raw: &str) -> String {
    raw.replace(',', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_OPTION_NAME)
        .collect()
}

// ── Readers ───────────────────────────────────────────────────────────────────

/// Concatenated plain text of a title / rich_text property, or of a bare
/// rich-text array.
pub fn plain_text(prop: &Value) -> String {
    let segments = if let Some(arr) = prop.as_array() {
        arr
    } else if let Some(arr) = prop["title"].as_array() {
        arr
    } else if let Some(arr) = prop["rich_text"].as_array() {
        arr
    } else {
        return String::new();
    };

    segments
        .iter()
        .filter_map(|s| s["plain_text"].as_str().or_else(|| s["text"]["content"].as_str()))
        .collect()
}

pub fn select_name(prop: &Value) -> Option<&str> {
    prop["select"]["name"].as_str()
}

/// Start day of a date property. Date-time starts keep only the day.
pub fn date_start(prop: &Value) -> Option<NaiveDate> {
    let start = prop["date"]["start"].as_str()?;
    NaiveDate::parse_from_str(start.get(..10)?, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_text_is_split_into_segments() {
        let text = "a".repeat(MAX_TEXT_SEGMENT * 2 + 5);
        let v = rich_text(&text);
        let segs = v["rich_text"].as_array().unwrap();
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[2]["text"]["content"].as_str().unwrap().len(), 5);
        assert_eq!(plain_text(&v), text);
    }

    #[test]
    fn test_segments_split_on_char_boundaries() {
        let text = "é".repeat(MAX_TEXT_SEGMENT + 1);
        let v = rich_text(&text);
        let segs = v["rich_text"].as_array().unwrap();
        assert_eq!(segs[0]["text"]["content"].as_str().unwrap().chars().count(), MAX_TEXT_SEGMENT);
    }

    #[test]
    fn test_empty_text_has_no_segments() {
        assert_eq!(rich_text("")["rich_text"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_multi_select_sanitizes_names() {
        let v = multi_select(&["AI safety", "oversight, scalable", "ai SAFETY", "  "]);
        let names: Vec<&str> = v["multi_select"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["AI safety", "oversight scalable"]);
    }

    #[test]
    fn test_date_start_reads_day_and_datetime() {
        let d = NaiveDate::from_ymd_opt(2025, 8, 27).unwrap();
        assert_eq!(date_start(&date(d)), Some(d));
        assert_eq!(date_start(&json!({ "date": { "start": "2025-08-27T10:00:00.000+00:00" } })), Some(d));
        assert_eq!(date_start(&json!({ "date": null })), None);
        assert_eq!(date_start(&json!({ "date": { "start": "soon" } })), None);
    }

    #[test]
    fn test_date_and_number() {
        let d = NaiveDate::from_ymd_opt(2025, 8, 27).unwrap();
        assert_eq!(date(d)["date"]["start"], "2025-08-27");
        assert_eq!(number(None)["number"], Value::Null);
        assert_eq!(number(Some(7.5))["number"], 7.5);
    }

    #[test]
    fn test_readers() {
        let page_prop = json!({"type": "select", "select": {"name": "Reviewed"}});
        assert_eq!(select_name(&page_prop), Some("Reviewed"));
        assert_eq!(select_name(&json!({"select": null})), None);
        assert_eq!(plain_text(&title("Attention")), "Attention");
    }
}

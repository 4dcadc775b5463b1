use super::*;
use secrecy::ExposeSecret;
use std::collections::HashMap;

const MINIMAL: &str = r#"
[topic]
name = "scalable oversight"
terms = ["scalable oversight", "ti:debate"]
categories = ["cs.AI", "cs.LG"]

[notion]
database_id = "abc123"
"#;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |key: &str| map.get(key).cloned()
}

fn no_env(_: &str) -> Option<String> {
    None
}

fn parse(toml_src: &str) -> Config {
    toml::from_str(toml_src).unwrap()
}

#[test]
fn test_defaults() {
    let c = parse(MINIMAL);
    assert_eq!(c.llm.provider, BackendKind::Gemini);
    assert_eq!(c.llm.model, "gemini-2.0-flash");
    assert_eq!(c.llm.temperature, 0.3);
    assert_eq!(c.llm.max_tokens, 1500);
    assert_eq!(c.topic.max_results, 200);
    assert_eq!(c.topic.lookback_days, 1);
    assert_eq!(c.arxiv.page_size, 100);
    assert_eq!(c.arxiv.base_url, ARXIV_API_URL);
    assert_eq!(c.dedup.strategy, SeenStrategy::Live);
    assert_eq!(c.run.concurrency, 1);
    assert_eq!(c.schedule.mode, ScheduleMode::Daily);
}

#[test]
fn test_secrets_fall_back_to_environment() {
    let env = env_from(&[("NOTION_API_KEY", "secret_notion"), ("GOOGLE_API_KEY", "g-key")]);
    let s = parse(MINIMAL).validate(env).unwrap();

    let notion = s.notion().unwrap();
    assert_eq!(notion.token.expose_secret(), "secret_notion");
    assert_eq!(notion.database_id, "abc123");
    assert_eq!(s.llm().unwrap().api_key.as_ref().unwrap().expose_secret(), "g-key");
}

#[test]
fn test_generic_llm_key_wins_over_provider_key() {
    let env = env_from(&[("PAPERWATCH_LLM_API_KEY", "generic"), ("GOOGLE_API_KEY", "g-key")]);
    let s = parse(MINIMAL).validate(env).unwrap();
    assert_eq!(s.llm().unwrap().api_key.as_ref().unwrap().expose_secret(), "generic");
}

#[test]
fn test_file_key_wins_over_environment() {
    let mut c = parse(MINIMAL);
    c.llm.api_key = Some("from-file".into());
    let s = c.validate(env_from(&[("PAPERWATCH_LLM_API_KEY", "generic")])).unwrap();
    assert_eq!(s.llm().unwrap().api_key.as_ref().unwrap().expose_secret(), "from-file");
}

#[test]
fn test_missing_credentials_are_reported_on_use() {
    let s = parse(MINIMAL).validate(no_env).unwrap();
    assert!(!s.has_notion());
    assert!(matches!(s.notion(), Err(PipelineError::Config(_))));
    assert!(matches!(s.llm(), Err(PipelineError::Config(_))));
}

#[test]
fn test_openai_compatible_needs_base_url_but_no_key() {
    let mut c = parse(MINIMAL);
    c.llm.provider = BackendKind::OpenAiCompatible;
    assert!(c.validate(no_env).is_err());

    c.llm.base_url = Some("http://localhost:11434".into());
    let s = c.validate(no_env).unwrap();
    assert!(s.llm().is_ok());
}

#[test]
fn test_range_checks_collect_every_problem() {
    let mut c = parse(MINIMAL);
    c.llm.temperature = 2.5;
    c.llm.max_tokens = 0;
    c.arxiv.page_size = 5000;
    c.run.concurrency = 0;
    c.topic.lookback_days = 200_000_000;
    match c.validate(no_env) {
        Err(PipelineError::Config(msg)) => {
            assert!(msg.contains("topic.lookback_days"));
            assert!(msg.contains("llm.temperature"));
            assert!(msg.contains("llm.max_tokens"));
            assert!(msg.contains("arxiv.page_size"));
            assert!(msg.contains("run.concurrency"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn test_topic_without_terms_is_rejected() {
    let c = parse("[topic]\nterms = [\"  \"]\n");
    assert!(c.validate(no_env).is_err());
}

#[test]
fn test_weekly_schedule() {
    let c = parse(&format!("{MINIMAL}\n[schedule]\nmode = \"weekly\"\ntime = \"07:30\"\ndays = [\"mon\", \"Thursday\", \"mon\"]\n"));
    let s = c.validate(no_env).unwrap();
    assert_eq!(
        s.schedule,
        Schedule::Weekly {
            days: vec![Weekday::Mon, Weekday::Thu],
            at: NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
        }
    );
}

#[test]
fn test_bad_schedule_is_rejected() {
    let mut c = parse(MINIMAL);
    c.schedule.time = "9am".into();
    assert!(c.validate(no_env).is_err());

    let mut c = parse(MINIMAL);
    c.schedule.mode = ScheduleMode::Weekly;
    c.schedule.days = vec![];
    assert!(c.validate(no_env).is_err());

    let mut c = parse(MINIMAL);
    c.schedule.mode = ScheduleMode::Interval;
    c.schedule.interval_minutes = 0;
    assert!(c.validate(no_env).is_err());
}

#[test]
fn test_run_filter_and_snapshot_settings() {
    let c = parse(&format!(
        "{MINIMAL}\n[run]\nconcurrency = 4\nmin_relevance = 6\nrequired_tag_keywords = [\"oversight\"]\n\n[dedup]\nstrategy = \"snapshot\"\nsnapshot_path = \"state/seen.json\"\n"
    ));
    let s = c.validate(no_env).unwrap();
    assert_eq!(s.run.concurrency, 4);
    assert_eq!(s.run.filter.min_relevance, Some(6.0));
    assert_eq!(s.run.filter.required_tag_keywords, vec!["oversight"]);
    assert!(matches!(s.seen, SeenSettings::Snapshot(ref p) if p == Path::new("state/seen.json")));
}

#[test]
fn test_settings_wire_topic_into_components() {
    let s = parse(MINIMAL).validate(no_env).unwrap();
    assert_eq!(s.summarizer.focus, "scalable oversight");
    assert_eq!(s.arxiv.max_results, 200);
    assert_eq!(s.arxiv.page_delay, Duration::from_secs(3));
    assert_eq!(s.log_filter, DEFAULT_LOG_FILTER);
}

#[test]
fn test_load_missing_file_mentions_example() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(&dir.path().join("paperwatch.toml")).unwrap_err();
    assert!(err.to_string().contains("paperwatch.example.toml"));
}

#[test]
fn test_example_config_parses() {
    let example = include_str!("../../../../paperwatch.example.toml");
    let c: Config = toml::from_str(example).unwrap();
    assert!(c.validate(no_env).is_ok());
}

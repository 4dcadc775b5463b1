//! Configuration loading for paperwatch.
//! Reads paperwatch.toml (or the path given by --config / PAPERWATCH_CONFIG),
//! fills secrets from the environment, and validates everything once into
//! typed `Settings` for the components.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveTime, Weekday};
use paperwatch_ingestion::sources::arxiv::ARXIV_API_URL;
use paperwatch_ingestion::{
    ArxivSettings, PipelineError, RelevanceFilter, RunSettings, SummarizerSettings, TopicConfig,
    MAX_LOOKBACK_DAYS,
};
use paperwatch_llm::{BackendConfig, BackendKind};
use paperwatch_notion::NOTION_BASE_URL;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::schedule::Schedule;

pub const DEFAULT_LOG_FILTER: &str = "paperwatch=info,warn";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub topic: TopicConfig,
    #[serde(default)]
    pub arxiv: ArxivConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub notion: NotionConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArxivConfig {
    #[serde(default = "default_arxiv_url")]
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_page_delay_secs")]
    pub page_delay_secs: u64,
    #[serde(default = "default_arxiv_timeout")]
    pub timeout_secs: u64,
}

fn default_arxiv_url()       -> String { ARXIV_API_URL.to_string() }
fn default_page_size()       -> usize  { 100 }
fn default_page_delay_secs() -> u64    { 3 }
fn default_arxiv_timeout()   -> u64    { 60 }

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            base_url: default_arxiv_url(),
            page_size: default_page_size(),
            page_delay_secs: default_page_delay_secs(),
            timeout_secs: default_arxiv_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: BackendKind,
    #[serde(default = "default_model")]
    pub model: String,
    /// Required for `openai_compatible`; overrides the provider default otherwise.
    pub base_url: Option<String>,
    /// Falls back to PAPERWATCH_LLM_API_KEY, then the provider's own variable.
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_tags")]
    pub max_tags: usize,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_provider()    -> BackendKind { BackendKind::Gemini }
fn default_model()       -> String      { "gemini-2.0-flash".to_string() }
fn default_temperature() -> f32         { 0.3 }
fn default_max_tokens()  -> u32         { 1500 }
fn default_max_tags()    -> usize       { 5 }
fn default_llm_timeout() -> u64         { 60 }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_tags: default_max_tags(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotionConfig {
    /// Integration token; falls back to NOTION_API_KEY.
    pub api_key: Option<String>,
    /// Falls back to NOTION_DATABASE_ID.
    #[serde(default)]
    pub database_id: String,
    #[serde(default = "default_notion_url")]
    pub base_url: String,
    #[serde(default = "default_notion_timeout")]
    pub timeout_secs: u64,
}

fn default_notion_url()     -> String { NOTION_BASE_URL.to_string() }
fn default_notion_timeout() -> u64    { 30 }

impl Default for NotionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            database_id: String::new(),
            base_url: default_notion_url(),
            timeout_secs: default_notion_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeenStrategy {
    /// Read identifiers from the Notion database at the start of each run.
    #[default]
    Live,
    /// Keep identifiers in a local JSON file.
    Snapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default)]
    pub strategy: SeenStrategy,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

fn default_snapshot_path() -> PathBuf { PathBuf::from("paperwatch-seen.json") }

impl Default for DedupConfig {
    fn default() -> Self {
        Self { strategy: SeenStrategy::default(), snapshot_path: default_snapshot_path() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(flatten)]
    pub filter: RelevanceFilter,
}

fn default_concurrency() -> usize { 1 }

impl Default for RunConfig {
    fn default() -> Self {
        Self { concurrency: default_concurrency(), filter: RelevanceFilter::default() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    #[default]
    Daily,
    Weekly,
    Interval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub mode: ScheduleMode,
    /// Local wall-clock time, HH:MM.
    #[serde(default = "default_schedule_time")]
    pub time: String,
    /// Weekday names for `weekly` ("mon", "friday", …).
    #[serde(default)]
    pub days: Vec<String>,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
}

fn default_schedule_time()    -> String { "09:00".to_string() }
fn default_interval_minutes() -> u64    { 60 }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            mode: ScheduleMode::default(),
            time: default_schedule_time(),
            days: Vec::new(),
            interval_minutes: default_interval_minutes(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; RUST_LOG wins when set.
    pub level: Option<String>,
}

// ── Validated settings ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NotionSettings {
    pub base_url: String,
    pub database_id: String,
    pub token: SecretString,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub enum SeenSettings {
    Live,
    Snapshot(PathBuf),
}

/// Everything the components need, checked once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub topic: TopicConfig,
    pub arxiv: ArxivSettings,
    pub arxiv_timeout: Duration,
    llm: BackendConfig,
    pub llm_timeout: Duration,
    pub summarizer: SummarizerSettings,
    notion: Option<NotionSettings>,
    pub seen: SeenSettings,
    pub run: RunSettings,
    pub schedule: Schedule,
    pub log_filter: String,
}

impl Settings {
    /// Notion credentials, for commands that write to or read from the
    /// database.
    pub fn notion(&self) -> Result<&NotionSettings, PipelineError> {
        self.notion.as_ref().ok_or_else(|| {
            PipelineError::Config(
                "Notion is not configured: set notion.api_key (or NOTION_API_KEY) and \
                 notion.database_id (or NOTION_DATABASE_ID)"
                    .to_string(),
            )
        })
    }

    pub fn has_notion(&self) -> bool {
        self.notion.is_some()
    }

    /// The LLM backend config, refusing a provider that needs a key and has none.
    pub fn llm(&self) -> Result<&BackendConfig, PipelineError> {
        if self.llm.kind.requires_api_key() && self.llm.api_key.is_none() {
            return Err(PipelineError::Config(format!(
                "no API key for LLM provider '{}': set llm.api_key or PAPERWATCH_LLM_API_KEY",
                self.llm.kind.as_str()
            )));
        }
        Ok(&self.llm)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Provider-specific key variable consulted after PAPERWATCH_LLM_API_KEY.
fn provider_key_var(kind: BackendKind) -> Option<&'static str> {
    match kind {
        BackendKind::Gemini           => Some("GOOGLE_API_KEY"),
        BackendKind::OpenAi           => Some("OPENAI_API_KEY"),
        BackendKind::Anthropic        => Some("ANTHROPIC_API_KEY"),
        BackendKind::OpenAiCompatible => None,
    }
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

impl Config {
    /// Load and parse the file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            anyhow::bail!(
                "Config file not found: {}\n\
                 Copy paperwatch.example.toml to paperwatch.toml and edit it.",
                path.display()
            );
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Check every section and resolve secrets, looking up unset ones with
    /// `env`. All problems are reported together.
    pub fn validate(&self, env: impl Fn(&str) -> Option<String>) -> Result<Settings, PipelineError> {
        let mut problems: Vec<String> = Vec::new();

        // topic
        if self.topic.terms.iter().all(|t| t.trim().is_empty()) {
            problems.push("topic.terms must contain at least one search term".into());
        }
        if self.topic.max_results == 0 {
            problems.push("topic.max_results must be at least 1".into());
        }
        if self.topic.lookback_days > MAX_LOOKBACK_DAYS {
            problems.push(format!(
                "topic.lookback_days must be at most {MAX_LOOKBACK_DAYS} (got {})",
                self.topic.lookback_days
            ));
        }

        // arxiv
        if !(1..=2000).contains(&self.arxiv.page_size) {
            problems.push(format!("arxiv.page_size must be 1-2000 (got {})", self.arxiv.page_size));
        }

        // llm
        let llm = &self.llm;
        if !(0.0..=2.0).contains(&llm.temperature) {
            problems.push(format!("llm.temperature must be 0-2 (got {})", llm.temperature));
        }
        if llm.max_tokens == 0 {
            problems.push("llm.max_tokens must be greater than 0".into());
        }
        if llm.max_tags == 0 {
            problems.push("llm.max_tags must be at least 1".into());
        }
        if llm.model.trim().is_empty() {
            problems.push("llm.model must not be empty".into());
        }
        let llm_base_url = non_empty(llm.base_url.clone());
        if llm.provider == BackendKind::OpenAiCompatible && llm_base_url.is_none() {
            problems.push("llm.base_url is required for provider openai_compatible".into());
        }
        let llm_key = non_empty(llm.api_key.clone())
            .or_else(|| non_empty(env("PAPERWATCH_LLM_API_KEY")))
            .or_else(|| provider_key_var(llm.provider).and_then(|var| non_empty(env(var))));

        // notion
        let notion_key = non_empty(self.notion.api_key.clone()).or_else(|| non_empty(env("NOTION_API_KEY")));
        let database_id = non_empty(Some(self.notion.database_id.clone()))
            .or_else(|| non_empty(env("NOTION_DATABASE_ID")));
        let notion = match (notion_key, database_id) {
            (Some(key), Some(database_id)) => Some(NotionSettings {
                base_url: self.notion.base_url.trim_end_matches('/').to_string(),
                database_id,
                token: SecretString::from(key),
                timeout: Duration::from_secs(self.notion.timeout_secs),
            }),
            _ => None,
        };

        // dedup
        let seen = match self.dedup.strategy {
            SeenStrategy::Live => SeenSettings::Live,
            SeenStrategy::Snapshot => SeenSettings::Snapshot(self.dedup.snapshot_path.clone()),
        };

        // run
        if self.run.concurrency == 0 {
            problems.push("run.concurrency must be at least 1".into());
        }
        if let Some(min) = self.run.filter.min_relevance {
            if !(0.0..=10.0).contains(&min) {
                problems.push(format!("run.min_relevance must be 0-10 (got {min})"));
            }
        }

        // schedule
        let schedule = self.schedule_settings(&mut problems);

        // logging
        let log_filter = non_empty(self.logging.level.clone()).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let schedule = match schedule {
            Some(schedule) if problems.is_empty() => schedule,
            _ => return Err(PipelineError::Config(problems.join("; "))),
        };

        Ok(Settings {
            topic: self.topic.clone(),
            arxiv: ArxivSettings {
                base_url: self.arxiv.base_url.clone(),
                page_size: self.arxiv.page_size,
                max_results: self.topic.max_results,
                page_delay: Duration::from_secs(self.arxiv.page_delay_secs),
            },
            arxiv_timeout: Duration::from_secs(self.arxiv.timeout_secs),
            llm: BackendConfig {
                kind: llm.provider,
                model: llm.model.trim().to_string(),
                base_url: llm_base_url,
                api_key: llm_key.map(SecretString::from),
            },
            llm_timeout: Duration::from_secs(llm.timeout_secs),
            summarizer: SummarizerSettings {
                focus: self.topic.name.clone(),
                temperature: llm.temperature,
                max_tokens: llm.max_tokens,
                max_tags: llm.max_tags,
            },
            notion,
            seen,
            run: RunSettings {
                concurrency: self.run.concurrency,
                filter: self.run.filter.clone(),
            },
            schedule,
            log_filter,
        })
    }

    fn schedule_settings(&self, problems: &mut Vec<String>) -> Option<Schedule> {
        let s = &self.schedule;
        match s.mode {
            ScheduleMode::Interval => {
                if s.interval_minutes == 0 {
                    problems.push("schedule.interval_minutes must be at least 1".into());
                    return None;
                }
                Some(Schedule::Interval { every: Duration::from_secs(s.interval_minutes * 60) })
            }
            ScheduleMode::Daily | ScheduleMode::Weekly => {
                let Some(at) = parse_time(&s.time) else {
                    problems.push(format!("schedule.time must be HH:MM (got '{}')", s.time));
                    return None;
                };
                if s.mode == ScheduleMode::Daily {
                    return Some(Schedule::Daily { at });
                }

                let mut days = Vec::new();
                for raw in &s.days {
                    match raw.trim().parse::<Weekday>() {
                        Ok(day) if !days.contains(&day) => days.push(day),
                        Ok(_) => {}
                        Err(_) => problems.push(format!("schedule.days: unknown weekday '{raw}'")),
                    }
                }
                if days.is_empty() {
                    problems.push("schedule.days must list at least one weekday for weekly mode".into());
                    return None;
                }
                Some(Schedule::Weekly { days, at })
            }
        }
    }
}

#[cfg(test)]
mod tests;

//! Component wiring and the run modes built on it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{Local, Utc};
use paperwatch_common::SandboxClient;
use paperwatch_ingestion::sinks::notion::{RECENT_DAYS, STATUSES};
use paperwatch_ingestion::{
    ArxivClient, DateWindow, MemorySink, NotionPaperSink, PaperSink, RunCoordinator, RunResult,
    SeenSetSource, SnapshotSeenSet, Summarizer,
};
use paperwatch_llm::build_backend;
use paperwatch_notion::NotionClient;
use tracing::{error, info, warn};

use crate::config::{SeenSettings, Settings};

/// HTTP client allowed to reach `endpoint` and nothing else.
fn http_client(endpoint: &str, timeout: Duration) -> anyhow::Result<SandboxClient> {
    let client = SandboxClient::builder()
        .allow_endpoint(endpoint)?
        .timeout(timeout)
        .build()?;
    Ok(client)
}

pub fn notion_sink(settings: &Settings) -> anyhow::Result<NotionPaperSink> {
    let notion = settings.notion()?;
    let http = http_client(&notion.base_url, notion.timeout)?;
    let client = NotionClient::new(http, notion.base_url.clone(), notion.token.clone());
    Ok(NotionPaperSink::new(client, notion.database_id.clone()))
}

/// Build the coordinator. A dry run writes into memory; it still reads the
/// seen-set from the configured provider when Notion is available, so the
/// preview matches what a real run would write.
pub fn build_coordinator(settings: &Settings, dry_run: bool) -> anyhow::Result<RunCoordinator> {
    let arxiv_http = http_client(&settings.arxiv.base_url, settings.arxiv_timeout)?;
    let source = Arc::new(ArxivClient::new(arxiv_http, settings.arxiv.clone()));

    let llm_cfg = settings.llm()?;
    let llm_url = llm_cfg
        .resolved_base_url()
        .context("LLM provider has no base URL")?;
    let backend = build_backend(llm_cfg, http_client(&llm_url, settings.llm_timeout)?)?;
    let summarizer = Summarizer::new(backend, settings.summarizer.clone());

    let seen: Arc<dyn SeenSetSource>;
    let sink: Arc<dyn PaperSink>;
    if dry_run {
        let memory = Arc::new(MemorySink::dry_run());
        seen = match (&settings.seen, settings.has_notion()) {
            (SeenSettings::Snapshot(path), _) => Arc::new(SnapshotPreview(SnapshotSeenSet::new(path))),
            (SeenSettings::Live, true) => Arc::new(notion_sink(settings)?),
            (SeenSettings::Live, false) => {
                warn!("Notion not configured; dry run treats every paper as new");
                memory.clone()
            }
        };
        sink = memory;
    } else {
        let notion = Arc::new(notion_sink(settings)?);
        seen = match &settings.seen {
            SeenSettings::Live => notion.clone(),
            SeenSettings::Snapshot(path) => Arc::new(SnapshotSeenSet::new(path)),
        };
        sink = notion;
    }

    Ok(RunCoordinator::new(source, seen, summarizer, sink, settings.run.clone()))
}

/// Reads a snapshot without recording a dry run's pretend writes into it.
struct SnapshotPreview(SnapshotSeenSet);

#[async_trait::async_trait]
impl SeenSetSource for SnapshotPreview {
    async fn load(&self) -> Result<paperwatch_ingestion::dedup::SeenSet, paperwatch_ingestion::PipelineError> {
        self.0.load().await
    }

    fn name(&self) -> &str {
        "snapshot (read-only)"
    }
}

// ── Reporting ─────────────────────────────────────────────────────────────────

pub fn print_result(result: &RunResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!("Run {} ({}) over {}", result.run_id, result.topic, result.window);
    println!(
        "  considered {}  new {}  skipped {}  failed {}  filtered {}  unattempted {}  ({} ms)",
        result.considered,
        result.new,
        result.skipped,
        result.failed,
        result.filtered,
        result.unattempted,
        result.duration_ms,
    );
    if let Some(ref e) = result.source_error {
        println!("  source error: {e}");
    }
    if let Some(ref reason) = result.aborted {
        println!("  aborted: {reason}");
    }
    for w in &result.written {
        match w.relevance_score {
            Some(score) => println!("  ✓ {} (relevance {score:.1}) {}", w.paper_id, w.title),
            None => println!("  ✓ {} {}", w.paper_id, w.title),
        }
    }
    for f in &result.failures {
        println!("  ✗ {} [{:?}] {}: {}", f.paper_id, f.kind, f.title, f.cause);
    }
    Ok(())
}

/// Whether the run should count as failed for the process exit status.
pub fn run_failed(result: &RunResult) -> bool {
    result.aborted.is_some() || (result.source_error.is_some() && result.considered == 0)
}

// ── Modes ─────────────────────────────────────────────────────────────────────

/// Recurring mode: wait for the next fire time, run over the lookback
/// window, repeat. Ctrl-C stops the loop, also in the middle of a run.
pub async fn watch(settings: &Settings, coordinator: &RunCoordinator, run_now: bool) -> anyhow::Result<()> {
    watch_until(settings, coordinator, run_now, tokio::signal::ctrl_c()).await
}

/// The watch loop, stopped by `shutdown`. A run cut short this way leaves
/// every page it already wrote in place.
async fn watch_until<F>(
    settings: &Settings,
    coordinator: &RunCoordinator,
    run_now: bool,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    info!(schedule = %settings.schedule.describe(), "Watching for new papers");
    tokio::pin!(shutdown);
    let mut first = run_now;

    loop {
        if !first {
            let now = Local::now().naive_local();
            let next = settings.schedule.next_after(now);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next = %next, wait_secs = wait.as_secs(), "Next run scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = &mut shutdown => {
                    info!("Interrupted; stopping");
                    return Ok(());
                }
            }
        }
        first = false;

        let window = match DateWindow::last_days(Utc::now().date_naive(), settings.topic.lookback_days) {
            Ok(window) => window,
            Err(e) => {
                error!(error = %e, "Run could not start");
                continue;
            }
        };

        tokio::select! {
            outcome = coordinator.run(&settings.topic, window) => match outcome {
                Ok(result) => {
                    if run_failed(&result) {
                        warn!(run_id = %result.run_id, "Run did not complete cleanly; will retry at the next fire time");
                    }
                }
                Err(e) => error!(error = %e, "Run could not start"),
            },
            _ = &mut shutdown => {
                warn!("Interrupted during a run; papers already written are kept");
                return Ok(());
            }
        }
    }
}

pub async fn status(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let sink = notion_sink(settings)?;
    let status = sink.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Notion database {}", sink.database_id());
    println!("  total     {:>5}", status.total);
    println!("  recent    {:>5}  (published in the last {RECENT_DAYS} days)", status.recent);
    for name in STATUSES {
        println!("  {:<9} {:>5}", name, status.count(name));
    }
    for (name, n) in status.by_status.iter().filter(|(k, _)| !STATUSES.contains(&k.as_str())) {
        println!("  {:<9} {:>5}", name, n);
    }
    Ok(())
}

pub async fn setup_db(settings: &Settings) -> anyhow::Result<()> {
    let sink = notion_sink(settings)?;
    let changes = sink.ensure_schema().await?;
    if changes.is_empty() {
        println!("Database {} already has every property.", sink.database_id());
    } else {
        println!("Updated database {}:", sink.database_id());
        for change in &changes {
            println!("  {change}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperwatch_ingestion::{FetchReport, PaperSource, PipelineError, RunSettings, SummarizerSettings};
    use paperwatch_llm::{LlmBackend, LlmError, LlmRequest, LlmResponse};

    use crate::config::Config;

    /// A source that never answers.
    struct StalledSource;

    #[async_trait::async_trait]
    impl PaperSource for StalledSource {
        async fn fetch(&self, _query: &str, _window: &DateWindow) -> Result<FetchReport, PipelineError> {
            std::future::pending().await
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    struct SilentLlm;

    #[async_trait::async_trait]
    impl LlmBackend for SilentLlm {
        async fn complete(&self, _req: LlmRequest) -> Result<LlmResponse, LlmError> {
            Err(LlmError::Unavailable("unused".into()))
        }

        fn model_id(&self) -> &str {
            "silent"
        }

        fn provider(&self) -> &'static str {
            "test"
        }
    }

    #[tokio::test]
    async fn test_shutdown_stops_a_run_in_progress() {
        let config: Config = toml::from_str("[topic]\nterms = [\"debate\"]\n").unwrap();
        let settings = config.validate(|_| None).unwrap();

        let memory = Arc::new(MemorySink::new());
        let coordinator = RunCoordinator::new(
            Arc::new(StalledSource),
            memory.clone(),
            Summarizer::new(Arc::new(SilentLlm), SummarizerSettings::default()),
            memory,
            RunSettings::default(),
        );

        let shutdown = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<(), std::io::Error>(())
        };
        let stopped = tokio::time::timeout(
            Duration::from_secs(5),
            watch_until(&settings, &coordinator, true, shutdown),
        )
        .await;

        assert!(matches!(stopped, Ok(Ok(()))));
    }
}

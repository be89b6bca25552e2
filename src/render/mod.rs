// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Render Worker
 * Headless-browser rendering stage: visits the target, captures the DOM,
 * scripts and network activity, uploads artifacts and dispatches analysis
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

pub mod script_fetch;

use anyhow::{Context as AnyhowContext, Result as AnyhowResult};
use headless_chrome::{Browser, LaunchOptionsBuilder};
use scraper::{Html, Selector};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{LimitsConfig, QueueConfig};
use crate::database::Database;
use crate::errors::{ScannerError, ScannerResult};
use crate::policy::TargetPolicy;
use crate::queue::{JobOptions, JobQueue, JobState};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::storage::{keys, ArtifactStore};
use crate::types::{
    AnalysisArtifacts, AnalysisTask, DomAnalysis, ExternalScript, InlineScript, NetworkResource,
    ScanTask, ScriptArtifact, TaskResult,
};

use script_fetch::{source_mapping_url, ScriptFetcher};

/// Post-navigation settle time for JavaScript rendering (milliseconds).
const JS_RENDER_WAIT_MS: u64 = 1500;

/// Poll interval while waiting for the analysis job.
const ANALYSIS_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// One rendered page out of the blocking browser session.
#[derive(Debug, Clone)]
struct RenderedPage {
    url: String,
    final_url: String,
    html: String,
    screenshot: Option<Vec<u8>>,
    resources: Vec<NetworkResource>,
}

pub struct RenderWorker {
    worker_id: String,
    db: Arc<Database>,
    storage: ArtifactStore,
    scan_queue: JobQueue,
    analysis_queue: JobQueue,
    policy: TargetPolicy,
    fetcher: ScriptFetcher,
    limits: LimitsConfig,
    queue_config: QueueConfig,
    browser: Mutex<Option<Browser>>,
    shutdown: Arc<AtomicBool>,
}

impl RenderWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        storage: ArtifactStore,
        scan_queue: JobQueue,
        analysis_queue: JobQueue,
        policy: TargetPolicy,
        limits: LimitsConfig,
        queue_config: QueueConfig,
        shutdown: Arc<AtomicBool>,
    ) -> ScannerResult<Self> {
        let fetcher = ScriptFetcher::new(
            policy.clone(),
            limits.script_fetch_timeout,
            limits.max_script_body_bytes,
        )?;

        Ok(Self {
            worker_id: format!("render-{}", uuid::Uuid::new_v4()),
            db,
            storage,
            scan_queue,
            analysis_queue,
            policy,
            fetcher,
            limits,
            queue_config,
            browser: Mutex::new(None),
            shutdown,
        })
    }

    /// Main worker loop: lease scan jobs, render, dispatch analysis.
    pub async fn run(self: Arc<Self>) {
        info!(worker_id = %self.worker_id, "Render worker started");

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!(worker_id = %self.worker_id, "Render worker stopping");
                break;
            }

            let job = match self.scan_queue.dequeue(&self.worker_id).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Scan queue dequeue failed");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }
            };

            let task: ScanTask = match serde_json::from_value(job.payload.clone()) {
                Ok(task) => task,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Malformed scan task payload");
                    let _ = self
                        .scan_queue
                        .fail(&job.id, &format!("Malformed payload: {}", e))
                        .await;
                    continue;
                }
            };

            let heartbeat = self.spawn_heartbeat(job.id.clone());
            let timeout = Duration::from_millis(job.options.timeout_ms.max(1));

            let outcome = tokio::time::timeout(timeout, self.process(&task)).await;
            heartbeat.abort();

            match outcome {
                Ok(Ok(result)) => {
                    if let Err(e) = self
                        .scan_queue
                        .complete(&job.id, &serde_json::to_value(&result).unwrap_or(json!({})))
                        .await
                    {
                        warn!(job_id = %job.id, error = %e, "Failed to record completion");
                    }
                }
                Ok(Err(e)) => {
                    let reason = e.to_string();
                    warn!(scan_id = %task.scan_id, error = %reason, "Render failed");
                    let _ = self.db.mark_scan_failed(&task.scan_id, &reason).await;
                    let _ = self.scan_queue.fail(&job.id, &reason).await;
                }
                Err(_) => {
                    let reason = "Processing timeout";
                    warn!(scan_id = %task.scan_id, "Render job timed out");
                    let _ = self.db.mark_scan_failed(&task.scan_id, reason).await;
                    let _ = self.scan_queue.fail(&job.id, reason).await;
                }
            }
        }
    }

    fn spawn_heartbeat(&self, job_id: String) -> tokio::task::JoinHandle<()> {
        let queue = self.scan_queue.clone();
        let interval = self.queue_config.stalled_interval / 3;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval.max(Duration::from_secs(1)));
            loop {
                tick.tick().await;
                if let Err(e) = queue.heartbeat(&job_id).await {
                    debug!(job_id = %job_id, error = %e, "Heartbeat failed");
                }
            }
        })
    }

    /// Execute the render pipeline for one scan.
    async fn process(&self, task: &ScanTask) -> ScannerResult<TaskResult> {
        let scan_id = task.scan_id.clone();
        info!(scan_id = %scan_id, url = %task.url, "Rendering scan target");

        let retry_config = RetryConfig::default().with_max_attempts(3);
        retry_with_backoff(&retry_config, "mark_scan_running", || {
            self.db.mark_scan_running(&scan_id)
        })
        .await?;
        self.scan_queue.update_progress(&scan_id, 10).await?;

        // Browse-time re-validation; the allow-list env can exempt internal
        // lab targets.
        let target = self.policy.validate_target_url(&task.url).await?;

        let depth = task.parameters.depth;
        let max_pages = if depth == 0 {
            1
        } else {
            self.limits.max_pages.min(100)
        };
        let pages = self
            .render_with_recycle(
                target.as_str(),
                task.parameters.timeout,
                depth,
                max_pages,
                task.parameters.user_agent.clone(),
            )
            .await?;

        let main_page = pages.first().ok_or_else(|| {
            ScannerError::Render("Browser produced no rendered pages".to_string())
        })?;

        self.scan_queue.update_progress(&scan_id, 40).await?;

        // Artifacts: DOM snapshot, screenshot, network trace.
        let mut artifact_paths: HashMap<String, String> = HashMap::new();

        let snapshot_key = keys::dom_snapshot(&scan_id);
        self.storage
            .put_object(&snapshot_key, main_page.html.clone().into_bytes(), "text/html")
            .await?;
        artifact_paths.insert("domSnapshot".to_string(), snapshot_key.clone());

        if let Some(screenshot) = &main_page.screenshot {
            let key = keys::screenshot(&scan_id);
            match self.storage.put_object(&key, screenshot.clone(), "image/png").await {
                Ok(()) => {
                    artifact_paths.insert("screenshot".to_string(), key);
                }
                Err(e) => warn!(scan_id = %scan_id, error = %e, "Screenshot upload failed"),
            }
        }

        let all_resources: Vec<NetworkResource> = pages
            .iter()
            .flat_map(|p| p.resources.iter().cloned())
            .collect();
        let trace_key = keys::network_trace(&scan_id);
        match self
            .storage
            .put_object(
                &trace_key,
                serde_json::to_vec(&all_resources)?,
                "application/json",
            )
            .await
        {
            Ok(()) => {
                artifact_paths.insert("networkTrace".to_string(), trace_key);
            }
            Err(e) => warn!(scan_id = %scan_id, error = %e, "Network trace upload failed"),
        }

        // Document response metadata comes from a direct request; the browser
        // session does not expose raw headers.
        let (response_headers, set_cookies) = match self.fetcher.fetch(target.as_str()).await {
            Ok(response) => (response.headers, response.set_cookies),
            Err(e) => {
                warn!(scan_id = %scan_id, error = %e, "Document header capture failed");
                (HashMap::new(), Vec::new())
            }
        };

        // Script collection across every rendered page, deduplicated by src.
        let mut inline_scripts: Vec<InlineScript> = Vec::new();
        let mut external_scripts: Vec<ExternalScript> = Vec::new();
        let mut seen_src: HashSet<String> = HashSet::new();
        for page in &pages {
            debug!(page = %page.url, "Collecting scripts");
            let (inline, external) = extract_scripts(&page.html);
            inline_scripts.extend(inline);
            for script in external {
                if let Some(absolute) = self.fetcher.resolve(&page.final_url, &script.src) {
                    let absolute = absolute.to_string();
                    if seen_src.insert(absolute.clone()) {
                        external_scripts.push(ExternalScript {
                            src: absolute,
                            attributes: script.attributes,
                        });
                    }
                }
            }
        }

        // External script bodies, bounded; failures record an empty artifact.
        let mut script_artifacts: Vec<ScriptArtifact> = Vec::new();
        let mut source_maps: HashMap<String, String> = HashMap::new();
        let mut fetch_errors: Vec<String> = Vec::new();

        for (index, script) in external_scripts
            .iter()
            .take(self.limits.max_external_scripts)
            .enumerate()
        {
            let key = keys::external_script(&scan_id, index);
            let body = match self.fetcher.fetch_script(&script.src).await {
                Ok(body) => body,
                Err(e) => {
                    fetch_errors.push(format!("{}: {}", script.src, e));
                    String::new()
                }
            };

            if !body.is_empty() {
                if let Some(map_ref) = source_mapping_url(&body) {
                    if let Some(map_url) = self.fetcher.resolve(&script.src, map_ref) {
                        match self.fetcher.fetch_script(map_url.as_str()).await {
                            Ok(map_body) => {
                                let map_key = keys::source_map(&scan_id, index);
                                if self
                                    .storage
                                    .put_object(
                                        &map_key,
                                        map_body.into_bytes(),
                                        "application/json",
                                    )
                                    .await
                                    .is_ok()
                                {
                                    source_maps.insert(script.src.clone(), map_key);
                                }
                            }
                            Err(e) => {
                                debug!(url = %map_url, error = %e, "Source map fetch failed")
                            }
                        }
                    }
                }
            }

            self.storage
                .put_object(&key, body.into_bytes(), "application/javascript")
                .await?;
            script_artifacts.push(ScriptArtifact {
                path: key,
                source_url: script.src.clone(),
            });
        }

        self.db.set_artifact_paths(&scan_id, &artifact_paths).await?;
        self.scan_queue.update_progress(&scan_id, 70).await?;

        // Hand off to the analysis stage.
        let analysis = AnalysisTask {
            scan_id: scan_id.clone(),
            artifacts: AnalysisArtifacts {
                dom_snapshot: snapshot_key,
                scripts: script_artifacts,
            },
            dom_analysis: DomAnalysis {
                page_url: task.url.clone(),
                final_url: (main_page.final_url != task.url)
                    .then(|| main_page.final_url.clone()),
                inline_scripts,
                external_scripts,
                source_maps,
                resources: all_resources,
                response_headers,
                set_cookies,
            },
            fetch_errors: fetch_errors.clone(),
        };

        let options = JobOptions::from_config(&self.queue_config).with_max_attempts(3);
        self.analysis_queue
            .enqueue(&scan_id, &serde_json::to_value(&analysis)?, options)
            .await?;
        self.scan_queue.update_progress(&scan_id, 85).await?;

        // Wait for the analyzer, bounded by the scan timeout plus headroom.
        let wait_budget =
            Duration::from_millis(task.parameters.timeout.max(30_000)) + Duration::from_secs(120);
        self.await_analysis(&scan_id, wait_budget).await?;

        self.scan_queue.update_progress(&scan_id, 100).await?;

        if !fetch_errors.is_empty() {
            debug!(
                scan_id = %scan_id,
                errors = fetch_errors.len(),
                "Render completed with script fetch errors"
            );
        }

        Ok(TaskResult {
            scan_id,
            success: true,
            artifacts: artifact_paths,
            error: None,
        })
    }

    /// Poll the analysis job until it reaches a terminal state.
    async fn await_analysis(&self, scan_id: &str, budget: Duration) -> ScannerResult<()> {
        let deadline = tokio::time::Instant::now() + budget;

        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(ScannerError::Render("Analysis job timeout".to_string()));
            }

            match self.analysis_queue.job_status(scan_id).await? {
                Some(status) if status.state == JobState::Completed => {
                    let success = status
                        .result
                        .as_ref()
                        .and_then(|r| r.get("success"))
                        .and_then(|s| s.as_bool())
                        .unwrap_or(true);
                    if success {
                        return Ok(());
                    }
                    let reason = status
                        .result
                        .as_ref()
                        .and_then(|r| r.get("error"))
                        .and_then(|e| e.as_str())
                        .unwrap_or("Analysis failed")
                        .to_string();
                    return Err(ScannerError::Render(reason));
                }
                Some(status)
                    if matches!(status.state, JobState::Failed | JobState::DeadLetter) =>
                {
                    return Err(ScannerError::Render(
                        status
                            .failed_reason
                            .unwrap_or_else(|| "Analysis failed".to_string()),
                    ));
                }
                _ => tokio::time::sleep(ANALYSIS_POLL_INTERVAL).await,
            }
        }
    }

    /// Render with one browser-recycle retry on context death.
    async fn render_with_recycle(
        &self,
        url: &str,
        timeout_ms: u64,
        depth: u32,
        max_pages: usize,
        user_agent: Option<String>,
    ) -> ScannerResult<Vec<RenderedPage>> {
        match self
            .render_once(url, timeout_ms, depth, max_pages, user_agent.clone())
            .await
        {
            Ok(pages) => Ok(pages),
            Err(e) if is_browser_death(&e) => {
                warn!(error = %e, "Browser context died, recycling and retrying");
                *self.browser.lock().await = None;
                self.render_once(url, timeout_ms, depth, max_pages, user_agent)
                    .await
                    .map_err(|e| ScannerError::Render(e.to_string()))
            }
            Err(e) => Err(ScannerError::Render(e.to_string())),
        }
    }

    async fn render_once(
        &self,
        url: &str,
        timeout_ms: u64,
        depth: u32,
        max_pages: usize,
        user_agent: Option<String>,
    ) -> AnyhowResult<Vec<RenderedPage>> {
        let browser = self.get_browser().await?;
        let url = url.to_string();

        tokio::task::spawn_blocking(move || {
            render_pages_blocking(&browser, &url, timeout_ms, depth, max_pages, user_agent)
        })
        .await
        .context("Render task panicked")?
    }

    async fn get_browser(&self) -> AnyhowResult<Browser> {
        let mut guard = self.browser.lock().await;
        if let Some(browser) = guard.as_ref() {
            return Ok(browser.clone());
        }

        let options = LaunchOptionsBuilder::default()
            .headless(true)
            .sandbox(false)
            .idle_browser_timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| anyhow::anyhow!("Browser launch options: {}", e))?;
        let browser = Browser::new(options).context("Failed to launch browser")?;
        *guard = Some(browser.clone());
        info!("Headless browser launched");
        Ok(browser)
    }
}

fn is_browser_death(err: &anyhow::Error) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    message.contains("closed")
        || message.contains("connection")
        || message.contains("websocket")
        || message.contains("browser")
}

/// Blocking browser session: navigate, settle, capture; BFS crawl when depth
/// allows. Per-page failures are skipped, the first page must succeed.
fn render_pages_blocking(
    browser: &Browser,
    start_url: &str,
    timeout_ms: u64,
    depth: u32,
    max_pages: usize,
    user_agent: Option<String>,
) -> AnyhowResult<Vec<RenderedPage>> {
    let origin = Url::parse(start_url).context("Invalid start URL")?;
    let origin_host = origin.host_str().unwrap_or_default().to_string();

    let mut pages = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut frontier: VecDeque<(String, u32)> = VecDeque::new();
    frontier.push_back((start_url.to_string(), 0));

    while let Some((url, page_depth)) = frontier.pop_front() {
        if pages.len() >= max_pages {
            break;
        }
        if !visited.insert(url.clone()) {
            continue;
        }

        let is_first = pages.is_empty();
        match render_single_page(browser, &url, timeout_ms, user_agent.as_deref(), is_first) {
            Ok(page) => {
                if page_depth < depth {
                    for link in extract_same_origin_links(&page.html, &page.final_url, &origin_host)
                    {
                        if !visited.contains(&link) {
                            frontier.push_back((link, page_depth + 1));
                        }
                    }
                }
                pages.push(page);
            }
            Err(e) if is_first => return Err(e),
            Err(e) => {
                debug!(url = %url, error = %e, "Crawled page failed, skipping");
            }
        }
    }

    Ok(pages)
}

fn render_single_page(
    browser: &Browser,
    url: &str,
    timeout_ms: u64,
    user_agent: Option<&str>,
    capture_screenshot: bool,
) -> AnyhowResult<RenderedPage> {
    let tab = browser.new_tab().context("Failed to open tab")?;
    tab.set_default_timeout(Duration::from_millis(timeout_ms.max(1_000)));

    if let Some(ua) = user_agent {
        let _ = tab.set_user_agent(ua, None, None);
    }

    tab.navigate_to(url).context("Navigation failed")?;
    tab.wait_until_navigated().context("Page load failed")?;
    std::thread::sleep(Duration::from_millis(JS_RENDER_WAIT_MS));

    let html = tab.get_content().context("DOM capture failed")?;
    let final_url = tab.get_url();

    let resources = collect_performance_resources(&tab);

    let screenshot = if capture_screenshot {
        tab.capture_screenshot(
            headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption::Png,
            None,
            None,
            true,
        )
        .ok()
    } else {
        None
    };

    let _ = tab.close(true);

    Ok(RenderedPage {
        url: url.to_string(),
        final_url,
        html,
        screenshot,
        resources,
    })
}

/// Network activity via the Resource Timing API; the CDP network domain is
/// not wired per-tab here, timing entries cover what analysis needs.
fn collect_performance_resources(tab: &headless_chrome::Tab) -> Vec<NetworkResource> {
    let script = r#"JSON.stringify(performance.getEntriesByType('resource').map(function(e) {
        return {
            url: e.name,
            type: e.initiatorType,
            size: Math.round(e.transferSize || 0),
            timing: Math.round(e.duration)
        };
    }))"#;

    let raw = match tab.evaluate(script, false) {
        Ok(result) => result
            .value
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_default(),
        Err(_) => return Vec::new(),
    };

    #[derive(serde::Deserialize)]
    struct Entry {
        url: String,
        #[serde(rename = "type")]
        entry_type: String,
        size: u64,
        timing: u64,
    }

    serde_json::from_str::<Vec<Entry>>(&raw)
        .unwrap_or_default()
        .into_iter()
        .map(|entry| NetworkResource {
            url: entry.url,
            resource_type: entry.entry_type,
            method: "GET".to_string(),
            status: None,
            size: Some(entry.size),
            headers: HashMap::new(),
            timing_ms: Some(entry.timing),
        })
        .collect()
}

/// Pull inline and external scripts (with attributes) out of rendered HTML.
fn extract_scripts(html: &str) -> (Vec<InlineScript>, Vec<ExternalScript>) {
    let document = Html::parse_document(html);
    let selector = Selector::parse("script").expect("Invalid script selector");

    let mut inline = Vec::new();
    let mut external = Vec::new();

    for element in document.select(&selector) {
        let attributes: HashMap<String, String> = element
            .value()
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        match element.value().attr("src") {
            Some(src) if !src.trim().is_empty() => {
                external.push(ExternalScript {
                    src: src.trim().to_string(),
                    attributes,
                });
            }
            _ => {
                let content: String = element.text().collect();
                if !content.trim().is_empty() {
                    inline.push(InlineScript {
                        content,
                        attributes,
                    });
                }
            }
        }
    }

    (inline, external)
}

fn extract_same_origin_links(html: &str, base_url: &str, origin_host: &str) -> Vec<String> {
    let base = match Url::parse(base_url) {
        Ok(base) => base,
        Err(_) => return Vec::new(),
    };
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("Invalid anchor selector");

    let mut links = Vec::new();
    let mut seen = HashSet::new();
    for element in document.select(&selector) {
        let href = match element.value().attr("href") {
            Some(href) => href.trim(),
            None => continue,
        };
        if href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:") {
            continue;
        }
        if let Ok(mut resolved) = base.join(href) {
            resolved.set_fragment(None);
            if resolved.scheme() != "http" && resolved.scheme() != "https" {
                continue;
            }
            if resolved.host_str() != Some(origin_host) {
                continue;
            }
            let link = resolved.to_string();
            if seen.insert(link.clone()) {
                links.push(link);
            }
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_scripts_split() {
        let html = r#"
            <script src="https://cdn.example.net/lib.js" integrity="sha384-x"></script>
            <script>var inline = 1;</script>
            <script src="  "></script>
        "#;
        let (inline, external) = extract_scripts(html);
        assert_eq!(inline.len(), 1);
        assert!(inline[0].content.contains("var inline"));
        assert_eq!(external.len(), 1);
        assert_eq!(external[0].src, "https://cdn.example.net/lib.js");
        assert_eq!(
            external[0].attributes.get("integrity").map(String::as_str),
            Some("sha384-x")
        );
    }

    #[test]
    fn test_same_origin_link_extraction() {
        let html = r#"
            <a href="/about">about</a>
            <a href="https://example.com/pricing#plans">pricing</a>
            <a href="https://other.example.net/x">other</a>
            <a href="mailto:x@example.com">mail</a>
            <a href="javascript:void(0)">js</a>
            <a href="/about">dup</a>
        "#;
        let links = extract_same_origin_links(html, "https://example.com/", "example.com");
        assert_eq!(
            links,
            vec![
                "https://example.com/about".to_string(),
                "https://example.com/pricing".to_string(),
            ]
        );
    }

    #[test]
    fn test_browser_death_classification() {
        assert!(is_browser_death(&anyhow::anyhow!(
            "the page has been closed"
        )));
        assert!(is_browser_death(&anyhow::anyhow!("WebSocket gone")));
        assert!(!is_browser_death(&anyhow::anyhow!("navigation refused")));
    }
}

// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Analyze Worker
 * Deterministic analysis stage: pattern scan, library detection, advisory
 * enrichment and risk scoring, committed in a single database transaction
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use futures::future::join_all;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::analyzer::{
    analyze_headers, analyze_html_surface, detect_risky_patterns, findings_from_pattern_hits,
};
use crate::config::QueueConfig;
use crate::database::Database;
use crate::detector::{consolidate, detect_libraries};
use crate::errors::{ScannerError, ScannerResult};
use crate::queue::JobQueue;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::risk::{calculate_advanced_library_risk, calculate_global_risk};
use crate::storage::ArtifactStore;
use crate::types::{
    AnalysisTask, Detection, Finding, FindingType, LibraryRecord, ScanStatus, ScriptRecord,
    Severity, TaskResult,
};
use crate::vuln_feed::VulnerabilityFeed;

/// Hard wall clock for one analysis task.
const TASK_TIMEOUT: Duration = Duration::from_secs(600);

/// Delay before a slot-contended job is offered again.
const SLOT_RETRY_DELAY: Duration = Duration::from_secs(5);

fn fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub struct AnalyzeWorker {
    worker_id: String,
    db: Arc<Database>,
    storage: ArtifactStore,
    analysis_queue: JobQueue,
    feed: VulnerabilityFeed,
    queue_config: QueueConfig,
    /// Scans currently being analyzed by any slot in this process.
    processing: Arc<Mutex<HashSet<String>>>,
    shutdown: Arc<AtomicBool>,
}

impl AnalyzeWorker {
    pub fn new(
        db: Arc<Database>,
        storage: ArtifactStore,
        analysis_queue: JobQueue,
        feed: VulnerabilityFeed,
        queue_config: QueueConfig,
        processing: Arc<Mutex<HashSet<String>>>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            worker_id: format!("analyze-{}", uuid::Uuid::new_v4()),
            db,
            storage,
            analysis_queue,
            feed,
            queue_config,
            processing,
            shutdown,
        }
    }

    /// One dispatch slot. The configured concurrency spawns several of these
    /// sharing the processing-slot set.
    pub async fn run(self: Arc<Self>) {
        info!(worker_id = %self.worker_id, "Analyze worker started");

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!(worker_id = %self.worker_id, "Analyze worker stopping");
                break;
            }

            let job = match self.analysis_queue.dequeue(&self.worker_id).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Analysis queue dequeue failed");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }
            };

            let task: AnalysisTask = match serde_json::from_value(job.payload.clone()) {
                Ok(task) => task,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Malformed analysis payload");
                    let _ = self
                        .analysis_queue
                        .fail(&job.id, &format!("Malformed payload: {}", e))
                        .await;
                    continue;
                }
            };

            // Processing-slot guard: one live analysis per scan id.
            {
                let mut processing = self.processing.lock().await;
                if !processing.insert(task.scan_id.clone()) {
                    drop(processing);
                    debug!(scan_id = %task.scan_id, "Scan already in analysis, requeueing");
                    let _ = self
                        .analysis_queue
                        .requeue(&job.id, SLOT_RETRY_DELAY)
                        .await;
                    continue;
                }
            }

            let heartbeat = self.spawn_heartbeat(job.id.clone());
            let outcome = tokio::time::timeout(TASK_TIMEOUT, self.process(&task)).await;
            heartbeat.abort();

            self.processing.lock().await.remove(&task.scan_id);

            match outcome {
                Ok(Ok(result)) => {
                    let _ = self
                        .analysis_queue
                        .complete(&job.id, &serde_json::to_value(&result).unwrap_or(json!({})))
                        .await;
                }
                Ok(Err(e)) => {
                    let reason = e.to_string();
                    warn!(scan_id = %task.scan_id, error = %reason, "Analysis failed");
                    let _ = self.db.mark_scan_failed(&task.scan_id, &reason).await;
                    let _ = self.analysis_queue.fail(&job.id, &reason).await;
                }
                Err(_) => {
                    let reason = "Processing timeout";
                    warn!(scan_id = %task.scan_id, "Analysis timed out");
                    let _ = self.db.mark_scan_failed(&task.scan_id, reason).await;
                    let _ = self.analysis_queue.fail(&job.id, reason).await;
                }
            }
        }
    }

    fn spawn_heartbeat(&self, job_id: String) -> tokio::task::JoinHandle<()> {
        let queue = self.analysis_queue.clone();
        let interval = self.queue_config.stalled_interval / 3;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval.max(Duration::from_secs(1)));
            loop {
                tick.tick().await;
                let _ = queue.heartbeat(&job_id).await;
            }
        })
    }

    /// Run the full analysis for one scan and commit atomically.
    async fn process(&self, task: &AnalysisTask) -> ScannerResult<TaskResult> {
        let scan_id = &task.scan_id;

        let scan = self
            .db
            .get_scan(scan_id)
            .await?
            .ok_or_else(|| ScannerError::NotFound(format!("Scan {} does not exist", scan_id)))?;

        // Idempotent re-delivery: completed scans with persisted rows are done.
        if scan.status == ScanStatus::Completed && self.db.scan_has_results(scan_id).await? {
            info!(scan_id = %scan_id, "Scan already analyzed, returning existing results");
            return Ok(TaskResult {
                scan_id: scan_id.clone(),
                success: true,
                artifacts: HashMap::new(),
                error: None,
            });
        }

        self.db.mark_scan_running(scan_id).await?;
        self.analysis_queue.update_progress(scan_id, 90).await.ok();

        let page_url = safe_page_url(
            task.dom_analysis
                .final_url
                .as_deref()
                .unwrap_or(&task.dom_analysis.page_url),
            &task.dom_analysis.page_url,
        );
        let is_https = page_url.starts_with("https://");

        let mut findings: Vec<Finding> = Vec::new();
        let mut scripts: Vec<ScriptRecord> = Vec::new();
        // (script id, its detections, risky-pattern kinds seen in it)
        let mut detections_by_script: Vec<(String, Vec<Detection>, Vec<FindingType>)> = Vec::new();

        // Inline scripts: risky patterns become findings, detector runs on the
        // bare content.
        for (index, inline) in task.dom_analysis.inline_scripts.iter().enumerate() {
            let location = format!("inline-script#{}", index);
            let hits = detect_risky_patterns(&inline.content);
            findings.extend(findings_from_pattern_hits(scan_id, &location, &hits));

            let detections = detect_libraries(None, &inline.content, None);
            let script_id = uuid::Uuid::new_v4().to_string();
            let pattern_types: Vec<FindingType> =
                hits.iter().map(|h| h.finding_type).collect();

            scripts.push(ScriptRecord {
                id: script_id.clone(),
                scan_id: scan_id.clone(),
                source_url: None,
                is_inline: true,
                artifact_path: task.artifacts.dom_snapshot.clone(),
                fingerprint: fingerprint(&inline.content),
                detected_patterns: hits
                    .iter()
                    .map(|h| h.finding_type.as_str().to_string())
                    .collect(),
                estimated_version: detections.first().and_then(|d| d.version.clone()),
                confidence: detections.first().map(|d| d.confidence).unwrap_or(0),
            });
            detections_by_script.push((script_id, detections, pattern_types));
        }

        // External scripts: bodies come from the artifact store; a stored
        // source map sharpens detection when the body references one.
        for artifact in &task.artifacts.scripts {
            let body = match self.storage.get_object(&artifact.path).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    debug!(path = %artifact.path, error = %e, "Script artifact unavailable");
                    String::new()
                }
            };

            let source_map = match crate::render::script_fetch::source_mapping_url(&body) {
                Some(_) => {
                    match task.dom_analysis.source_maps.get(&artifact.source_url) {
                        Some(map_key) => match self.storage.get_object(map_key).await {
                            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                            Err(_) => None,
                        },
                        None => None,
                    }
                }
                None => None,
            };

            let hits = detect_risky_patterns(&body);
            let detections =
                detect_libraries(Some(&artifact.source_url), &body, source_map.as_deref());
            let script_id = uuid::Uuid::new_v4().to_string();
            let pattern_types: Vec<FindingType> =
                hits.iter().map(|h| h.finding_type).collect();

            scripts.push(ScriptRecord {
                id: script_id.clone(),
                scan_id: scan_id.clone(),
                source_url: Some(artifact.source_url.clone()),
                is_inline: false,
                artifact_path: artifact.path.clone(),
                fingerprint: fingerprint(&body),
                detected_patterns: hits
                    .iter()
                    .map(|h| h.finding_type.as_str().to_string())
                    .collect(),
                estimated_version: detections.first().and_then(|d| d.version.clone()),
                confidence: detections.first().map(|d| d.confidence).unwrap_or(0),
            });
            detections_by_script.push((script_id, detections, pattern_types));
        }

        // Surface + header findings from the rendered document.
        match self.storage.get_object(&task.artifacts.dom_snapshot).await {
            Ok(bytes) => {
                let html = String::from_utf8_lossy(&bytes);
                findings.extend(analyze_html_surface(scan_id, &page_url, &html));
            }
            Err(e) => {
                warn!(scan_id = %scan_id, error = %e, "DOM snapshot unavailable");
                findings.push(Finding::new(
                    scan_id,
                    FindingType::Error,
                    "Rendered document unavailable",
                    "The DOM snapshot artifact could not be loaded; HTML surface checks \
                     were skipped.",
                    Severity::Low,
                    "html",
                    Some(e.to_string()),
                ));
            }
        }
        findings.extend(analyze_headers(
            scan_id,
            is_https,
            &task.dom_analysis.response_headers,
            &task.dom_analysis.set_cookies,
        ));

        for fetch_error in &task.fetch_errors {
            findings.push(Finding::new(
                scan_id,
                FindingType::Info,
                "External script could not be retrieved",
                "A referenced external script failed to download during rendering; its \
                 contents were not analyzed.",
                Severity::Low,
                "html",
                Some(fetch_error.clone()),
            ));
        }

        // Consolidate detections across all scripts by library name.
        let libraries = self
            .build_libraries(scan_id, &detections_by_script)
            .await;

        let critical_findings = findings
            .iter()
            .filter(|f| f.severity == Severity::Critical)
            .count();
        let library_risks: Vec<i32> = libraries.iter().map(|l| l.risk_score).collect();
        let global_risk = calculate_global_risk(&library_risks, critical_findings);

        // Transient commit failures roll back cleanly, so the retry wrapper
        // re-runs the whole transaction.
        let retry_config = RetryConfig::default().with_max_attempts(3);
        retry_with_backoff(&retry_config, "commit_analysis", || {
            self.db
                .commit_analysis(scan_id, &scripts, &libraries, &findings, global_risk)
        })
        .await?;

        info!(
            scan_id = %scan_id,
            scripts = scripts.len(),
            libraries = libraries.len(),
            findings = findings.len(),
            global_risk,
            "Analysis complete"
        );

        Ok(TaskResult {
            scan_id: scan_id.clone(),
            success: true,
            artifacts: HashMap::new(),
            error: None,
        })
    }

    /// Consolidate per-script detections into library records, enrich with
    /// advisories concurrently and score each library.
    async fn build_libraries(
        &self,
        scan_id: &str,
        detections_by_script: &[(String, Vec<Detection>, Vec<FindingType>)],
    ) -> Vec<LibraryRecord> {
        // name -> (flattened detections, related scripts, co-located findings)
        let mut grouped: HashMap<String, (Vec<Detection>, Vec<String>, Vec<FindingType>)> =
            HashMap::new();

        for (script_id, detections, pattern_types) in detections_by_script {
            for detection in detections {
                let entry = grouped
                    .entry(detection.name.clone())
                    .or_insert_with(|| (Vec::new(), Vec::new(), Vec::new()));
                entry.0.push(detection.clone());
                if !entry.1.contains(script_id) {
                    entry.1.push(script_id.clone());
                }
                for ft in pattern_types {
                    if !entry.2.contains(ft) {
                        entry.2.push(*ft);
                    }
                }
            }
        }

        let lookups = grouped.into_iter().map(|(name, (detections, related, co_located))| {
            let feed = self.feed.clone();
            let scan_id = scan_id.to_string();
            async move {
                let consolidated = consolidate(detections);
                let best = match consolidated.into_iter().next() {
                    Some(best) => best,
                    None => return None,
                };

                let vulnerabilities = feed
                    .get_vulnerabilities(&name, best.version.as_deref())
                    .await;
                let risk_score = calculate_advanced_library_risk(
                    &name,
                    &vulnerabilities,
                    best.confidence,
                    &co_located,
                    None,
                );

                Some(LibraryRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    scan_id,
                    name,
                    detected_version: best.version,
                    related_scripts: related,
                    detection_method: best.detection_method,
                    vulnerabilities,
                    risk_score,
                    confidence: best.confidence,
                })
            }
        });

        let mut libraries: Vec<LibraryRecord> =
            join_all(lookups).await.into_iter().flatten().collect();
        libraries.sort_by(|a, b| b.risk_score.cmp(&a.risk_score).then(a.name.cmp(&b.name)));
        libraries
    }
}

/// Confirm a URL parses before treating it as the scanned page; analysis data
/// can arrive with a relative or garbage final URL from hostile redirects.
pub fn safe_page_url(candidate: &str, fallback: &str) -> String {
    if Url::parse(candidate).is_ok() {
        candidate.to_string()
    } else {
        fallback.to_string()
    }
}

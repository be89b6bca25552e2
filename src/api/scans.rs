// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Scan Endpoints
 * Create/list/get/delete, queue-overlaid status, joined results, surface
 * buckets and the last-good lookup
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::database::{cooldown_remaining, ScanWithCounts};
use crate::queue::{JobOptions, JobState, JobStatus};
use crate::risk::get_risk_level;
use crate::types::{
    Finding, FindingType, Scan, ScanParameters, ScanStatus, ScanTask, Severity,
};
use crate::validation::{sanitize_value, validate_json_body, MAX_BODY_BYTES};

use super::{ApiError, SharedState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateScanRequest {
    url: String,
    #[serde(default)]
    parameters: Option<ScanParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UrlParam {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResultsParams {
    /// Ask the configured insight provider for an executive summary.
    pub insight: Option<bool>,
}

/// Stage label for UX, derived from the job's progress.
pub fn stage_for_progress(progress: u8) -> &'static str {
    match progress {
        0..=9 => "initializing",
        10..=39 => "rendering",
        40..=69 => "fetching_scripts",
        70..=84 => "dispatching_analysis",
        85..=94 => "analyzing",
        _ => "saving_results",
    }
}

/// A scan that produced scripts but few/no libraries usually hit rendering or
/// fetching trouble; flag it so consumers can discount the result.
pub fn is_partial_scan(script_count: i64, library_count: i64) -> bool {
    (script_count > 0 && library_count == 0) || (script_count > 100 && library_count <= 2)
}

/// Coarse 0-100 confidence in result completeness.
pub fn quality_score(script_count: i64, library_count: i64) -> i32 {
    let mut score = 100;
    if is_partial_scan(script_count, library_count) {
        score -= 40;
    }
    if script_count < 10 {
        score -= 20;
    }
    if library_count == 0 {
        score -= 40;
    }
    score.clamp(0, 100)
}

fn diagnostics_json(script_count: i64, library_count: i64) -> serde_json::Value {
    json!({
        "partialScan": is_partial_scan(script_count, library_count),
        "qualityScore": quality_score(script_count, library_count),
        "scriptCount": script_count,
        "libraryCount": library_count,
    })
}

/// Overlay the queue job state onto the persisted status.
pub fn overlay_status(db_status: ScanStatus, job: Option<&JobStatus>) -> ScanStatus {
    let job = match job {
        Some(job) => job,
        None => return db_status,
    };

    match job.state {
        JobState::Waiting | JobState::Delayed | JobState::Active => ScanStatus::Running,
        JobState::Completed => {
            let success = job
                .result
                .as_ref()
                .and_then(|r| r.get("success"))
                .and_then(|s| s.as_bool())
                .unwrap_or(true);
            if success {
                ScanStatus::Completed
            } else {
                ScanStatus::Failed
            }
        }
        JobState::Failed | JobState::DeadLetter => ScanStatus::Failed,
    }
}

// ----------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------

pub async fn create_scan(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if body.len() > MAX_BODY_BYTES {
        return Err(ApiError::PayloadTooLarge);
    }

    let raw: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::JsonParse(format!("Invalid JSON body: {}", e)))?;
    validate_json_body(&raw, body.len()).map_err(ApiError::from)?;
    let clean = sanitize_value(raw);

    let request: CreateScanRequest = serde_json::from_value(clean)
        .map_err(|e| ApiError::Validation(format!("Invalid scan request: {}", e)))?;

    if request.url.trim().is_empty() {
        return Err(ApiError::Validation("url is required".to_string()));
    }

    let target = state
        .policy
        .validate_target_url(request.url.trim())
        .await
        .map_err(ApiError::from)?;
    let url = target.to_string();

    // Per-URL cooldown window.
    if let Some(latest) = state.db.latest_scan_for_url(&url).await? {
        if let Some(retry_after_seconds) = cooldown_remaining(
            latest.created_at,
            Utc::now(),
            state.config.limits.scan_url_cooldown,
        ) {
            state.metrics.increment("cooldown_rejections", 1);
            return Err(ApiError::Cooldown {
                retry_after_seconds,
            });
        }
    }

    let scan = Scan {
        id: uuid::Uuid::new_v4().to_string(),
        url: url.clone(),
        parameters: request.parameters.unwrap_or_default(),
        status: ScanStatus::Pending,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
        global_risk_score: 0,
        artifact_paths: Default::default(),
        error: None,
    };

    state.db.create_scan(&scan).await?;

    let task = ScanTask {
        scan_id: scan.id.clone(),
        url: url.clone(),
        parameters: scan.parameters.clone(),
    };
    let options = JobOptions::from_config(&state.config.queue);
    state
        .scan_queue
        .enqueue(&scan.id, &serde_json::to_value(&task)?, options)
        .await?;

    state.metrics.record_scan_created();
    info!(scan_id = %scan.id, url = %url, "Scan created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": scan.id,
            "status": scan.status,
            "url": scan.url,
            "createdAt": scan.created_at,
        })),
    ))
}

pub async fn list_scans(
    State(state): State<SharedState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let offset = params.offset.unwrap_or(0).max(0);

    let (scans, total) = state.db.list_scans(limit, offset).await?;

    Ok(Json(json!({
        "scans": scans,
        "total": total,
        "limit": limit,
        "offset": offset,
    })))
}

pub async fn get_scan(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let scan = require_scan(&state, &id).await?;
    Ok(Json(scan))
}

pub async fn get_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let scan = require_scan(&state, &id).await?;

    let job = state.scan_queue.job_status(&id).await.unwrap_or_else(|e| {
        warn!(scan_id = %id, error = %e, "Queue state unavailable for status overlay");
        None
    });

    let effective = overlay_status(scan.status, job.as_ref());

    // Reconcile: conditional write so a concurrent worker update wins.
    if effective != scan.status && (effective.is_terminal() || effective == ScanStatus::Running) {
        let error = job
            .as_ref()
            .and_then(|j| j.failed_reason.clone())
            .filter(|_| effective == ScanStatus::Failed);
        match state
            .db
            .cas_scan_status(&id, scan.status, effective, error.as_deref())
            .await
        {
            Ok(true) => info!(
                scan_id = %id,
                from = %scan.status,
                to = %effective,
                "Status reconciled from queue state"
            ),
            Ok(false) => {}
            Err(e) => warn!(scan_id = %id, error = %e, "Status reconciliation write failed"),
        }
    }

    let progress = match &job {
        Some(job) => job.progress,
        None if effective.is_terminal() => 100,
        None => 0,
    };

    Ok(Json(json!({
        "id": scan.id,
        "status": effective,
        "progress": progress,
        "stage": stage_for_progress(progress),
        "startedAt": scan.started_at,
        "completedAt": scan.completed_at,
        "error": scan.error,
    })))
}

pub async fn get_results(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(params): Query<ResultsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let scan = require_scan(&state, &id).await?;

    let libraries = state.db.get_libraries(&id).await?;
    let findings = state.db.get_findings(&id).await?;
    let (script_count, library_count) = state.db.result_counts(&id).await?;

    let total_vulnerabilities: usize = libraries.iter().map(|l| l.vulnerabilities.len()).sum();
    let critical_findings = findings
        .iter()
        .filter(|f| f.severity == Severity::Critical)
        .count();

    let summary = json!({
        "totalLibraries": library_count,
        "totalScripts": script_count,
        "totalFindings": findings.len(),
        "totalVulnerabilities": total_vulnerabilities,
        "criticalFindings": critical_findings,
        "globalRiskScore": scan.global_risk_score,
        "riskLevel": get_risk_level(scan.global_risk_score),
    });

    let insight = if params.insight.unwrap_or(false) && state.insight.is_enabled() {
        state
            .insight
            .generate(&json!({ "scan": scan, "summary": summary }))
            .await
    } else {
        None
    };

    Ok(Json(json!({
        "scan": scan,
        "libraries": libraries,
        "findings": findings,
        "summary": summary,
        "diagnostics": diagnostics_json(script_count, library_count),
        "insight": insight,
    })))
}

/// Bucket findings by surface category.
fn surface_bucket(finding: &Finding) -> &'static str {
    match finding.finding_type {
        FindingType::FormSecurity => "forms",
        FindingType::InlineEventHandler => "inlineEventHandlers",
        FindingType::IframeSecurity => "iframes",
        FindingType::SecurityHeader => "securityHeaders",
        FindingType::SecurityCookie => "securityCookies",
        _ => "other",
    }
}

pub async fn get_surface(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let scan = require_scan(&state, &id).await?;
    let findings = state.db.get_findings(&id).await?;

    let mut categories: serde_json::Map<String, serde_json::Value> = [
        "forms",
        "inlineEventHandlers",
        "iframes",
        "securityHeaders",
        "securityCookies",
        "other",
    ]
    .iter()
    .map(|k| (k.to_string(), json!([])))
    .collect();

    for finding in &findings {
        let bucket = surface_bucket(finding);
        if let Some(serde_json::Value::Array(list)) = categories.get_mut(bucket) {
            list.push(serde_json::to_value(finding)?);
        }
    }

    let stats: serde_json::Map<String, serde_json::Value> = categories
        .iter()
        .map(|(k, v)| {
            (
                k.clone(),
                json!(v.as_array().map(|a| a.len()).unwrap_or(0)),
            )
        })
        .collect();

    Ok(Json(json!({
        "scan": scan,
        "stats": stats,
        "categories": categories,
    })))
}

pub async fn delete_scan(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // Artifacts first: a failed blob purge leaves orphans, the reverse order
    // would leave a scan pointing at nothing.
    let prefix = crate::storage::keys::scan_prefix(&id);
    if let Err(e) = state.storage.delete_prefix(&prefix).await {
        warn!(scan_id = %id, error = %e, "Artifact purge failed, continuing with delete");
    }

    if state.db.delete_scan(&id).await? {
        info!(scan_id = %id, "Scan deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Scan {} not found", id)))
    }
}

pub async fn last_good_scan(
    State(state): State<SharedState>,
    Query(params): Query<UrlParam>,
) -> Result<impl IntoResponse, ApiError> {
    let url = params
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("url query parameter is required".to_string()))?;

    let candidates = state.db.completed_scans_for_url(url.trim(), 10).await?;
    let good: Option<&ScanWithCounts> = candidates
        .iter()
        .find(|c| !is_partial_scan(c.script_count, c.library_count));

    match good {
        Some(c) => Ok(Json(json!({
            "scan": c.scan,
            "diagnostics": diagnostics_json(c.script_count, c.library_count),
        }))),
        None => Err(ApiError::NotFound(format!(
            "No non-partial completed scan for {}",
            url
        ))),
    }
}

async fn require_scan(state: &SharedState, id: &str) -> Result<Scan, ApiError> {
    state
        .db
        .get_scan(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Scan {} not found", id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(state: JobState, progress: u8, result: Option<serde_json::Value>) -> JobStatus {
        JobStatus {
            id: "scan-1".to_string(),
            state,
            progress,
            attempts: 1,
            result,
            failed_reason: None,
        }
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(stage_for_progress(0), "initializing");
        assert_eq!(stage_for_progress(9), "initializing");
        assert_eq!(stage_for_progress(10), "rendering");
        assert_eq!(stage_for_progress(39), "rendering");
        assert_eq!(stage_for_progress(40), "fetching_scripts");
        assert_eq!(stage_for_progress(70), "dispatching_analysis");
        assert_eq!(stage_for_progress(85), "analyzing");
        assert_eq!(stage_for_progress(95), "saving_results");
        assert_eq!(stage_for_progress(100), "saving_results");
    }

    #[test]
    fn test_overlay_running_states() {
        for state in [JobState::Waiting, JobState::Delayed, JobState::Active] {
            assert_eq!(
                overlay_status(ScanStatus::Pending, Some(&job(state, 10, None))),
                ScanStatus::Running
            );
        }
    }

    #[test]
    fn test_overlay_completed_with_failure_result() {
        let failed = job(
            JobState::Completed,
            100,
            Some(json!({ "success": false, "error": "boom" })),
        );
        assert_eq!(
            overlay_status(ScanStatus::Running, Some(&failed)),
            ScanStatus::Failed
        );

        let ok = job(JobState::Completed, 100, Some(json!({ "success": true })));
        assert_eq!(
            overlay_status(ScanStatus::Running, Some(&ok)),
            ScanStatus::Completed
        );
    }

    #[test]
    fn test_overlay_failed_and_dead_letter() {
        for state in [JobState::Failed, JobState::DeadLetter] {
            assert_eq!(
                overlay_status(ScanStatus::Running, Some(&job(state, 50, None))),
                ScanStatus::Failed
            );
        }
    }

    #[test]
    fn test_overlay_without_job_keeps_db_status() {
        assert_eq!(overlay_status(ScanStatus::Completed, None), ScanStatus::Completed);
        assert_eq!(overlay_status(ScanStatus::Pending, None), ScanStatus::Pending);
    }

    #[test]
    fn test_partial_scan_rules() {
        assert!(is_partial_scan(5, 0));
        assert!(is_partial_scan(150, 2));
        assert!(!is_partial_scan(0, 0));
        assert!(!is_partial_scan(50, 3));
        assert!(!is_partial_scan(150, 3));
    }

    #[test]
    fn test_quality_score() {
        // Healthy scan.
        assert_eq!(quality_score(50, 5), 100);
        // Partial (scripts but no libraries): -40 partial, -40 zero libs.
        assert_eq!(quality_score(50, 0), 20);
        // Few scripts only.
        assert_eq!(quality_score(5, 2), 80);
        // Worst case clamps at zero.
        assert_eq!(quality_score(5, 0), 0);
    }
}

// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Analytics Endpoint
 * Dashboard summary with response caching and in-flight dedup
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use axum::{
    extract::{ConnectInfo, State},
    response::{IntoResponse, Json},
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{dedup_key, DedupRole};

use super::{ApiError, SharedState};

const CACHE_KEY: &str = "analytics:summary";

pub async fn summary(
    State(state): State<SharedState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(cached) = state.response_cache.get(CACHE_KEY).await {
        debug!("Analytics summary served from cache");
        return Ok(Json((*cached).clone()));
    }

    let key = dedup_key("GET", "/api/analytics/summary", &addr.ip().to_string());
    match state.dedup.join(&key).await {
        DedupRole::Follower(mut receiver) => {
            if let Ok(value) = receiver.recv().await {
                debug!("Analytics summary deduplicated against in-flight request");
                return Ok(Json((*value).clone()));
            }
            // Leader failed; fall through and compute directly.
            compute(&state).await.map(Json)
        }
        DedupRole::Leader(guard) => match compute(&state).await {
            Ok(value) => {
                state.response_cache.put(CACHE_KEY.to_string(), value.clone()).await;
                state.dedup.finish(guard, Arc::new(value.clone())).await;
                Ok(Json(value))
            }
            Err(e) => {
                state.dedup.abandon(guard).await;
                Err(e)
            }
        },
    }
}

async fn compute(state: &SharedState) -> Result<serde_json::Value, ApiError> {
    let summary = state.db.analytics_summary().await?;

    Ok(json!({
        "totalScans": summary.total_scans,
        "activeThreats": summary.active_threats,
        "totalVulnerabilities": summary.total_vulnerabilities,
        "averageRiskScore": summary.average_risk_score,
        "averageScanDurationSeconds": summary.average_scan_duration_seconds,
        "riskDistribution": {
            "critical": summary.risk_distribution.critical,
            "high": summary.risk_distribution.high,
            "medium": summary.risk_distribution.medium,
            "low": summary.risk_distribution.low,
        },
        "vulnerabilityTrends": summary.vulnerability_trends,
        "recentScans": summary.recent_scans,
        "libraries_analyzed": summary.libraries_analyzed,
        "top_vulnerabilities": summary.top_vulnerabilities,
    }))
}

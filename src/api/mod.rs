// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - API Gateway
 * REST surface wiring: router assembly, request identification, rate
 * limiting, CORS and the stable error contract
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

pub mod analytics;
pub mod scans;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info_span, Instrument};

use crate::cache::{InflightDedup, ResponseCache};
use crate::config::Config;
use crate::database::Database;
use crate::errors::ScannerError;
use crate::health::HealthChecker;
use crate::metrics::MetricsCollector;
use crate::policy::TargetPolicy;
use crate::queue::JobQueue;
use crate::storage::ArtifactStore;

/// Shared state for every handler.
pub struct AppState {
    pub db: Arc<Database>,
    pub scan_queue: JobQueue,
    pub analysis_queue: JobQueue,
    pub storage: ArtifactStore,
    pub policy: TargetPolicy,
    pub config: Config,
    pub metrics: Arc<MetricsCollector>,
    pub health: Arc<HealthChecker>,
    pub response_cache: ResponseCache,
    pub dedup: Arc<InflightDedup>,
    pub rate_limiter: RateLimiter,
    pub insight: crate::insight::InsightProvider,
}

pub type SharedState = Arc<AppState>;

/// API error contract: stable machine-readable codes plus a message.
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    JsonParse(String),
    PayloadTooLarge,
    Policy(String),
    Cooldown { retry_after_seconds: i64 },
    NotFound(String),
    RateLimited,
    Connection(String),
    Timeout(String),
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            ApiError::JsonParse(msg) => (StatusCode::BAD_REQUEST, "JSON_PARSE_ERROR", msg.clone()),
            ApiError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                "Request body exceeds the configured limit".to_string(),
            ),
            ApiError::Policy(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::Cooldown {
                retry_after_seconds,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                "COOLDOWN",
                format!(
                    "A scan for this URL ran recently; retry in {}s",
                    retry_after_seconds
                ),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Too many requests".to_string(),
            ),
            ApiError::Connection(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "CONNECTION_ERROR",
                msg.clone(),
            ),
            ApiError::Timeout(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "TIMEOUT_ERROR", msg.clone())
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let mut body = json!({ "error": message, "code": code });
        if let ApiError::Cooldown {
            retry_after_seconds,
        } = &self
        {
            body["retryAfterSeconds"] = json!(retry_after_seconds);
        }
        (status, Json(body)).into_response()
    }
}

impl From<ScannerError> for ApiError {
    fn from(err: ScannerError) -> Self {
        match err {
            ScannerError::Validation(msg) => ApiError::Validation(msg),
            ScannerError::PolicyViolation { reason, .. } => ApiError::Policy(reason),
            ScannerError::CooldownActive {
                retry_after_seconds,
                ..
            } => ApiError::Cooldown {
                retry_after_seconds,
            },
            ScannerError::NotFound(msg) => ApiError::NotFound(msg),
            ScannerError::Timeout { duration } => {
                ApiError::Timeout(format!("Operation timed out after {:?}", duration))
            }
            ScannerError::Database(e) if e.is_retryable() => {
                ApiError::Connection(format!("Database unavailable: {}", e))
            }
            ScannerError::Queue(e) if e.is_retryable() => {
                ApiError::Connection(format!("Queue backend unavailable: {}", e))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(format!("Serialization error: {}", err))
    }
}

/// Fixed-window per-IP rate limiter.
pub struct RateLimiter {
    window: Duration,
    max: u32,
    windows: Mutex<HashMap<String, (Instant, u32)>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max: u32) -> Self {
        Self {
            window,
            max,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// True when the request is allowed.
    pub fn check(&self, ip: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock();

        // Opportunistic cleanup keeps the map bounded.
        if windows.len() > 10_000 {
            let window = self.window;
            windows.retain(|_, (start, _)| now.duration_since(*start) < window);
        }

        let entry = windows.entry(ip.to_string()).or_insert((now, 0));
        if now.duration_since(entry.0) >= self.window {
            *entry = (now, 0);
        }
        entry.1 += 1;
        entry.1 <= self.max
    }
}

/// Request-ID + access-log + rate-limit middleware.
async fn edge_middleware(
    State(state): State<SharedState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let ip = addr.ip().to_string();
    let start = Instant::now();

    let span = info_span!("request", %request_id, %method, %path);

    let mut response = if path.starts_with("/api") && !state.rate_limiter.check(&ip) {
        ApiError::RateLimited.into_response()
    } else {
        next.run(request).instrument(span).await
    };

    state.metrics.record_request(
        method.as_str(),
        &path,
        response.status().as_u16(),
        start.elapsed(),
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    if let Ok(origin) = HeaderValue::from_str(&state.config.server.cors_origin) {
        response
            .headers_mut()
            .insert("access-control-allow-origin", origin);
    }

    response
}

async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let report = state.health.report().await;
    let status = match report.status {
        crate::health::HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(report))
}

async fn ready_handler(State(state): State<SharedState>) -> impl IntoResponse {
    if state.health.is_ready().await {
        (StatusCode::OK, Json(json!({ "ready": true })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false })),
        )
    }
}

async fn live_handler() -> impl IntoResponse {
    Json(json!({ "alive": true }))
}

async fn metrics_handler(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let scan_counts = state.scan_queue.counts().await?;
    let analysis_counts = state.analysis_queue.counts().await?;

    Ok(Json(json!({
        "process": state.metrics.snapshot(),
        "queues": {
            "scan": {
                "counts": scan_counts,
                "metrics": state.scan_queue.metrics().snapshot(),
            },
            "analysis": {
                "counts": analysis_counts,
                "metrics": state.analysis_queue.metrics().snapshot(),
            },
        },
    })))
}

/// Assemble the complete router.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/scans", post(scans::create_scan).get(scans::list_scans))
        .route("/api/scans/by-url/last-good", get(scans::last_good_scan))
        .route(
            "/api/scans/{id}",
            get(scans::get_scan).delete(scans::delete_scan),
        )
        .route("/api/scans/{id}/status", get(scans::get_status))
        .route("/api/scans/{id}/results", get(scans::get_results))
        .route("/api/scans/{id}/surface", get(scans::get_surface))
        .route("/api/analytics/summary", get(analytics::summary))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/live", get(live_handler))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            edge_middleware,
        ))
        .layer(axum::extract::DefaultBodyLimit::max(
            state.config.server.max_request_size,
        ))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_fixed_window() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        assert!(limiter.check("1.1.1.1"));
        assert!(limiter.check("1.1.1.1"));
        assert!(limiter.check("1.1.1.1"));
        assert!(!limiter.check("1.1.1.1"));
        // Other IPs are unaffected.
        assert!(limiter.check("2.2.2.2"));
    }

    #[test]
    fn test_api_error_codes() {
        let (status, code, _) = ApiError::Validation("bad".into()).parts();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "VALIDATION_ERROR");

        let (status, code, _) = ApiError::Cooldown {
            retry_after_seconds: 25,
        }
        .parts();
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(code, "COOLDOWN");

        let (status, code, _) = ApiError::Connection("db down".into()).parts();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(code, "CONNECTION_ERROR");
    }

    #[test]
    fn test_scanner_error_mapping() {
        let err: ApiError = ScannerError::PolicyViolation {
            url: "http://127.0.0.1".into(),
            reason: "Access to local addresses is not allowed".into(),
        }
        .into();
        match err {
            ApiError::Policy(msg) => {
                assert_eq!(msg, "Access to local addresses is not allowed")
            }
            other => panic!("unexpected mapping: {other:?}"),
        }

        let err: ApiError = ScannerError::NotFound("scan x".into()).into();
        matches!(err, ApiError::NotFound(_));
    }
}

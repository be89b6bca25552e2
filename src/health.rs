// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Health Checks
 * Component probes for database, queue backend, object store and the
 * queue metrics loop
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::database::Database;
use crate::queue::JobQueue;
use crate::storage::ArtifactStore;

/// Every probe is bounded by this timeout.
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// The metrics loop must have beaten within this window to count as alive.
const METRICS_HEARTBEAT_BUDGET: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub components: Vec<ComponentHealth>,
}

pub struct HealthChecker {
    start_time: Instant,
    version: String,
    db: Arc<Database>,
    scan_queue: JobQueue,
    analysis_queue: JobQueue,
    storage: ArtifactStore,
    components: RwLock<Vec<ComponentHealth>>,
}

impl HealthChecker {
    pub fn new(
        version: String,
        db: Arc<Database>,
        scan_queue: JobQueue,
        analysis_queue: JobQueue,
        storage: ArtifactStore,
    ) -> Self {
        Self {
            start_time: Instant::now(),
            version,
            db,
            scan_queue,
            analysis_queue,
            storage,
            components: RwLock::new(Vec::new()),
        }
    }

    async fn probe<F, Fut>(name: &str, probe: F) -> ComponentHealth
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = crate::errors::ScannerResult<()>>,
    {
        let start = Instant::now();
        let outcome = tokio::time::timeout(CHECK_TIMEOUT, probe()).await;

        let (status, message) = match outcome {
            Ok(Ok(())) => (HealthStatus::Healthy, None),
            Ok(Err(e)) => (HealthStatus::Unhealthy, Some(e.to_string())),
            Err(_) => (
                HealthStatus::Unhealthy,
                Some(format!("check timed out after {:?}", CHECK_TIMEOUT)),
            ),
        };

        ComponentHealth {
            name: name.to_string(),
            status,
            message,
            last_check: chrono::Utc::now().to_rfc3339(),
            response_time_ms: matches!(status, HealthStatus::Healthy)
                .then(|| start.elapsed().as_millis() as u64),
        }
    }

    /// Run every component probe and cache the results.
    pub async fn run_checks(&self) -> Vec<ComponentHealth> {
        let db = Arc::clone(&self.db);
        let database = Self::probe("database", || async move { db.ping().await }).await;

        let scan_queue = self.scan_queue.clone();
        let queue_check = Self::probe("queue", || async move {
            scan_queue.ping().await?;
            scan_queue.counts().await?;
            Ok(())
        })
        .await;

        let analysis_queue = self.analysis_queue.clone();
        let analysis_check = Self::probe("analysis-queue", || async move {
            analysis_queue.counts().await?;
            Ok(())
        })
        .await;

        let storage = self.storage.clone();
        let storage_check = Self::probe("storage", || async move { storage.ping().await }).await;

        let metrics_age = self.scan_queue.metrics().heartbeat_age();
        let metrics_check = ComponentHealth {
            name: "queue-metrics".to_string(),
            status: if metrics_age <= METRICS_HEARTBEAT_BUDGET {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            message: (metrics_age > METRICS_HEARTBEAT_BUDGET)
                .then(|| format!("last heartbeat {:?} ago", metrics_age)),
            last_check: chrono::Utc::now().to_rfc3339(),
            response_time_ms: None,
        };

        let checks = vec![database, queue_check, analysis_check, storage_check, metrics_check];
        *self.components.write().await = checks.clone();
        checks
    }

    pub async fn report(&self) -> HealthReport {
        let components = self.components.read().await.clone();
        let components = if components.is_empty() {
            self.run_checks().await
        } else {
            components
        };

        let status = if components
            .iter()
            .any(|c| c.status == HealthStatus::Unhealthy)
        {
            HealthStatus::Unhealthy
        } else if components.iter().any(|c| c.status == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            version: self.version.clone(),
            components,
        }
    }

    /// Readiness: healthy or degraded components all round.
    pub async fn is_ready(&self) -> bool {
        let components = self.components.read().await;
        !components.is_empty()
            && components
                .iter()
                .all(|c| c.status != HealthStatus::Unhealthy)
    }

    /// Kick off the periodic check loop.
    pub fn spawn_periodic(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        info!(interval_secs = interval.as_secs(), "Starting periodic health checks");
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let checks = self.run_checks().await;
                for check in &checks {
                    if check.status != HealthStatus::Healthy {
                        debug!(
                            component = %check.name,
                            status = ?check.status,
                            message = check.message.as_deref().unwrap_or(""),
                            "Component not healthy"
                        );
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"HEALTHY\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"UNHEALTHY\""
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_is_unhealthy() {
        let check = HealthChecker::probe("slow", || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert_eq!(check.status, HealthStatus::Unhealthy);
        assert!(check.message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_probe_success() {
        let check = HealthChecker::probe("ok", || async { Ok(()) }).await;
        assert_eq!(check.status, HealthStatus::Healthy);
        assert!(check.response_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_probe_error_is_unhealthy() {
        let check = HealthChecker::probe("bad", || async {
            Err(crate::errors::ScannerError::General("broken".into()))
        })
        .await;
        assert_eq!(check.status, HealthStatus::Unhealthy);
    }
}

// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Process Metrics
 * Request and scan counters exposed by the /metrics snapshot
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Process-wide counters. Cheap to clone-share behind an Arc; updates are
/// atomic, snapshot reads are consistent enough for dashboards.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
    scans_created: AtomicU64,
    scans_completed: AtomicU64,
    scans_failed: AtomicU64,
    render_jobs: AtomicU64,
    analyze_jobs: AtomicU64,
    feed_lookups: AtomicU64,
    custom: Mutex<HashMap<String, u64>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub scans_created: u64,
    pub scans_completed: u64,
    pub scans_failed: u64,
    pub render_jobs: u64,
    pub analyze_jobs: u64,
    pub feed_lookups: u64,
    pub custom: HashMap<String, u64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, method: &str, path: &str, status: u16, duration: Duration) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if status >= 500 {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            method,
            path,
            status,
            duration_ms = duration.as_millis() as u64,
            "Request completed"
        );
    }

    pub fn record_scan_created(&self) {
        self.scans_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan_completed(&self) {
        self.scans_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan_failed(&self) {
        self.scans_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_render_job(&self) {
        self.render_jobs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_analyze_job(&self) {
        self.analyze_jobs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_feed_lookup(&self) {
        self.feed_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment(&self, name: &str, delta: u64) {
        let mut custom = self.custom.lock();
        *custom.entry(name.to_string()).or_insert(0) += delta;
    }

    pub fn get(&self, name: &str) -> u64 {
        *self.custom.lock().get(name).unwrap_or(&0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            scans_created: self.scans_created.load(Ordering::Relaxed),
            scans_completed: self.scans_completed.load(Ordering::Relaxed),
            scans_failed: self.scans_failed.load(Ordering::Relaxed),
            render_jobs: self.render_jobs.load(Ordering::Relaxed),
            analyze_jobs: self.analyze_jobs.load(Ordering::Relaxed),
            feed_lookups: self.feed_lookups.load(Ordering::Relaxed),
            custom: self.custom.lock().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_counters() {
        let metrics = MetricsCollector::new();
        metrics.record_request("GET", "/api/scans", 200, Duration::from_millis(5));
        metrics.record_request("POST", "/api/scans", 500, Duration::from_millis(9));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.requests_failed, 1);
    }

    #[test]
    fn test_custom_counters() {
        let metrics = MetricsCollector::new();
        metrics.increment("cooldown_rejections", 1);
        metrics.increment("cooldown_rejections", 2);
        assert_eq!(metrics.get("cooldown_rejections"), 3);
        assert_eq!(metrics.get("unknown"), 0);
    }

    #[test]
    fn test_scan_lifecycle_counters() {
        let metrics = MetricsCollector::new();
        metrics.record_scan_created();
        metrics.record_scan_completed();
        metrics.record_scan_failed();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.scans_created, 1);
        assert_eq!(snapshot.scans_completed, 1);
        assert_eq!(snapshot.scans_failed, 1);
    }
}

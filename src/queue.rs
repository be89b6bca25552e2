// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Durable Job Queue
 * Redis-backed two-queue system: waiting/delayed/active states, exponential
 * retry, lease-based stall detection, dead-lettering and rolling metrics
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use chrono::Utc;
use deadpool_redis::redis::cmd;
use deadpool_redis::{Config as RedisPoolConfig, Pool, Runtime};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::errors::{QueueError, ScannerError, ScannerResult};

pub const SCAN_QUEUE: &str = "scan-queue";
pub const ANALYSIS_QUEUE: &str = "analysis-queue";

/// Redis operations are bounded by this timeout.
const OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Completed-job processing times kept for the rolling average.
const PROCESSING_RING_CAPACITY: usize = 500;

/// Hourly metric windows retained.
const HOURLY_WINDOWS: usize = 24;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
    DeadLetter,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::DeadLetter => "dead-letter",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(JobState::Waiting),
            "delayed" => Some(JobState::Delayed),
            "active" => Some(JobState::Active),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            "dead-letter" => Some(JobState::DeadLetter),
            _ => None,
        }
    }
}

/// Per-job behavior knobs fixed at enqueue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOptions {
    pub max_attempts: u32,
    /// Base delay D for exponential backoff: retry n waits D * 2^(n-1).
    pub backoff_ms: u64,
    pub timeout_ms: u64,
    pub priority: i32,
    /// Initial delay before the job becomes runnable.
    pub delay_ms: u64,
}

impl JobOptions {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_ms: config.retry_delay.as_millis() as u64,
            timeout_ms: config.job_timeout.as_millis() as u64,
            priority: 0,
            delay_ms: 0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Backoff before retry number `retry` (1-based): D * 2^(retry-1).
    pub fn backoff_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::from_millis(0);
        }
        let factor = 2u64.saturating_pow(retry - 1);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

/// A job leased to a worker.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub payload: Value,
    pub attempts: u32,
    pub options: JobOptions,
}

/// Observable job state for the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: String,
    pub state: JobState,
    pub progress: u8,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
}

/// Entry parked on the dead-letter queue after retry exhaustion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    /// `dl-{jobId}-{ts}`
    pub id: String,
    pub original_job_id: String,
    pub payload: Value,
    pub attempts: u32,
    pub failed_reason: String,
    pub dead_lettered_at: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub waiting: i64,
    pub delayed: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub dead_letter: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyWindow {
    pub hour_epoch: i64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetricsSnapshot {
    pub avg_processing_ms: f64,
    pub samples: usize,
    pub hourly: Vec<HourlyWindow>,
    pub metrics_heartbeat_epoch_ms: i64,
}

/// Process-local rolling metrics, serialized behind one mutex owner.
pub struct QueueMetrics {
    processing_ms: Mutex<VecDeque<u64>>,
    hourly: Mutex<HashMap<i64, HourlyWindow>>,
    heartbeat_ms: AtomicI64,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self {
            processing_ms: Mutex::new(VecDeque::with_capacity(PROCESSING_RING_CAPACITY)),
            hourly: Mutex::new(HashMap::new()),
            heartbeat_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    fn hour_now() -> i64 {
        Utc::now().timestamp() / 3600
    }

    fn window_entry<'a>(
        map: &'a mut HashMap<i64, HourlyWindow>,
        hour: i64,
    ) -> &'a mut HourlyWindow {
        if map.len() >= HOURLY_WINDOWS && !map.contains_key(&hour) {
            if let Some(oldest) = map.keys().min().copied() {
                map.remove(&oldest);
            }
        }
        map.entry(hour).or_insert_with(|| HourlyWindow {
            hour_epoch: hour,
            ..Default::default()
        })
    }

    pub fn record_completed(&self, processing: Duration) {
        let mut ring = self.processing_ms.lock();
        if ring.len() == PROCESSING_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(processing.as_millis() as u64);
        drop(ring);

        let mut hourly = self.hourly.lock();
        Self::window_entry(&mut hourly, Self::hour_now()).completed += 1;
    }

    pub fn record_failed(&self) {
        let mut hourly = self.hourly.lock();
        Self::window_entry(&mut hourly, Self::hour_now()).failed += 1;
    }

    pub fn record_retried(&self) {
        let mut hourly = self.hourly.lock();
        Self::window_entry(&mut hourly, Self::hour_now()).retried += 1;
    }

    /// The metrics loop stamps this; health checks compare it to now.
    pub fn beat(&self) {
        self.heartbeat_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn heartbeat_age(&self) -> Duration {
        let last = self.heartbeat_ms.load(Ordering::Relaxed);
        let delta = (Utc::now().timestamp_millis() - last).max(0) as u64;
        Duration::from_millis(delta)
    }

    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        let ring = self.processing_ms.lock();
        let samples = ring.len();
        let avg = if samples == 0 {
            0.0
        } else {
            ring.iter().sum::<u64>() as f64 / samples as f64
        };
        drop(ring);

        let mut hourly: Vec<HourlyWindow> = self.hourly.lock().values().cloned().collect();
        hourly.sort_by_key(|w| w.hour_epoch);

        QueueMetricsSnapshot {
            avg_processing_ms: avg,
            samples,
            hourly,
            metrics_heartbeat_epoch_ms: self.heartbeat_ms.load(Ordering::Relaxed),
        }
    }
}

impl Default for QueueMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// One durable queue over the shared Redis backing store.
#[derive(Clone)]
pub struct JobQueue {
    pool: Pool,
    name: String,
    config: QueueConfig,
    metrics: Arc<QueueMetrics>,
}

impl JobQueue {
    pub async fn connect(redis_url: &str, name: &str, config: QueueConfig) -> ScannerResult<Self> {
        let cfg = RedisPoolConfig::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
            ScannerError::Queue(QueueError::ConnectionFailed {
                reason: e.to_string(),
            })
        })?;

        let queue = Self {
            pool,
            name: name.to_string(),
            config,
            metrics: Arc::new(QueueMetrics::new()),
        };
        queue.ping().await?;
        info!(queue = name, "Job queue connected");
        Ok(queue)
    }

    /// Share one pool across queues (scan + analysis on the same backing store).
    pub fn with_pool(pool: Pool, name: &str, config: QueueConfig) -> Self {
        Self {
            pool,
            name: name.to_string(),
            config,
            metrics: Arc::new(QueueMetrics::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> Pool {
        self.pool.clone()
    }

    pub fn metrics(&self) -> Arc<QueueMetrics> {
        Arc::clone(&self.metrics)
    }

    fn key(&self, suffix: &str) -> String {
        format!("queue:{}:{}", self.name, suffix)
    }

    fn job_key(&self, job_id: &str) -> String {
        self.key(&format!("job:{}", job_id))
    }

    fn lock_key(&self, job_id: &str) -> String {
        self.key(&format!("lock:{}", job_id))
    }

    async fn conn(&self) -> ScannerResult<deadpool_redis::Connection> {
        tokio::time::timeout(OP_TIMEOUT, self.pool.get())
            .await
            .map_err(|_| {
                ScannerError::Queue(QueueError::OperationTimeout {
                    timeout: OP_TIMEOUT,
                })
            })?
            .map_err(Into::into)
    }

    async fn bounded<T, F>(fut: F) -> ScannerResult<T>
    where
        F: std::future::Future<Output = ScannerResult<T>>,
    {
        tokio::time::timeout(OP_TIMEOUT, fut).await.map_err(|_| {
            ScannerError::Queue(QueueError::OperationTimeout {
                timeout: OP_TIMEOUT,
            })
        })?
    }

    pub async fn ping(&self) -> ScannerResult<()> {
        let mut conn = self.conn().await?;
        Self::bounded(async {
            let _: String = cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    /// Enqueue a job. Returns false when a live job with the same id already
    /// exists (id-based dedup); terminal jobs are replaced.
    pub async fn enqueue(
        &self,
        job_id: &str,
        payload: &Value,
        options: JobOptions,
    ) -> ScannerResult<bool> {
        let mut conn = self.conn().await?;
        let job_key = self.job_key(job_id);
        let now_ms = Utc::now().timestamp_millis();

        Self::bounded(async {
            let existing: Option<String> = cmd("HGET")
                .arg(&job_key)
                .arg("state")
                .query_async(&mut conn)
                .await?;
            if let Some(state) = existing.as_deref().and_then(JobState::parse) {
                if matches!(state, JobState::Waiting | JobState::Delayed | JobState::Active) {
                    debug!(job_id, state = state.as_str(), "Duplicate enqueue ignored");
                    return Ok(false);
                }
            }

            let state = if options.delay_ms > 0 {
                JobState::Delayed
            } else {
                JobState::Waiting
            };

            let _: () = cmd("HSET")
                .arg(&job_key)
                .arg("payload")
                .arg(serde_json::to_string(payload)?)
                .arg("attempts")
                .arg(0)
                .arg("max_attempts")
                .arg(options.max_attempts)
                .arg("backoff_ms")
                .arg(options.backoff_ms)
                .arg("timeout_ms")
                .arg(options.timeout_ms)
                .arg("priority")
                .arg(options.priority)
                .arg("state")
                .arg(state.as_str())
                .arg("progress")
                .arg(0)
                .arg("stalled_count")
                .arg(0)
                .arg("enqueued_at")
                .arg(now_ms)
                .query_async(&mut conn)
                .await?;
            // Clear terminal leftovers from a previous run of the same id.
            let _: () = cmd("HDEL")
                .arg(&job_key)
                .arg("result")
                .arg("failed_reason")
                .query_async(&mut conn)
                .await?;

            if options.delay_ms > 0 {
                let _: () = cmd("ZADD")
                    .arg(self.key("delayed"))
                    .arg(now_ms + options.delay_ms as i64)
                    .arg(job_id)
                    .query_async(&mut conn)
                    .await?;
            } else {
                let _: () = cmd("LPUSH")
                    .arg(self.key("waiting"))
                    .arg(job_id)
                    .query_async(&mut conn)
                    .await?;
            }

            debug!(job_id, queue = %self.name, state = state.as_str(), "Job enqueued");
            Ok(true)
        })
        .await
    }

    /// Promote delayed jobs whose time has come into the waiting list.
    pub async fn promote_due_jobs(&self) -> ScannerResult<usize> {
        let mut conn = self.conn().await?;
        let now_ms = Utc::now().timestamp_millis();

        Self::bounded(async {
            let due: Vec<String> = cmd("ZRANGEBYSCORE")
                .arg(self.key("delayed"))
                .arg("-inf")
                .arg(now_ms)
                .query_async(&mut conn)
                .await?;

            for job_id in &due {
                let _: () = cmd("ZREM")
                    .arg(self.key("delayed"))
                    .arg(job_id)
                    .query_async(&mut conn)
                    .await?;
                let _: () = cmd("HSET")
                    .arg(self.job_key(job_id))
                    .arg("state")
                    .arg(JobState::Waiting.as_str())
                    .query_async(&mut conn)
                    .await?;
                let _: () = cmd("LPUSH")
                    .arg(self.key("waiting"))
                    .arg(job_id)
                    .query_async(&mut conn)
                    .await?;
            }

            Ok(due.len())
        })
        .await
    }

    /// Pop the next runnable job and lease it to this worker. The per-job lock
    /// guarantees at most one active holder per job id.
    pub async fn dequeue(&self, worker_id: &str) -> ScannerResult<Option<Job>> {
        self.promote_due_jobs().await?;

        let mut conn = self.conn().await?;
        let lease_ms = self.config.stalled_interval.as_millis() as u64;

        Self::bounded(async {
            loop {
                let job_id: Option<String> = cmd("RPOP")
                    .arg(self.key("waiting"))
                    .query_async(&mut conn)
                    .await?;
                let job_id = match job_id {
                    Some(id) => id,
                    None => return Ok(None),
                };

                // Lease lock: at-most-one active holder of a job id.
                let acquired: Option<String> = cmd("SET")
                    .arg(self.lock_key(&job_id))
                    .arg(worker_id)
                    .arg("NX")
                    .arg("PX")
                    .arg(lease_ms)
                    .query_async(&mut conn)
                    .await?;
                if acquired.is_none() {
                    debug!(job_id, "Job already leased, skipping duplicate entry");
                    continue;
                }

                let fields: HashMap<String, String> = cmd("HGETALL")
                    .arg(self.job_key(&job_id))
                    .query_async(&mut conn)
                    .await?;
                if fields.is_empty() {
                    warn!(job_id, "Waiting entry without a job record, dropping");
                    let _: () = cmd("DEL")
                        .arg(self.lock_key(&job_id))
                        .query_async(&mut conn)
                        .await?;
                    continue;
                }

                let payload: Value = fields
                    .get("payload")
                    .map(|raw| serde_json::from_str(raw))
                    .transpose()
                    .map_err(|e| {
                        ScannerError::Queue(QueueError::MalformedPayload {
                            job_id: job_id.clone(),
                            reason: e.to_string(),
                        })
                    })?
                    .unwrap_or(Value::Null);

                let parse_u32 = |key: &str, default: u32| {
                    fields
                        .get(key)
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(default)
                };
                let parse_u64 = |key: &str, default: u64| {
                    fields
                        .get(key)
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(default)
                };

                let attempts = parse_u32("attempts", 0) + 1;
                let now_ms = Utc::now().timestamp_millis();

                let _: () = cmd("HSET")
                    .arg(self.job_key(&job_id))
                    .arg("state")
                    .arg(JobState::Active.as_str())
                    .arg("attempts")
                    .arg(attempts)
                    .arg("heartbeat_at")
                    .arg(now_ms)
                    .query_async(&mut conn)
                    .await?;
                let _: () = cmd("HSET")
                    .arg(self.key("active"))
                    .arg(&job_id)
                    .arg(now_ms + lease_ms as i64)
                    .query_async(&mut conn)
                    .await?;

                let options = JobOptions {
                    max_attempts: parse_u32("max_attempts", self.config.max_attempts),
                    backoff_ms: parse_u64(
                        "backoff_ms",
                        self.config.retry_delay.as_millis() as u64,
                    ),
                    timeout_ms: parse_u64(
                        "timeout_ms",
                        self.config.job_timeout.as_millis() as u64,
                    ),
                    priority: fields
                        .get("priority")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0),
                    delay_ms: 0,
                };

                debug!(job_id, attempts, queue = %self.name, "Job leased");
                return Ok(Some(Job {
                    id: job_id,
                    payload,
                    attempts,
                    options,
                }));
            }
        })
        .await
    }

    /// Extend the lease for an active job.
    pub async fn heartbeat(&self, job_id: &str) -> ScannerResult<()> {
        let mut conn = self.conn().await?;
        let lease_ms = self.config.stalled_interval.as_millis() as u64;
        let now_ms = Utc::now().timestamp_millis();

        Self::bounded(async {
            let _: () = cmd("PEXPIRE")
                .arg(self.lock_key(job_id))
                .arg(lease_ms)
                .query_async(&mut conn)
                .await?;
            let _: () = cmd("HSET")
                .arg(self.key("active"))
                .arg(job_id)
                .arg(now_ms + lease_ms as i64)
                .query_async(&mut conn)
                .await?;
            let _: () = cmd("HSET")
                .arg(self.job_key(job_id))
                .arg("heartbeat_at")
                .arg(now_ms)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    /// Report job progress [0,100]. Readers may observe stale values.
    pub async fn update_progress(&self, job_id: &str, progress: u8) -> ScannerResult<()> {
        let mut conn = self.conn().await?;
        Self::bounded(async {
            let _: () = cmd("HSET")
                .arg(self.job_key(job_id))
                .arg("progress")
                .arg(progress.min(100))
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    /// Mark a job completed and store its result.
    pub async fn complete(&self, job_id: &str, result: &Value) -> ScannerResult<()> {
        let mut conn = self.conn().await?;

        Self::bounded(async {
            let enqueued_at: Option<i64> = cmd("HGET")
                .arg(self.job_key(job_id))
                .arg("enqueued_at")
                .query_async(&mut conn)
                .await?;

            let _: () = cmd("HSET")
                .arg(self.job_key(job_id))
                .arg("state")
                .arg(JobState::Completed.as_str())
                .arg("progress")
                .arg(100)
                .arg("result")
                .arg(serde_json::to_string(result)?)
                .query_async(&mut conn)
                .await?;
            self.release(&mut conn, job_id).await?;
            let _: i64 = cmd("INCR")
                .arg(self.key("completed_count"))
                .query_async(&mut conn)
                .await?;

            if let Some(enqueued_at) = enqueued_at {
                let elapsed = (Utc::now().timestamp_millis() - enqueued_at).max(0) as u64;
                self.metrics.record_completed(Duration::from_millis(elapsed));
            }

            debug!(job_id, queue = %self.name, "Job completed");
            Ok(())
        })
        .await
    }

    /// Record a failure: re-queue with exponential backoff until attempts are
    /// exhausted, then dead-letter with the original payload intact.
    pub async fn fail(&self, job_id: &str, reason: &str) -> ScannerResult<JobState> {
        let mut conn = self.conn().await?;

        Self::bounded(async {
            let fields: HashMap<String, String> = cmd("HGETALL")
                .arg(self.job_key(job_id))
                .query_async(&mut conn)
                .await?;
            if fields.is_empty() {
                return Err(ScannerError::Queue(QueueError::JobNotFound {
                    queue: self.name.clone(),
                    job_id: job_id.to_string(),
                }));
            }

            let attempts: u32 = fields
                .get("attempts")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            let max_attempts: u32 = fields
                .get("max_attempts")
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.config.max_attempts);
            let backoff_ms: u64 = fields
                .get("backoff_ms")
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.config.retry_delay.as_millis() as u64);

            self.release(&mut conn, job_id).await?;
            let _: i64 = cmd("INCR")
                .arg(self.key("failed_count"))
                .query_async(&mut conn)
                .await?;
            self.metrics.record_failed();

            if attempts >= max_attempts {
                let now_ms = Utc::now().timestamp_millis();
                let entry = DeadLetterEntry {
                    id: format!("dl-{}-{}", job_id, now_ms),
                    original_job_id: job_id.to_string(),
                    payload: fields
                        .get("payload")
                        .and_then(|raw| serde_json::from_str(raw).ok())
                        .unwrap_or(Value::Null),
                    attempts,
                    failed_reason: reason.to_string(),
                    dead_lettered_at: now_ms,
                };
                let _: () = cmd("LPUSH")
                    .arg(self.key("dead"))
                    .arg(serde_json::to_string(&entry)?)
                    .query_async(&mut conn)
                    .await?;
                let _: () = cmd("HSET")
                    .arg(self.job_key(job_id))
                    .arg("state")
                    .arg(JobState::DeadLetter.as_str())
                    .arg("failed_reason")
                    .arg(reason)
                    .query_async(&mut conn)
                    .await?;

                warn!(
                    job_id,
                    attempts,
                    queue = %self.name,
                    reason,
                    "Job dead-lettered"
                );
                return Ok(JobState::DeadLetter);
            }

            // retry n (the one about to run) waits D * 2^(n-1)
            let options = JobOptions {
                max_attempts,
                backoff_ms,
                timeout_ms: 0,
                priority: 0,
                delay_ms: 0,
            };
            let delay = options.backoff_for_retry(attempts);
            let run_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;

            let _: () = cmd("HSET")
                .arg(self.job_key(job_id))
                .arg("state")
                .arg(JobState::Delayed.as_str())
                .arg("failed_reason")
                .arg(reason)
                .query_async(&mut conn)
                .await?;
            let _: () = cmd("ZADD")
                .arg(self.key("delayed"))
                .arg(run_at)
                .arg(job_id)
                .query_async(&mut conn)
                .await?;
            self.metrics.record_retried();

            info!(
                job_id,
                attempts,
                max_attempts,
                backoff_ms = delay.as_millis() as u64,
                queue = %self.name,
                "Job scheduled for retry"
            );
            Ok(JobState::Delayed)
        })
        .await
    }

    /// Put a leased job back without consuming an attempt. Used when a worker
    /// cannot take the job right now (e.g. another slot holds the same scan).
    pub async fn requeue(&self, job_id: &str, delay: Duration) -> ScannerResult<()> {
        let mut conn = self.conn().await?;
        let run_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        Self::bounded(async {
            self.release(&mut conn, job_id).await?;
            let _: () = cmd("HINCRBY")
                .arg(self.job_key(job_id))
                .arg("attempts")
                .arg(-1)
                .query_async(&mut conn)
                .await?;
            let _: () = cmd("HSET")
                .arg(self.job_key(job_id))
                .arg("state")
                .arg(JobState::Delayed.as_str())
                .query_async(&mut conn)
                .await?;
            let _: () = cmd("ZADD")
                .arg(self.key("delayed"))
                .arg(run_at)
                .arg(job_id)
                .query_async(&mut conn)
                .await?;
            debug!(job_id, delay_ms = delay.as_millis() as u64, "Job requeued");
            Ok(())
        })
        .await
    }

    async fn release(
        &self,
        conn: &mut deadpool_redis::Connection,
        job_id: &str,
    ) -> ScannerResult<()> {
        let _: () = cmd("DEL")
            .arg(self.lock_key(job_id))
            .query_async(conn)
            .await?;
        let _: () = cmd("HDEL")
            .arg(self.key("active"))
            .arg(job_id)
            .query_async(conn)
            .await?;
        Ok(())
    }

    /// Re-queue active jobs whose lease expired. Jobs stalled more than
    /// `max_stalled_count` times are failed instead of re-queued.
    pub async fn sweep_stalled(&self) -> ScannerResult<usize> {
        let mut conn = self.conn().await?;
        let now_ms = Utc::now().timestamp_millis();

        let expired: Vec<String> = Self::bounded(async {
            let active: HashMap<String, i64> = cmd("HGETALL")
                .arg(self.key("active"))
                .query_async(&mut conn)
                .await?;
            Ok(active
                .into_iter()
                .filter(|(_, expiry)| *expiry < now_ms)
                .map(|(id, _)| id)
                .collect())
        })
        .await?;

        let mut swept = 0;
        for job_id in expired {
            let mut conn = self.conn().await?;
            let stalled_count: u32 = cmd("HINCRBY")
                .arg(self.job_key(&job_id))
                .arg("stalled_count")
                .arg(1)
                .query_async(&mut conn)
                .await?;

            if stalled_count > self.config.max_stalled_count {
                warn!(job_id, stalled_count, "Job exceeded stall budget");
                self.fail(&job_id, "Job stalled repeatedly").await?;
            } else {
                warn!(job_id, stalled_count, "Stalled job re-queued");
                self.release(&mut conn, &job_id).await?;
                let _: () = cmd("HSET")
                    .arg(self.job_key(&job_id))
                    .arg("state")
                    .arg(JobState::Waiting.as_str())
                    .query_async(&mut conn)
                    .await?;
                // Attempts were counted at lease time; dequeue will re-count.
                let _: () = cmd("HINCRBY")
                    .arg(self.job_key(&job_id))
                    .arg("attempts")
                    .arg(-1)
                    .query_async(&mut conn)
                    .await?;
                let _: () = cmd("LPUSH")
                    .arg(self.key("waiting"))
                    .arg(&job_id)
                    .query_async(&mut conn)
                    .await?;
            }
            swept += 1;
        }

        Ok(swept)
    }

    pub async fn job_status(&self, job_id: &str) -> ScannerResult<Option<JobStatus>> {
        let mut conn = self.conn().await?;

        Self::bounded(async {
            let fields: HashMap<String, String> = cmd("HGETALL")
                .arg(self.job_key(job_id))
                .query_async(&mut conn)
                .await?;
            if fields.is_empty() {
                return Ok(None);
            }

            Ok(Some(JobStatus {
                id: job_id.to_string(),
                state: fields
                    .get("state")
                    .and_then(|s| JobState::parse(s))
                    .unwrap_or(JobState::Waiting),
                progress: fields
                    .get("progress")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
                attempts: fields
                    .get("attempts")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
                result: fields
                    .get("result")
                    .and_then(|raw| serde_json::from_str(raw).ok()),
                failed_reason: fields.get("failed_reason").cloned(),
            }))
        })
        .await
    }

    pub async fn dead_letter_entries(&self, limit: isize) -> ScannerResult<Vec<DeadLetterEntry>> {
        let mut conn = self.conn().await?;
        Self::bounded(async {
            let raw: Vec<String> = cmd("LRANGE")
                .arg(self.key("dead"))
                .arg(0)
                .arg(limit - 1)
                .query_async(&mut conn)
                .await?;
            Ok(raw
                .iter()
                .filter_map(|entry| serde_json::from_str(entry).ok())
                .collect())
        })
        .await
    }

    pub async fn counts(&self) -> ScannerResult<QueueCounts> {
        let mut conn = self.conn().await?;
        Self::bounded(async {
            let waiting: i64 = cmd("LLEN")
                .arg(self.key("waiting"))
                .query_async(&mut conn)
                .await?;
            let delayed: i64 = cmd("ZCARD")
                .arg(self.key("delayed"))
                .query_async(&mut conn)
                .await?;
            let active: i64 = cmd("HLEN")
                .arg(self.key("active"))
                .query_async(&mut conn)
                .await?;
            let completed: Option<i64> = cmd("GET")
                .arg(self.key("completed_count"))
                .query_async(&mut conn)
                .await?;
            let failed: Option<i64> = cmd("GET")
                .arg(self.key("failed_count"))
                .query_async(&mut conn)
                .await?;
            let dead_letter: i64 = cmd("LLEN")
                .arg(self.key("dead"))
                .query_async(&mut conn)
                .await?;

            Ok(QueueCounts {
                waiting,
                delayed,
                active,
                completed: completed.unwrap_or(0),
                failed: failed.unwrap_or(0),
                dead_letter,
            })
        })
        .await
    }

    /// Spawn the maintenance loop: delayed-job promotion, stall sweeps and the
    /// metrics heartbeat. Runs until the process exits.
    pub fn spawn_maintenance(&self) -> tokio::task::JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(5));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                queue.metrics.beat();
                if let Err(e) = queue.promote_due_jobs().await {
                    warn!(queue = %queue.name, error = %e, "Delayed promotion failed");
                }
                if let Err(e) = queue.sweep_stalled().await {
                    warn!(queue = %queue.name, error = %e, "Stall sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_options() -> JobOptions {
        JobOptions {
            max_attempts: 5,
            backoff_ms: 2000,
            timeout_ms: 600_000,
            priority: 0,
            delay_ms: 0,
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let options = test_options();
        assert_eq!(options.backoff_for_retry(0), Duration::from_millis(0));
        assert_eq!(options.backoff_for_retry(1), Duration::from_millis(2000));
        assert_eq!(options.backoff_for_retry(2), Duration::from_millis(4000));
        assert_eq!(options.backoff_for_retry(3), Duration::from_millis(8000));
        assert_eq!(options.backoff_for_retry(4), Duration::from_millis(16000));
    }

    #[test]
    fn test_job_state_round_trip() {
        for state in [
            JobState::Waiting,
            JobState::Delayed,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
            JobState::DeadLetter,
        ] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
        assert_eq!(JobState::parse("nonsense"), None);
    }

    #[test]
    fn test_dead_letter_entry_shape() {
        let entry = DeadLetterEntry {
            id: "dl-scan-1-1700000000000".to_string(),
            original_job_id: "scan-1".to_string(),
            payload: serde_json::json!({"scanId": "scan-1"}),
            attempts: 5,
            failed_reason: "boom".to_string(),
            dead_lettered_at: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["originalJobId"], "scan-1");
        assert_eq!(json["attempts"], 5);
        let back: DeadLetterEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back.payload["scanId"], "scan-1");
    }

    #[test]
    fn test_metrics_ring_average() {
        let metrics = QueueMetrics::new();
        metrics.record_completed(Duration::from_millis(100));
        metrics.record_completed(Duration::from_millis(300));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.samples, 2);
        assert!((snapshot.avg_processing_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_metrics_ring_bounded() {
        let metrics = QueueMetrics::new();
        for _ in 0..(PROCESSING_RING_CAPACITY + 50) {
            metrics.record_completed(Duration::from_millis(10));
        }
        assert_eq!(metrics.snapshot().samples, PROCESSING_RING_CAPACITY);
    }

    #[test]
    fn test_metrics_hourly_windows() {
        let metrics = QueueMetrics::new();
        metrics.record_completed(Duration::from_millis(5));
        metrics.record_failed();
        metrics.record_retried();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hourly.len(), 1);
        assert_eq!(snapshot.hourly[0].completed, 1);
        assert_eq!(snapshot.hourly[0].failed, 1);
        assert_eq!(snapshot.hourly[0].retried, 1);
    }

    #[test]
    fn test_heartbeat_age_fresh() {
        let metrics = QueueMetrics::new();
        metrics.beat();
        assert!(metrics.heartbeat_age() < Duration::from_secs(1));
    }
}

// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - API Response Cache
 * moka-backed response memoization plus in-flight request dedup
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use moka::future::Cache;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Cached responses are capped at this many entries with lazy TTL expiry.
const RESPONSE_CACHE_CAPACITY: u64 = 1000;

/// How long a finished in-flight computation keeps answering duplicates.
const DEDUP_LINGER: Duration = Duration::from_secs(1);

/// Response cache for expensive GET endpoints (analytics summary).
#[derive(Clone)]
pub struct ResponseCache {
    cache: Cache<String, Arc<Value>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(RESPONSE_CACHE_CAPACITY)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Value>> {
        self.cache.get(key).await
    }

    pub async fn put(&self, key: String, value: Value) {
        self.cache.insert(key, Arc::new(value)).await;
    }

    pub async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
    }
}

/// Deduplicates identical in-flight requests keyed `method:path:ip`.
///
/// The first caller computes; concurrent identical callers await its result.
/// The slot lingers briefly after completion so immediate repeats also reuse
/// the answer.
pub struct InflightDedup {
    slots: Mutex<HashMap<String, broadcast::Sender<Arc<Value>>>>,
}

impl InflightDedup {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Either start computing (returns `Leader` with a publish handle) or wait
    /// for the in-flight leader's result.
    pub async fn join(&self, key: &str) -> DedupRole {
        let mut slots = self.slots.lock().await;
        if let Some(sender) = slots.get(key) {
            let receiver = sender.subscribe();
            debug!(key, "Joining in-flight request");
            return DedupRole::Follower(receiver);
        }

        let (sender, _) = broadcast::channel(1);
        slots.insert(key.to_string(), sender.clone());
        DedupRole::Leader(DedupGuard {
            key: key.to_string(),
            sender,
        })
    }

    /// Publish the leader's result and release the slot after the linger.
    pub async fn finish(self: &Arc<Self>, guard: DedupGuard, value: Arc<Value>) {
        let _ = guard.sender.send(value);
        let this = Arc::clone(self);
        let key = guard.key.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DEDUP_LINGER).await;
            this.slots.lock().await.remove(&key);
        });
    }

    /// Drop the slot without publishing (leader failed).
    pub async fn abandon(&self, guard: DedupGuard) {
        self.slots.lock().await.remove(&guard.key);
    }
}

impl Default for InflightDedup {
    fn default() -> Self {
        Self::new()
    }
}

pub enum DedupRole {
    Leader(DedupGuard),
    Follower(broadcast::Receiver<Arc<Value>>),
}

pub struct DedupGuard {
    key: String,
    sender: broadcast::Sender<Arc<Value>>,
}

/// Request dedup key: `method:path:ip`.
pub fn dedup_key(method: &str, path: &str, ip: &str) -> String {
    format!("{}:{}:{}", method, path, ip)
}

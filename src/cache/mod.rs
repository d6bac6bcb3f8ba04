use std::{collections::HashMap, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{sync::RwLock, time::Instant};
use tracing::warn;
use uuid::Uuid;

use crate::jobs::JobStatus;

const CACHE_KEY_PREFIX: &str = "summary:";

const TTL_ACTIVE: Duration = Duration::from_secs(60);
const TTL_FAILED: Duration = Duration::from_secs(300);
const TTL_COMPLETED: Duration = Duration::from_secs(3600);

pub fn cache_key(document_id: Uuid) -> String {
    format!("{CACHE_KEY_PREFIX}{document_id}")
}

/// TTL table keyed by job status. Callers never pick a TTL directly, so an
/// in-flight job can only ever be cached for the short window.
pub fn ttl_for_status(status: JobStatus) -> Duration {
    match status {
        JobStatus::Pending | JobStatus::Processing => TTL_ACTIVE,
        JobStatus::Failed => TTL_FAILED,
        JobStatus::Completed => TTL_COMPLETED,
    }
}

/// Transient projection of a summary job, serialized as JSON under
/// `"summary:" + document_id`. Derived state only; durable storage stays
/// the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    /// Human-readable failure message, e.g. the computed chunk count and
    /// ceiling for an oversized document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl CacheEntry {
    pub fn ttl(&self) -> Duration {
        ttl_for_status(self.status)
    }
}

/// Key-value store seam for the status cache.
#[async_trait]
pub trait StatusCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    async fn invalidate(&self, key: &str);
}

/// Best-effort write. The cache is an optimization, so store failures are
/// logged and swallowed rather than surfaced to the caller.
pub async fn store_entry(cache: &dyn StatusCache, entry: &CacheEntry) {
    let key = cache_key(entry.job_id);
    match serde_json::to_string(entry) {
        Ok(raw) => {
            if let Err(err) = cache.put(&key, raw, entry.ttl()).await {
                warn!(?err, job_id = %entry.job_id, "failed to store status cache entry");
            }
        }
        Err(err) => {
            warn!(?err, job_id = %entry.job_id, "failed to serialize status cache entry");
        }
    }
}

/// Read-through lookup. A corrupt entry is treated as a miss so the caller
/// falls back to durable storage and rewrites it.
pub async fn load_entry(cache: &dyn StatusCache, document_id: Uuid) -> Option<CacheEntry> {
    let raw = cache.get(&cache_key(document_id)).await?;
    serde_json::from_str(&raw).ok()
}

pub async fn invalidate_entry(cache: &dyn StatusCache, document_id: Uuid) {
    cache.invalidate(&cache_key(document_id)).await;
}

/// Process-wide in-memory cache with deadline-based expiry. Writes are
/// last-write-wins snapshots, so no coordination beyond the lock is needed.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (Instant, String)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let expired = {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((deadline, value)) if *deadline > Instant::now() => {
                    return Some(value.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            self.entries.write().await.remove(key);
        }
        None
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), (Instant::now() + ttl, value));
        Ok(())
    }

    async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

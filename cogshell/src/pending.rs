//! Pending auto-debug request store.
//!
//! When a session fails, the failure context is parked here under a fresh
//! opaque id and the id is announced to the client. A later follow-up call
//! consumes the entry with [`PendingRequestStore::pop`]. Consumption is atomic:
//! however many callers race on the same id, exactly one receives the payload.
//!
//! Entries never expire unless the store was built with a TTL. With a TTL,
//! expired entries are rejected lazily on `pop` and can be swept in the
//! background with [`PendingRequestStore::start_background_sweeper`].

use crate::{error::StoreError, utils::time};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::HashMap,
    fmt,
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};
use tokio::sync::RwLock;

/// Default payload: a JSON object of failure context.
pub type JsonMap = serde_json::Map<String, Value>;

/// Opaque identifier of a pending request (UUID v4 string form).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A parked failure context.
#[derive(Debug, Clone)]
pub struct PendingDebugRequest<P> {
    pub id: RequestId,
    pub payload: P,
    pub registered_at: SystemTime,
    registered: Instant,
}

impl<P> PendingDebugRequest<P> {
    fn is_expired(&self, ttl: Option<Duration>, now: Instant) -> bool {
        ttl.is_some_and(|ttl| now.duration_since(self.registered) >= ttl)
    }
}

/// Dashboard view of a pending entry, without its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequestInfo {
    pub id: RequestId,
    #[serde(with = "time")]
    pub registered_at: SystemTime,
    #[serde(with = "time::option", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<SystemTime>,
}

/// In-memory, single-consumption correlation table.
#[derive(Debug)]
pub struct PendingRequestStore<P = JsonMap> {
    entries: RwLock<HashMap<RequestId, PendingDebugRequest<P>>>,
    ttl: Option<Duration>,
}

impl<P> PendingRequestStore<P> {
    /// Store whose entries live until consumed.
    pub fn new() -> Self {
        Self::with_ttl(None)
    }

    /// Store whose entries expire `ttl` after registration, when set.
    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Park `payload` under a fresh id.
    pub async fn put(&self, payload: P) -> RequestId {
        let id = RequestId::generate();
        let entry = PendingDebugRequest {
            id: id.clone(),
            payload,
            registered_at: SystemTime::now(),
            registered: Instant::now(),
        };
        let mut entries = self.entries.write().await;
        entries.insert(id.clone(), entry);
        tracing::info!(
            "Stored auto-debug request {} ({} pending)",
            id,
            entries.len()
        );
        id
    }

    /// Take the payload for `id`. The first successful call wins; every later
    /// call for the same id reports `NotFound`.
    pub async fn pop(&self, id: Option<&str>) -> Result<P, StoreError> {
        let Some(id) = id else {
            tracing::error!("Received auto-debug request with no request_id");
            return Err(StoreError::MissingId);
        };

        let key = RequestId(id.to_string());
        let entry = self.entries.write().await.remove(&key);
        match entry {
            Some(entry) if entry.is_expired(self.ttl, Instant::now()) => {
                tracing::warn!("Auto-debug request {} expired before it was consumed", id);
                Err(StoreError::NotFound { id: id.to_string() })
            }
            Some(entry) => {
                tracing::debug!("Consumed auto-debug request {}", id);
                Ok(entry.payload)
            }
            None => {
                tracing::error!("Auto-debug request {} not found", id);
                Err(StoreError::NotFound { id: id.to_string() })
            }
        }
    }

    /// Orchestrator-facing alias for [`PendingRequestStore::put`].
    pub async fn register(&self, payload: P) -> RequestId {
        self.put(payload).await
    }

    /// Orchestrator-facing alias for [`PendingRequestStore::pop`].
    pub async fn resolve(&self, id: Option<&str>) -> Result<P, StoreError> {
        self.pop(id).await
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Ids and registration times of all entries, oldest first.
    pub async fn pending(&self) -> Vec<PendingRequestInfo> {
        let entries = self.entries.read().await;
        let mut infos: Vec<PendingRequestInfo> = entries
            .values()
            .map(|entry| PendingRequestInfo {
                id: entry.id.clone(),
                registered_at: entry.registered_at,
                expires_at: self.ttl.map(|ttl| entry.registered_at + ttl),
            })
            .collect();
        infos.sort_by_key(|info| info.registered_at);
        infos
    }

    /// Drop expired entries and return how many were removed. No-op without a TTL.
    pub async fn purge_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(self.ttl, now));
        let purged = before - entries.len();
        if purged > 0 {
            tracing::info!("Purged {} expired auto-debug requests", purged);
        }
        purged
    }
}

impl<P: Send + Sync + 'static> PendingRequestStore<P> {
    /// Starts a background task that periodically purges expired entries.
    ///
    /// The task holds only a weak reference and stops once the store is dropped.
    /// Does nothing for a store without a TTL.
    pub fn start_background_sweeper(store: Arc<Self>, interval: Duration) {
        if store.ttl.is_none() {
            return;
        }
        let weak_store = Arc::downgrade(&store);
        drop(store);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Some(store) = weak_store.upgrade() {
                    store.purge_expired().await;
                } else {
                    tracing::debug!("PendingRequestStore dropped, stopping background sweeper");
                    break;
                }
            }
        });
    }
}

impl<P> Default for PendingRequestStore<P> {
    fn default() -> Self {
        Self::new()
    }
}

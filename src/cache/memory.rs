//! In-process TTL store.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::CacheStore;
use crate::BoxFuture;

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// A [`CacheStore`] held in process memory.
///
/// An entry past its deadline is dropped when it is read, and every write
/// sweeps all expired entries, so the map only ever holds what was written
/// within the last TTL. Used when no Redis URL is configured, and as the fake
/// store in tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl CacheStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Value>> {
        Box::pin(async move {
            let now = Instant::now();
            let mut entries = self.entries.lock().await;
            let live = entries
                .get(key)
                .filter(|e| e.expires_at > now)
                .map(|e| e.value.clone());
            if live.is_none() {
                entries.remove(key);
            }
            live
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: Value, ttl: Duration) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let now = Instant::now();
            let mut entries = self.entries.lock().await;
            entries.retain(|_, e| e.expires_at > now);
            entries.insert(
                key.to_owned(),
                Entry {
                    value,
                    expires_at: now + ttl,
                },
            );
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.entries.lock().await.remove(key);
        })
    }

    fn clear(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.entries.lock().await.clear();
        })
    }
}

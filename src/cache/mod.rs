//! Response caching: the [`CacheStore`] seam, its Redis and in-memory
//! backends, and the [`ResponseCache`] middleware that memoizes JSON GET
//! responses by request target.
//!
//! A cache failure never fails a request: stores log and degrade to misses
//! and no-op writes.

use std::sync::Arc;

use thiserror::Error;

use crate::config::CacheConfig;

pub mod memory;
pub mod middleware;
pub mod redis;
pub mod store;

pub use memory::MemoryStore;
pub use middleware::{CacheOptions, ResponseCache};
pub use redis::RedisStore;
pub use store::CacheStore;

/// Failures inside a store backend. These never cross the [`CacheStore`]
/// boundary; backends log them and degrade.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("cache backend unavailable")]
    Unavailable,

    #[error("cache operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("cache payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Opens the store described by `config`: Redis when a URL is set, an
/// in-process [`MemoryStore`] otherwise.
///
/// # Errors
///
/// [`CacheError::Redis`] when the Redis URL cannot be parsed. An unreachable
/// server is not an error here; the store degrades at call time.
pub fn open_store(config: &CacheConfig) -> Result<Arc<dyn CacheStore>, CacheError> {
    match &config.redis_url {
        Some(url) => {
            tracing::info!("using redis response cache");
            Ok(Arc::new(RedisStore::connect(url, config.op_timeout)?))
        }
        None => {
            tracing::info!("REDIS_URL not set, using in-memory response cache");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

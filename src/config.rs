//! Runtime configuration read from environment variables.
//!
//! | Variable              | Default          | Meaning                                  |
//! |-----------------------|------------------|------------------------------------------|
//! | `PETAL_BIND_ADDR`     | `127.0.0.1:8080` | address the server listens on            |
//! | `REDIS_URL`           | unset            | Redis for the response cache; unset uses memory |
//! | `CACHE_TTL_SECS`      | `3600`           | lifetime of cached responses             |
//! | `CACHE_OP_TIMEOUT_MS` | `250`            | per-operation Redis timeout              |

use std::time::Duration;

use thiserror::Error;

use crate::cache::CacheOptions;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: expected a non-negative integer")]
    Invalid { key: &'static str, value: String },
}

/// Response cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub redis_url: Option<String>,
    pub ttl: Duration,
    pub op_timeout: Duration,
}

impl CacheConfig {
    pub fn options(&self) -> CacheOptions {
        CacheOptions { ttl: self.ttl }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            ttl: CacheOptions::DEFAULT_TTL,
            op_timeout: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    pub cache: CacheConfig,
}

impl AppConfig {
    pub const DEFAULT_BIND_ADDR: &'static str = "127.0.0.1:8080";

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = CacheConfig::default();

        let ttl = match var("CACHE_TTL_SECS") {
            Some(v) => Duration::from_secs(parse_u64("CACHE_TTL_SECS", &v)?),
            None => defaults.ttl,
        };
        let op_timeout = match var("CACHE_OP_TIMEOUT_MS") {
            Some(v) => Duration::from_millis(parse_u64("CACHE_OP_TIMEOUT_MS", &v)?),
            None => defaults.op_timeout,
        };

        Ok(Self {
            bind_addr: var("PETAL_BIND_ADDR").unwrap_or_else(|| Self::DEFAULT_BIND_ADDR.to_owned()),
            cache: CacheConfig {
                redis_url: var("REDIS_URL"),
                ttl,
                op_timeout,
            },
        })
    }
}

fn parse_u64(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_owned(),
    })
}

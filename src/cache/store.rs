//! The narrow interface the response cache talks to.

use std::time::Duration;

use serde_json::Value;

use crate::BoxFuture;

/// A key-value store with per-entry expiry.
///
/// Every operation is infallible from the caller's point of view: when the
/// backing connection is unavailable, `get` returns `None` and the other
/// operations do nothing, after logging the condition. Keys are independent;
/// no ordering or atomicity is promised across them.
pub trait CacheStore: Send + Sync {
    /// Returns the live value for `key`, or `None` if absent, expired,
    /// unreadable, or the store is down.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Value>>;

    /// Stores `value` under `key`, replacing any previous value, expiring
    /// after `ttl`.
    fn set<'a>(&'a self, key: &'a str, value: Value, ttl: Duration) -> BoxFuture<'a, ()>;

    /// Removes `key`.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ()>;

    /// Removes every entry.
    fn clear(&self) -> BoxFuture<'_, ()>;
}

//! JSON response caching middleware.
//!
//! [`ResponseCache`] serves repeated GETs from a [`CacheStore`]. The cache key
//! is the request target exactly as received, so `/products?page=1` and
//! `/products?page=2` are cached independently. Mutating verbs bypass the
//! cache entirely.
//!
//! On a miss the request runs downstream; the emitted response is inspected
//! on its way back out and, when it is a JSON payload with a `2xx` status,
//! written to the store on a background task so a slow store never delays
//! the response.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::CacheStore;
use crate::middleware::{Middleware, Next};
use crate::{BoxFuture, Response, StatusCode, context::Context};

/// Response header reporting whether a response was served from the cache.
pub const CACHE_STATUS_HEADER: &str = "X-Cache";

/// Tuning for [`ResponseCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Lifetime of each cached response.
    pub ttl: Duration,
}

impl CacheOptions {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

    pub fn with_ttl_secs(secs: u64) -> Self {
        Self {
            ttl: Duration::from_secs(secs),
        }
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: Self::DEFAULT_TTL,
        }
    }
}

/// Middleware that memoizes successful JSON responses by request target.
///
/// | Request                         | Store read | Store write            | Downstream |
/// |---------------------------------|------------|------------------------|------------|
/// | POST / PUT / PATCH / DELETE     | no         | no                     | yes        |
/// | other verb, key cached          | yes        | no                     | no         |
/// | other verb, key not cached      | yes        | if 2xx JSON response   | yes        |
///
/// A hit is answered with `200 OK` and the stored payload as JSON. `HEAD`
/// shares its key with `GET`; the server leaves the body off the wire.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use petal::cache::{CacheOptions, MemoryStore, ResponseCache};
///
/// let cache = ResponseCache::new(Arc::new(MemoryStore::new()), CacheOptions::with_ttl_secs(300));
/// ```
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    options: CacheOptions,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, options: CacheOptions) -> Self {
        Self { store, options }
    }
}

impl Middleware for ResponseCache {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, Response> {
        if ctx.request().method().is_mutating() {
            return Box::pin(next.run(ctx));
        }

        let store = Arc::clone(&self.store);
        let ttl = self.options.ttl;

        Box::pin(async move {
            let key = ctx.request().target().to_owned();

            if let Some(payload) = store.get(&key).await {
                debug!(key = %key, "response cache hit");
                let mut response = Response::json(StatusCode::Ok, &payload);
                response.set_header(CACHE_STATUS_HEADER, "HIT");
                return response;
            }

            debug!(key = %key, "response cache miss");
            let mut response = next.run(ctx).await;
            store_emitted(&store, key, &response, ttl);
            response.set_header(CACHE_STATUS_HEADER, "MISS");
            response
        })
    }
}

// Queues a write of `response`'s JSON payload when it is cacheable. The
// write is detached from the request; its outcome is only logged.
fn store_emitted(store: &Arc<dyn CacheStore>, key: String, response: &Response, ttl: Duration) {
    if !response.status().is_success() {
        return;
    }
    let Some(payload) = response.json_payload() else {
        return;
    };

    let store = Arc::clone(store);
    tokio::spawn(async move {
        store.set(&key, payload, ttl).await;
        debug!(key = %key, ttl_secs = ttl.as_secs(), "response cached");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::middleware::Pipeline;
    use crate::{Method, Request, Router};
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // MemoryStore that counts traffic and remembers the last TTL it was given.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        gets: AtomicUsize,
        sets: AtomicUsize,
        last_ttl: Mutex<Option<Duration>>,
    }

    impl CacheStore for CountingStore {
        fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Value>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key)
        }

        fn set<'a>(&'a self, key: &'a str, value: Value, ttl: Duration) -> BoxFuture<'a, ()> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            *self.last_ttl.lock().unwrap() = Some(ttl);
            self.inner.set(key, value, ttl)
        }

        fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ()> {
            self.inner.delete(key)
        }

        fn clear(&self) -> BoxFuture<'_, ()> {
            self.inner.clear()
        }
    }

    struct Fixture {
        store: Arc<CountingStore>,
        hits: Arc<AtomicUsize>,
        pipeline: Pipeline,
    }

    // Every route answers with `status` and `{"path": <target>}`; the
    // `/text` route answers with a plain-text body.
    fn fixture(status: StatusCode, options: CacheOptions) -> Fixture {
        let store = Arc::new(CountingStore::default());
        let hits = Arc::new(AtomicUsize::new(0));

        let mut router = Router::new();
        for method in [Method::Get, Method::Head, Method::Post, Method::Put, Method::Patch, Method::Delete] {
            let hits = Arc::clone(&hits);
            router.add_route(method, "/products", move |ctx: Context| {
                hits.fetch_add(1, Ordering::SeqCst);
                let target = ctx.request().target().to_owned();
                async move { Response::json(status, &json!({ "path": target })) }
            });
        }
        let text_hits = Arc::clone(&hits);
        router.get("/text", move |_ctx| {
            text_hits.fetch_add(1, Ordering::SeqCst);
            async { Response::new(StatusCode::Ok).body("plain") }
        });

        let pipeline = Pipeline::builder(router)
            .layer(ResponseCache::new(store.clone(), options))
            .build();
        Fixture { store, hits, pipeline }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    async fn wait_for_sets(store: &CountingStore, n: usize) {
        for _ in 0..100 {
            if store.sets.load(Ordering::SeqCst) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("store never saw {n} writes");
    }

    fn get(target: &str) -> Request {
        Request::new(Method::Get, target)
    }

    #[test]
    fn default_ttl_is_one_hour() {
        assert_eq!(CacheOptions::default().ttl, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn mutating_verbs_never_touch_the_store() {
        let f = fixture(StatusCode::Ok, CacheOptions::default());
        for method in [Method::Post, Method::Put, Method::Patch, Method::Delete] {
            let res = f.pipeline.handle(Request::new(method, "/products")).await;
            assert_eq!(res.status(), StatusCode::Ok);
            assert!(res.headers().get(CACHE_STATUS_HEADER).is_none());
        }
        settle().await;
        assert_eq!(f.hits.load(Ordering::SeqCst), 4);
        assert_eq!(f.store.gets.load(Ordering::SeqCst), 0);
        assert_eq!(f.store.sets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn miss_writes_once_then_hit_skips_handler() {
        let f = fixture(StatusCode::Ok, CacheOptions::default());

        let first = f.pipeline.handle(get("/products?page=1")).await;
        assert_eq!(first.status(), StatusCode::Ok);
        assert_eq!(first.headers().get(CACHE_STATUS_HEADER), Some("MISS"));
        assert_eq!(f.hits.load(Ordering::SeqCst), 1);

        wait_for_sets(&f.store, 1).await;
        assert_eq!(
            f.store.inner.get("/products?page=1").await,
            Some(json!({ "path": "/products?page=1" }))
        );

        let second = f.pipeline.handle(get("/products?page=1")).await;
        assert_eq!(second.status(), StatusCode::Ok);
        assert_eq!(second.headers().get(CACHE_STATUS_HEADER), Some("HIT"));
        assert_eq!(second.json_payload(), first.json_payload());
        assert_eq!(f.hits.load(Ordering::SeqCst), 1);

        settle().await;
        assert_eq!(f.store.sets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn query_string_is_part_of_the_key() {
        let f = fixture(StatusCode::Ok, CacheOptions::default());
        f.pipeline.handle(get("/products?page=1")).await;
        wait_for_sets(&f.store, 1).await;

        let res = f.pipeline.handle(get("/products?page=2")).await;
        assert_eq!(res.headers().get(CACHE_STATUS_HEADER), Some("MISS"));
        assert_eq!(f.hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_success_status_is_not_cached() {
        for status in [StatusCode::NotFound, StatusCode::NotModified, StatusCode::InternalServerError] {
            let f = fixture(status, CacheOptions::default());
            f.pipeline.handle(get("/products")).await;
            f.pipeline.handle(get("/products")).await;
            settle().await;
            assert_eq!(f.store.sets.load(Ordering::SeqCst), 0, "{status}");
            assert_eq!(f.hits.load(Ordering::SeqCst), 2, "{status}");
        }
    }

    #[tokio::test]
    async fn any_2xx_is_cached_and_replayed_as_200() {
        let f = fixture(StatusCode::Created, CacheOptions::default());
        let first = f.pipeline.handle(get("/products")).await;
        assert_eq!(first.status(), StatusCode::Created);
        wait_for_sets(&f.store, 1).await;

        let second = f.pipeline.handle(get("/products")).await;
        assert_eq!(second.status(), StatusCode::Ok);
        assert_eq!(f.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_json_bodies_are_not_cached() {
        let f = fixture(StatusCode::Ok, CacheOptions::default());
        let res = f.pipeline.handle(get("/text")).await;
        assert_eq!(res.body_ref(), b"plain");
        settle().await;
        assert_eq!(f.store.sets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_mutating_verbs_other_than_get_are_cached() {
        let f = fixture(StatusCode::Ok, CacheOptions::default());
        f.pipeline.handle(Request::new(Method::Head, "/products")).await;
        wait_for_sets(&f.store, 1).await;
        assert_eq!(f.store.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn head_after_get_is_a_hit_on_the_same_entry() {
        let f = fixture(StatusCode::Ok, CacheOptions::default());
        let get_res = f.pipeline.handle(get("/products?page=3")).await;
        wait_for_sets(&f.store, 1).await;

        let head = f.pipeline.handle(Request::new(Method::Head, "/products?page=3")).await;
        assert_eq!(head.status(), StatusCode::Ok);
        assert_eq!(head.headers().get(CACHE_STATUS_HEADER), Some("HIT"));
        assert_eq!(head.json_payload(), get_res.json_payload());
        assert_eq!(f.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn configured_ttl_reaches_the_store() {
        let f = fixture(StatusCode::Ok, CacheOptions::with_ttl_secs(120));
        f.pipeline.handle(get("/products")).await;
        wait_for_sets(&f.store, 1).await;
        assert_eq!(*f.store.last_ttl.lock().unwrap(), Some(Duration::from_secs(120)));
    }
}

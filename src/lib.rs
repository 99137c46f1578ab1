//! # petal
//!
//! Async HTTP/1.1 backend core for the flower-shop storefront: a TCP server,
//! a composable middleware pipeline, a router, and a JSON response cache
//! backed by Redis.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use petal::cache::{CacheOptions, MemoryStore, ResponseCache};
//! use petal::middleware::Pipeline;
//! use petal::{Response, Router, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router.get("/products", |_ctx| async {
//!         Response::json(StatusCode::Ok, &serde_json::json!({ "items": [] }))
//!     });
//!
//!     let store = Arc::new(MemoryStore::new());
//!     let pipeline = Pipeline::builder(router)
//!         .layer(ResponseCache::new(store, CacheOptions::default()))
//!         .build();
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server.run(move |req| {
//!         let pipeline = pipeline.clone();
//!         async move { pipeline.handle(req).await }
//!     }).await?;
//!     Ok(())
//! }
//! ```

use std::{future::Future, pin::Pin};

pub mod cache;
pub mod config;
pub mod context;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod router;
pub mod server;

/// A pinned, boxed, `Send` future. The return type of every type-erased
/// async seam in the crate (middleware, handlers, cache stores).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};

//! Middleware pipeline: composable before/after request handler logic.
//!
//! Each middleware wraps the next layer, so it can inspect the request,
//! short-circuit with its own response, or decorate the response coming back
//! from downstream. The chain always ends at an endpoint, normally a
//! [`Router`].
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to advance.
//! - [`Pipeline`]: an immutable, cheaply-cloneable chain plus endpoint that
//!   turns a [`Request`] into a [`Response`].
//! - [`LoggerMiddleware`]: built-in request/response logger.

use std::sync::Arc;
use tokio::time::Instant;

use crate::{BoxFuture, Request, Response, Router, context::Context};

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> BoxFuture<'static, Response> + Send + Sync>;

/// The terminal handler of a chain.
pub type Endpoint = Arc<dyn Fn(Context) -> BoxFuture<'static, Response> + Send + Sync>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a middleware can forward a
/// request at most once.
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    // Position of the middleware the next `run` call invokes.
    index: usize,
    endpoint: Endpoint,
}

impl Next {
    /// Creates a cursor positioned at the start of `middlewares`.
    pub fn new(middlewares: Arc<[MiddlewareHandler]>, endpoint: Endpoint) -> Self {
        Self {
            middlewares,
            index: 0,
            endpoint,
        }
    }

    /// Invokes the next middleware, or the endpoint once the chain is exhausted.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.middlewares.get(self.index) {
            Some(handler) => {
                let handler = Arc::clone(handler);
                self.index += 1;
                handler(ctx, self).await
            }
            None => (self.endpoint)(ctx).await,
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors may:
///
/// - **Pass through**: `next.run(ctx).await` unchanged.
/// - **Short-circuit**: return a [`Response`] without calling `next`.
/// - **Decorate**: call `next.run(ctx).await`, inspect the response, and
///   return it (possibly modified).
///
/// Middleware is shared across tokio tasks, hence `Send + Sync` and a
/// `'static`, `Send` future.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, Response>;
}

/// An ordered middleware chain ending at an endpoint.
///
/// Built once at startup with [`Pipeline::builder`]; cloning shares the chain.
///
/// # Examples
///
/// ```rust
/// use petal::middleware::{LoggerMiddleware, Pipeline};
/// use petal::{Method, Request, Response, Router, StatusCode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut router = Router::new();
/// router.get("/health", |_ctx| async { Response::new(StatusCode::NoContent) });
///
/// let pipeline = Pipeline::builder(router).layer(LoggerMiddleware).build();
/// let response = pipeline.handle(Request::new(Method::Get, "/health")).await;
/// assert_eq!(response.status(), StatusCode::NoContent);
/// # }
/// ```
#[derive(Clone)]
pub struct Pipeline {
    middlewares: Arc<[MiddlewareHandler]>,
    endpoint: Endpoint,
}

impl Pipeline {
    /// Starts a pipeline whose endpoint dispatches through `router`.
    pub fn builder(router: Router) -> PipelineBuilder {
        let router = Arc::new(router);
        let endpoint: Endpoint = Arc::new(move |ctx: Context| -> BoxFuture<'static, Response> {
            let router = Arc::clone(&router);
            Box::pin(async move { router.dispatch(ctx).await })
        });
        PipelineBuilder {
            middlewares: Vec::new(),
            endpoint,
        }
    }

    /// Runs `request` through the chain and returns the response.
    pub async fn handle(&self, request: Request) -> Response {
        Next::new(Arc::clone(&self.middlewares), Arc::clone(&self.endpoint))
            .run(Context::new(request))
            .await
    }
}

/// Collects middleware in call order: the first layer added sees the request first.
pub struct PipelineBuilder {
    middlewares: Vec<MiddlewareHandler>,
    endpoint: Endpoint,
}

impl PipelineBuilder {
    #[must_use]
    pub fn layer<M>(mut self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.middlewares.push(from_middleware(Arc::new(middleware)));
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            middlewares: self.middlewares.into(),
            endpoint: self.endpoint,
        }
    }
}

/// Logs each request's method, target, status, and duration at `info`.
///
/// ```text
/// GET /products?page=1 - 200 (1.2ms)
/// ```
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, Response> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().to_string();
            let target = ctx.request().target().to_owned();

            let response = next.run(ctx).await;

            tracing::info!(
                "{} {} - {} ({:?})",
                method,
                target,
                response.status().as_u16(),
                start.elapsed()
            );

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Method, StatusCode};
    use std::sync::Mutex;

    // Records its tag on the way in and on the way out.
    struct Trace {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for Trace {
        fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, Response> {
            let tag = self.tag;
            let log = Arc::clone(&self.log);
            Box::pin(async move {
                log.lock().unwrap().push(format!("{tag}>"));
                let response = next.run(ctx).await;
                log.lock().unwrap().push(format!("<{tag}"));
                response
            })
        }
    }

    struct Deny;

    impl Middleware for Deny {
        fn handle(&self, _ctx: Context, _next: Next) -> BoxFuture<'static, Response> {
            Box::pin(async { Response::new(StatusCode::Forbidden) })
        }
    }

    fn router() -> Router {
        let mut router = Router::new();
        router.get("/", |_ctx| async { Response::new(StatusCode::Ok) });
        router
    }

    #[tokio::test]
    async fn layers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder(router())
            .layer(Trace { tag: "a", log: Arc::clone(&log) })
            .layer(Trace { tag: "b", log: Arc::clone(&log) })
            .build();

        let res = pipeline.handle(Request::new(Method::Get, "/")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(*log.lock().unwrap(), vec!["a>", "b>", "<b", "<a"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_endpoint() {
        let pipeline = Pipeline::builder(router()).layer(Deny).build();
        let res = pipeline.handle(Request::new(Method::Get, "/")).await;
        assert_eq!(res.status(), StatusCode::Forbidden);
    }

    #[tokio::test]
    async fn empty_chain_reaches_router() {
        let pipeline = Pipeline::builder(router()).build();
        let res = pipeline.handle(Request::new(Method::Get, "/missing")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }
}

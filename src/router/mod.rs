//! Request routing: map a method and path pattern to a handler.
//!
//! Patterns are either literal (`/categories`) or contain named captures
//! (`/products/:id`). Trailing slashes are ignored on both sides. Routes are
//! tried in registration order and the first match wins; no match is a
//! `404 Not Found`. A `HEAD` request is also served by `GET` routes.

use std::future::Future;
use std::sync::Arc;

use crate::context::{Context, PathParams};
use crate::{BoxFuture, Method, Request, Response, StatusCode};

/// Type-erased async handler.
pub type Handler = Arc<dyn Fn(Context) -> BoxFuture<'static, Response> + Send + Sync>;

/// Conversion trait for async handler functions.
///
/// Implemented for every `Fn(Context) -> impl Future<Output = Response> + Send`
/// that is `Send + Sync + 'static`, so router methods can take plain closures.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> BoxFuture<'static, Response>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<'static, Response> {
        Box::pin((self)(ctx))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Capture(String),
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[derive(Debug, Clone)]
struct Pattern(Vec<Segment>);

impl Pattern {
    fn parse(pattern: &str) -> Self {
        Self(
            segments(pattern)
                .map(|s| match s.strip_prefix(':') {
                    Some(name) => Segment::Capture(name.to_owned()),
                    None => Segment::Literal(s.to_owned()),
                })
                .collect(),
        )
    }

    fn matches(&self, path: &str) -> Option<PathParams> {
        let mut params = PathParams::new();
        let mut parts = segments(path);
        for segment in &self.0 {
            let part = parts.next()?;
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Capture(name) => params.insert(name.as_str(), part),
            }
        }
        if parts.next().is_some() {
            return None;
        }
        Some(params)
    }
}

struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

impl Route {
    fn serves(&self, method: &Method) -> bool {
        self.method == *method || (*method == Method::Head && self.method == Method::Get)
    }
}

/// HTTP request router.
///
/// # Examples
///
/// ```rust
/// use petal::context::Context;
/// use petal::{Router, Response, StatusCode};
///
/// let mut router = Router::new();
/// router.get("/products/:id", |ctx: Context| async move {
///     let id = ctx.params().get("id").unwrap_or_default().to_owned();
///     Response::json(StatusCode::Ok, &serde_json::json!({ "id": id }))
/// });
/// assert_eq!(router.len(), 1);
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Get, path, handler);
    }

    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Post, path, handler);
    }

    pub fn put(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Put, path, handler);
    }

    pub fn patch(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Patch, path, handler);
    }

    pub fn delete(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Delete, path, handler);
    }

    /// Registers `handler` for an arbitrary method.
    pub fn add_route(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(path),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatches a bare request.
    pub async fn route(&self, request: Request) -> Response {
        self.dispatch(Context::new(request)).await
    }

    /// Dispatches `ctx` to the first matching route, filling in its path params.
    pub async fn dispatch(&self, mut ctx: Context) -> Response {
        let matched = self.routes.iter().find_map(|route| {
            if !route.serves(ctx.request().method()) {
                return None;
            }
            route
                .pattern
                .matches(ctx.request().path())
                .map(|params| (Arc::clone(&route.handler), params))
        });

        match matched {
            Some((handler, params)) => {
                ctx.set_params(params);
                handler(ctx).await
            }
            None => Response::new(StatusCode::NotFound),
        }
    }
}

//! Read-only catalog endpoints behind the response cache.
//!
//! ```text
//! cargo run --example cached_catalog
//! curl -i 'http://127.0.0.1:8080/products?page=1'   # X-Cache: MISS
//! curl -i 'http://127.0.0.1:8080/products?page=1'   # X-Cache: HIT
//! ```
//!
//! Set `REDIS_URL=redis://127.0.0.1:6379/0` to cache in Redis instead of memory.

use std::time::Duration;

use petal::cache::{self, ResponseCache};
use petal::config::AppConfig;
use petal::context::Context;
use petal::middleware::{LoggerMiddleware, Pipeline};
use petal::{Response, Router, Server, StatusCode, logging};
use serde::Serialize;

#[derive(Serialize)]
struct Product {
    id: u32,
    name: &'static str,
    category: &'static str,
    price_cents: u32,
}

const PRODUCTS: &[Product] = &[
    Product { id: 1, name: "Red Rose Bouquet", category: "roses", price_cents: 4500 },
    Product { id: 2, name: "White Lily Vase", category: "lilies", price_cents: 3900 },
    Product { id: 3, name: "Tulip Mix", category: "tulips", price_cents: 2900 },
    Product { id: 4, name: "Sunflower Bunch", category: "seasonal", price_cents: 2500 },
];

const PAGE_SIZE: usize = 2;

async fn list_products(ctx: Context) -> Response {
    // Stands in for a slow database query.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let page = ctx
        .request()
        .query_param("page")
        .and_then(|p| p.parse::<usize>().ok())
        .unwrap_or(1)
        .max(1);
    let items: Vec<&Product> = PRODUCTS.iter().skip((page - 1) * PAGE_SIZE).take(PAGE_SIZE).collect();

    Response::json(
        StatusCode::Ok,
        &serde_json::json!({ "page": page, "total": PRODUCTS.len(), "items": items }),
    )
}

async fn show_product(ctx: Context) -> Response {
    let found = ctx
        .params()
        .get("id")
        .and_then(|id| id.parse::<u32>().ok())
        .and_then(|id| PRODUCTS.iter().find(|p| p.id == id));

    match found {
        Some(product) => Response::json(StatusCode::Ok, product),
        None => Response::json(StatusCode::NotFound, &serde_json::json!({ "error": "product not found" })),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init("info,petal=debug")?;
    let config = AppConfig::from_env()?;

    let store = cache::open_store(&config.cache)?;

    let mut router = Router::new();
    router.get("/products", list_products);
    router.get("/products/:id", show_product);

    let pipeline = Pipeline::builder(router)
        .layer(LoggerMiddleware)
        .layer(ResponseCache::new(store, config.cache.options()))
        .build();

    let server = Server::bind(&config.bind_addr).await?;
    server
        .run_until(
            move |req| {
                let pipeline = pipeline.clone();
                async move { pipeline.handle(req).await }
            },
            async {
                let _ = tokio::signal::ctrl_c().await;
            },
        )
        .await?;
    Ok(())
}

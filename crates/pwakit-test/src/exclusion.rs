//! # Exclusion Tests
//!
//! Excluded requests bypass every cache store, for reads and for writes.

use http::{Method, StatusCode};
use pwakit_net::{Request, Response};
use pwakit_sw::{CacheEntry, FetchOutcome, ServiceWorkerHandler};

use crate::{get, test_config, url, Harness};

async fn seed(harness: &Harness, store: &str, path: &str, body: &str) {
    let response = Response::synthesized(StatusCode::OK, "application/json", body.to_string());
    harness
        .caches
        .write()
        .await
        .put(store, CacheEntry::from_response(&url(path), &response))
        .unwrap();
}

/// Test that excluded requests are declined by the worker and reach the network.
#[tokio::test]
async fn test_excluded_requests_pass_through() {
    let harness = Harness::new();
    harness.network.serve("/api/cart", "application/json", r#"{"items":[]}"#);
    let worker = harness.worker(test_config("v1")).unwrap();

    let long_query = format!("/products.html?q={}", "x".repeat(120));
    let excluded = [
        get("/api/cart"),
        get("/admin/index.html"),
        get(&long_query),
        get("https://www.google-analytics.com/collect.js"),
        Request::with_method(Method::POST, url("/index.html")),
    ];

    for request in excluded {
        let target = request.url.clone();
        let outcome = worker.fetch(request).await;
        assert!(matches!(outcome, FetchOutcome::Passthrough), "{target} was handled");
    }

    worker.settle().await;
    assert!(harness.store_names().await.is_empty());
}

/// Test that a cached copy of an excluded URL is never served.
#[tokio::test]
async fn test_excluded_request_ignores_cached_copy() {
    let harness = Harness::new();
    let mut config = test_config("v1");
    config.prewarm_pages = 0;
    let names = config.cache_names();
    seed(&harness, &names.pages, "/api/cart", r#"{"stale":true}"#).await;

    let (container, _events) = harness.container();
    harness.serve_site();
    container.register(harness.worker(config).unwrap()).await.unwrap();

    harness.network.set_offline(true);
    let result = container.handle_fetch(get("/api/cart")).await;
    assert!(result.is_err());

    harness.network.set_offline(false);
    harness.network.serve("/api/cart", "application/json", r#"{"fresh":true}"#);
    let response = container.handle_fetch(get("/api/cart")).await.unwrap();
    assert_eq!(response.text(), r#"{"fresh":true}"#);

    container.settle().await;
    assert_eq!(harness.keys(&names.pages).await, vec![url("/api/cart").to_string()]);
    let storage = harness.caches.read().await;
    let entry = storage.get(&names.pages).unwrap().get(url("/api/cart").as_str()).unwrap();
    assert_eq!(entry.body.as_ref(), br#"{"stale":true}"#);
}

/// Test that prefetching an excluded page is refused without a fetch.
#[tokio::test]
async fn test_prefetch_skips_excluded_page() {
    let harness = Harness::new();
    let worker = harness.worker(test_config("v1")).unwrap();

    assert!(!worker.lifecycle().prefetch_page(&url("/dashboard/stats.html")).await);
    assert!(harness.network.requests().is_empty());
}

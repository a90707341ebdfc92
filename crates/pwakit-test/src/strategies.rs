//! # Strategy Tests
//!
//! Network-first, cache-first, stale-while-revalidate and the default
//! network-only path, driven through a real worker.

use std::time::Duration;

use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderValue, StatusCode};
use pwakit_net::{Response, ResponseSource};
use pwakit_sw::{CacheEntry, FetchOutcome, ServiceWorkerHandler};

use crate::{get, navigate, test_config, url, Harness};

async fn seed(harness: &Harness, store: &str, path: &str, content_type: &str, body: &str) {
    let response = Response::synthesized(StatusCode::OK, content_type, body.to_string());
    harness
        .caches
        .write()
        .await
        .put(store, CacheEntry::from_response(&url(path), &response))
        .unwrap();
}

fn respond(outcome: FetchOutcome) -> Response {
    match outcome {
        FetchOutcome::Respond(response) => response,
        FetchOutcome::Passthrough => panic!("request was not handled"),
    }
}

/// Test that a successful network-first fetch is served as-is and written through.
#[tokio::test]
async fn test_network_first_serves_network_and_writes_through() {
    let harness = Harness::new();
    harness
        .network
        .serve("/offers.html", "text/html", "<html><body>today's offers</body></html>");
    let config = test_config("v1");
    let pages = config.cache_names().pages;
    let worker = harness.worker(config).unwrap();

    let response = respond(worker.fetch(navigate("/offers.html")).await);
    assert_eq!(response.text(), "<html><body>today's offers</body></html>");
    assert_eq!(response.source, ResponseSource::Network);

    worker.settle().await;
    assert_eq!(harness.keys(&pages).await, vec![url("/offers.html").to_string()]);
}

/// Test that network-first falls back to the cached copy when the network fails.
#[tokio::test]
async fn test_network_first_falls_back_to_cache() {
    let harness = Harness::new();
    let config = test_config("v1");
    seed(&harness, &config.cache_names().pages, "/help.html", "text/html", "cached help").await;
    harness.network.fail("/help.html");
    let worker = harness.worker(config).unwrap();

    let response = respond(worker.fetch(navigate("/help.html")).await);
    assert_eq!(response.text(), "cached help");
    assert_eq!(response.source, ResponseSource::Cache);
}

/// Test that storing the same key twice keeps one entry holding the second body.
#[tokio::test]
async fn test_repeated_put_keeps_single_entry() {
    let harness = Harness::new();
    let config = test_config("v1");
    let pages = config.cache_names().pages;
    let worker = harness.worker(config).unwrap();

    harness.network.serve("/offers.html", "text/html", "first");
    respond(worker.fetch(navigate("/offers.html")).await);
    worker.settle().await;

    harness.network.serve("/offers.html", "text/html", "second");
    respond(worker.fetch(navigate("/offers.html")).await);
    worker.settle().await;

    let storage = harness.caches.read().await;
    let cache = storage.get(&pages).unwrap();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get(url("/offers.html").as_str()).unwrap().body.as_ref(), b"second");
}

/// Test that a cache-first hit does not wait for the network.
#[tokio::test]
async fn test_cache_first_hit_returns_before_network() {
    let harness = Harness::new();
    let config = test_config("v1");
    seed(&harness, &config.cache_names().assets, "/js/app.js", "application/javascript", "cached()").await;
    harness
        .network
        .serve_delayed("/js/app.js", "application/javascript", "fresh()", Duration::from_secs(30));
    let worker = harness.worker(config).unwrap();

    let response = tokio::time::timeout(Duration::from_secs(2), worker.fetch(get("/js/app.js")))
        .await
        .expect("cache hit must not block on the network");
    let response = respond(response);

    assert_eq!(response.text(), "cached()");
    assert_eq!(response.source, ResponseSource::Cache);
}

/// Test that a cache-first hit is refreshed in the background.
#[tokio::test]
async fn test_cache_first_revalidates_in_background() {
    let harness = Harness::new();
    let config = test_config("v1");
    let assets = config.cache_names().assets;
    seed(&harness, &assets, "/css/theme.css", "text/css", "old").await;
    harness.network.serve("/css/theme.css", "text/css", "new");
    let worker = harness.worker(config).unwrap();

    let response = respond(worker.fetch(get("/css/theme.css")).await);
    assert_eq!(response.text(), "old");

    worker.settle().await;
    let storage = harness.caches.read().await;
    let entry = storage.get(&assets).unwrap().get(url("/css/theme.css").as_str()).unwrap();
    assert_eq!(entry.body.as_ref(), b"new");
    assert_eq!(harness.network.request_count("/css/theme.css"), 1);
}

/// Test that missing stylesheets and scripts degrade to typed empty bodies.
#[tokio::test]
async fn test_cache_first_miss_offline_placeholders() {
    let harness = Harness::new();
    harness.network.set_offline(true);
    let worker = harness.worker(test_config("v1")).unwrap();

    let css = respond(worker.fetch(get("/css/theme.css")).await);
    assert_eq!(css.status, StatusCode::OK);
    assert_eq!(css.headers.get(CONTENT_TYPE).unwrap(), "text/css");
    assert!(css.body.is_empty());

    let js = respond(worker.fetch(get("/js/app.js")).await);
    assert_eq!(js.status, StatusCode::OK);
    assert_eq!(js.headers.get(CONTENT_TYPE).unwrap(), "application/javascript");
}

/// Test that an error status on a cache-first miss is replaced by a typed placeholder.
#[tokio::test]
async fn test_cache_first_miss_error_status_placeholder() {
    let harness = Harness::new();
    harness
        .network
        .serve_status("/css/theme.css", StatusCode::NOT_FOUND, "text/html", "<h1>404</h1>");
    let config = test_config("v1");
    let assets = config.cache_names().assets;
    let worker = harness.worker(config).unwrap();

    let css = respond(worker.fetch(get("/css/theme.css")).await);
    assert_eq!(css.status, StatusCode::OK);
    assert_eq!(css.headers.get(CONTENT_TYPE).unwrap(), "text/css");
    assert!(css.body.is_empty());

    worker.settle().await;
    assert!(harness.keys(&assets).await.is_empty());
}

/// Test that image lookups ignore the query string.
#[tokio::test]
async fn test_stale_while_revalidate_ignores_query() {
    let harness = Harness::new();
    let mut config = test_config("v1");
    config.timeouts.image_revalidate_delay_ms = 200;
    let images = config.cache_names().images;
    seed(&harness, &images, "/img/banner.png?v=1", "image/png", "banner-v1").await;
    harness.network.set_offline(true);
    let worker = harness.worker(config).unwrap();

    let first = respond(worker.fetch(get("/img/banner.png?v=2")).await);
    let second = respond(worker.fetch(get("/img/banner.png")).await);
    assert_eq!(first.text(), "banner-v1");
    assert_eq!(second.text(), "banner-v1");

    worker.settle().await;
    // Only the stored key is revalidated, once, with image headers.
    let requests = harness.network.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, url("/img/banner.png?v=1"));
    assert_eq!(
        requests[0].headers.get(ACCEPT),
        Some(&HeaderValue::from_static("image/webp,image/apng,image/*,*/*;q=0.8"))
    );
    assert_eq!(harness.keys(&images).await, vec![url("/img/banner.png?v=1").to_string()]);
}

/// Test that third-party share links are fetched and stored at the sized URL.
#[tokio::test]
async fn test_stale_while_revalidate_rewrites_drive_links() {
    let harness = Harness::new();
    let sized = "https://drive.google.com/uc?export=view&id=abc123&w=800&h=600&fit=crop";
    harness.network.serve(sized, "image/jpeg", "jpeg-bytes");
    let config = test_config("v1");
    let images = config.cache_names().images;
    let worker = harness.worker(config).unwrap();

    let request = get("https://drive.google.com/file/d/abc123/view").header(ACCEPT, HeaderValue::from_static("image/*"));
    let response = respond(worker.fetch(request).await);
    assert_eq!(response.text(), "jpeg-bytes");

    worker.settle().await;
    assert_eq!(harness.network.request_count(sized), 1);
    assert_eq!(harness.keys(&images).await, vec![sized.to_string()]);
}

/// Test that the image store never holds more than its limit, oldest dropped first.
#[tokio::test]
async fn test_image_store_evicts_oldest() {
    let harness = Harness::new();
    let mut config = test_config("v1");
    config.limits.max_images = 3;
    let images = config.cache_names().images;
    let paths: Vec<String> = (1..=5).map(|i| format!("/img/product-{i}.png")).collect();
    for path in &paths {
        harness.network.serve(path, "image/png", format!("png-{path}"));
    }
    let worker = harness.worker(config).unwrap();

    for path in &paths {
        respond(worker.fetch(get(path)).await);
    }
    worker.settle().await;

    let expected: Vec<String> = paths[2..].iter().map(|p| url(p).to_string()).collect();
    assert_eq!(harness.keys(&images).await, expected);
}

/// Test that the page store never holds more than its limit, oldest dropped first.
#[tokio::test]
async fn test_page_store_evicts_oldest() {
    let harness = Harness::new();
    let mut config = test_config("v1");
    config.limits.max_pages = 2;
    let pages = config.cache_names().pages;
    let paths = ["/a.html", "/b.html", "/c.html", "/d.html"];
    for path in paths {
        harness.network.serve(path, "text/html", format!("<html><body>{path}</body></html>"));
    }
    let worker = harness.worker(config).unwrap();

    for path in paths {
        let response = respond(worker.fetch(navigate(path)).await);
        assert_eq!(response.source, ResponseSource::Network);
        worker.settle().await;
        assert!(harness.keys(&pages).await.len() <= 2);
    }

    assert_eq!(
        harness.keys(&pages).await,
        vec![url("/c.html").to_string(), url("/d.html").to_string()]
    );
}

/// Test that a full storage quota only skips the cache write.
#[tokio::test]
async fn test_quota_exceeded_serves_network_response() {
    let harness = Harness::new();
    harness.caches.write().await.set_quota(Some(16));
    harness
        .network
        .serve("/offers.html", "text/html", "<html><body>offers</body></html>")
        .serve("/img/sale.png", "image/png", "a-png-larger-than-the-quota");
    let worker = harness.worker(test_config("v1")).unwrap();

    let page = respond(worker.fetch(navigate("/offers.html")).await);
    assert_eq!(page.text(), "<html><body>offers</body></html>");
    let image = respond(worker.fetch(get("/img/sale.png")).await);
    assert_eq!(image.text(), "a-png-larger-than-the-quota");
    assert_eq!(image.source, ResponseSource::Network);

    worker.settle().await;
    assert_eq!(harness.caches.read().await.total_size(), 0);
}

/// Test that only the image store matches image query variants.
#[tokio::test]
async fn test_stale_while_revalidate_query_variants_stay_in_image_store() {
    let harness = Harness::new();
    let config = test_config("v1");
    let static_assets = config.cache_names().static_assets;
    let images = config.cache_names().images;
    seed(&harness, &static_assets, "/img/hero.png?v=1", "image/png", "hero-v1").await;
    harness.network.set_offline(true);
    let worker = harness.worker(config).unwrap();

    let variant = respond(worker.fetch(get("/img/hero.png?v=2")).await);
    assert_eq!(variant.headers.get(CONTENT_TYPE).unwrap(), "image/svg+xml");

    let exact = respond(worker.fetch(get("/img/hero.png?v=1")).await);
    assert_eq!(exact.text(), "hero-v1");

    worker.settle().await;
    assert!(harness.keys(&images).await.is_empty());
}

/// Test that the default strategy returns the network answer and never stores it.
#[tokio::test]
async fn test_default_strategy_is_network_only() {
    let harness = Harness::new();
    harness
        .network
        .serve_status("/feed", StatusCode::BAD_GATEWAY, "text/plain", "upstream down");
    let worker = harness.worker(test_config("v1")).unwrap();

    let response = respond(worker.fetch(get("/feed")).await);
    assert_eq!(response.status, StatusCode::BAD_GATEWAY);

    harness.network.set_offline(true);
    let response = respond(worker.fetch(get("/feed")).await);
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);

    worker.settle().await;
    assert!(harness.store_names().await.is_empty());
}

/// Test that cache-only requests never reach the network.
#[tokio::test]
async fn test_cache_only_never_fetches() {
    let harness = Harness::new();
    let config = test_config("v1");
    seed(&harness, &config.cache_names().static_assets, "/manifest.json", "application/json", "{}").await;
    let worker = harness.worker(config).unwrap();

    let hit = respond(worker.fetch(get("/manifest.json")).await);
    assert_eq!(hit.text(), "{}");

    let miss = respond(worker.fetch(get("/site.webmanifest")).await);
    assert_eq!(miss.status, StatusCode::NOT_FOUND);
    assert!(harness.network.requests().is_empty());
}

//! # Offline Fallback Tests
//!
//! What the engine serves when neither the network nor the cache can answer.

use http::header::CONTENT_TYPE;
use http::StatusCode;
use pwakit_net::{Response, ResponseSource};
use pwakit_sw::{CacheEntry, FetchOutcome, ServiceWorkerHandler};

use crate::{get, navigate, test_config, url, Harness};

fn respond(outcome: FetchOutcome) -> Response {
    match outcome {
        FetchOutcome::Respond(response) => response,
        FetchOutcome::Passthrough => panic!("request was not handled"),
    }
}

/// Test that a missing product image becomes the product placeholder.
#[tokio::test]
async fn test_product_image_placeholder() {
    let harness = Harness::new();
    harness.network.set_offline(true);
    let worker = harness.worker(test_config("v1")).unwrap();

    let response = respond(worker.fetch(get("/img/product-42.png")).await);

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers.get(CONTENT_TYPE).unwrap(), "image/svg+xml");
    assert_eq!(response.source, ResponseSource::Synthesized);
    let svg = response.text();
    assert!(svg.contains("placeholder-product"));
    assert!(svg.contains("Product image unavailable"));
}

/// Test that a failed image with an error status also gets a placeholder.
#[tokio::test]
async fn test_image_error_status_placeholder() {
    let harness = Harness::new();
    harness
        .network
        .serve_status("/img/avatar-7.jpg", StatusCode::NOT_FOUND, "text/plain", "missing");
    let config = test_config("v1");
    let images = config.cache_names().images;
    let worker = harness.worker(config).unwrap();

    let response = respond(worker.fetch(get("/img/avatar-7.jpg")).await);
    assert_eq!(response.headers.get(CONTENT_TYPE).unwrap(), "image/svg+xml");

    worker.settle().await;
    assert!(harness.keys(&images).await.is_empty());
}

/// Test that a timed-out navigation with no cached copy gets the cached root document.
#[tokio::test]
async fn test_navigation_timeout_serves_cached_root() {
    let harness = Harness::new();
    harness.serve_site();
    harness.network.hang("/page/unknown.html");

    let (container, _events) = harness.container();
    container.register(harness.worker(test_config("v1")).unwrap()).await.unwrap();

    let response = container.handle_fetch(navigate("/page/unknown.html")).await.unwrap();

    assert_eq!(response.text(), "<html><body>home</body></html>");
    assert_eq!(response.source, ResponseSource::Cache);
}

/// Test that with no shell document the first cached page is served with an offline banner.
#[tokio::test]
async fn test_offline_document_from_cached_pages() {
    let harness = Harness::new();
    let mut config = test_config("v1");
    config.shell_documents = Vec::new();
    let pages = config.cache_names().pages;
    {
        let mut storage = harness.caches.write().await;
        for (path, body) in [
            ("/products.html", "<html><body><h1>Products</h1></body></html>"),
            ("/offers.html", "<html><body><h1>Offers</h1></body></html>"),
        ] {
            let response = Response::synthesized(StatusCode::OK, "text/html", body);
            storage.put(&pages, CacheEntry::from_response(&url(path), &response)).unwrap();
        }
    }
    harness.network.set_offline(true);
    let worker = harness.worker(config).unwrap();

    let response = respond(worker.fetch(navigate("/cart.html")).await);
    let html = response.text();

    assert_eq!(response.status, StatusCode::OK);
    assert!(html.contains("offline-banner"));
    assert!(html.contains("<h1>Products</h1>"));
    assert!(html.contains("offers.html"));
    assert!(html.find("offline-banner") < html.find("<h1>Products</h1>"));
}

/// Test that with nothing cached a built-in offline page is served.
#[tokio::test]
async fn test_builtin_offline_page() {
    let harness = Harness::new();
    harness.network.set_offline(true);
    let worker = harness.worker(test_config("v1")).unwrap();

    let response = respond(worker.fetch(navigate("/checkout.html")).await);

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers.get(CONTENT_TYPE).unwrap(), "text/html; charset=utf-8");
    let html = response.text();
    assert!(html.contains("You are offline"));
    assert!(html.contains("checkout.html"));
}

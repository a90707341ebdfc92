//! # Lifecycle Tests
//!
//! Install, activation, version upgrades and background refresh through a
//! container.

use std::time::Duration;

use http::StatusCode;
use pwakit_net::Response;
use pwakit_sw::{
    CacheEntry, Client, InstallPolicy, ServiceWorkerError, ServiceWorkerEvent, ServiceWorkerHandler,
    ServiceWorkerState,
};

use crate::{navigate, test_config, url, Harness};

async fn open_store(harness: &Harness, name: &str) {
    let response = Response::synthesized(StatusCode::OK, "text/plain", "old");
    harness
        .caches
        .write()
        .await
        .put(name, CacheEntry::from_response(&url("/old.txt"), &response))
        .unwrap();
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

/// Test that activation deletes every store outside the current version.
#[tokio::test]
async fn test_activate_deletes_stale_generations() {
    let harness = Harness::new();
    harness.serve_site();
    let config = test_config("v2");
    let names = config.cache_names();

    open_store(&harness, "storefront-static-v1").await;
    open_store(&harness, "storefront-pages-v1").await;
    open_store(&harness, "legacy-cache").await;
    open_store(&harness, &names.images).await;

    let (container, _events) = harness.container();
    container.register(harness.worker(config).unwrap()).await.unwrap();
    container.settle().await;

    let expected: Vec<String> = names.all().into_iter().map(str::to_string).collect();
    assert_eq!(sorted(harness.store_names().await), sorted(expected));
    // Stores of the current version keep their entries.
    assert_eq!(harness.keys(&names.images).await, vec![url("/old.txt").to_string()]);
}

/// Test that a strict install with a failing essential resource never activates.
#[tokio::test]
async fn test_strict_install_failure_keeps_previous_worker() {
    let harness = Harness::new();
    harness.serve_site();
    let (container, mut events) = harness.container();

    container.register(harness.worker(test_config("v1")).unwrap()).await.unwrap();
    let v1_pages = test_config("v1").cache_names().pages;

    let mut v2 = test_config("v2");
    v2.resources.essential = vec!["/index.html".into(), "/manifest.json".into()];
    harness.network.fail("/manifest.json");
    let worker = harness.worker(v2).unwrap();
    let v2_id = worker.id();

    let err = container.register(worker).await.unwrap_err();
    assert!(matches!(err, ServiceWorkerError::InstallFailed(ref reason) if reason.contains("manifest.json")));

    assert_eq!(container.active().await.unwrap().version, "v1");
    assert!(container.waiting().await.is_none());
    assert!(!harness.store_names().await.iter().any(|name| name.ends_with("-v2")));

    let mut saw_redundant = false;
    while let Ok(event) = events.try_recv() {
        if event
            == (ServiceWorkerEvent::StateChange {
                worker: v2_id,
                new_state: ServiceWorkerState::Redundant,
            })
        {
            saw_redundant = true;
        }
    }
    assert!(saw_redundant);

    // The old version still handles navigations.
    harness.network.serve("/help.html", "text/html", "help");
    let response = container.handle_fetch(navigate("/help.html")).await.unwrap();
    assert_eq!(response.text(), "help");
    container.settle().await;
    assert!(harness.keys(&v1_pages).await.contains(&url("/help.html").to_string()));
}

/// Test that a lenient install tolerates failures and takes over.
#[tokio::test]
async fn test_lenient_install_activates_despite_failures() {
    let harness = Harness::new();
    harness.serve_site();
    let (container, _events) = harness.container();
    container.register(harness.worker(test_config("v1")).unwrap()).await.unwrap();

    let mut v2 = test_config("v2");
    v2.install_policy = InstallPolicy::Lenient;
    harness.network.fail("/manifest.json");
    let static_v2 = v2.cache_names().static_assets;

    let state = container.register(harness.worker(v2).unwrap()).await.unwrap();
    assert_eq!(state, ServiceWorkerState::Activated);
    assert_eq!(container.active().await.unwrap().version, "v2");

    let keys = harness.keys(&static_v2).await;
    assert!(keys.contains(&url("/index.html").to_string()));
    assert!(!keys.contains(&url("/manifest.json").to_string()));
    assert!(!harness.store_names().await.iter().any(|name| name.ends_with("-v1")));
}

/// Test that a new version claims open pages when it activates.
#[tokio::test]
async fn test_upgrade_claims_clients() {
    let harness = Harness::new();
    harness.serve_site();
    let page = Client::window(url("/products.html"));
    let page_id = page.id.clone();
    harness.clients.write().await.add(page);

    let (container, mut events) = harness.container();
    container.register(harness.worker(test_config("v1")).unwrap()).await.unwrap();

    let v2 = harness.worker(test_config("v2")).unwrap();
    let v2_id = v2.id();
    container.register(v2).await.unwrap();

    let clients = harness.clients.read().await;
    assert_eq!(clients.get(&page_id).unwrap().controller, Some(v2_id));

    let mut controller_changes = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ServiceWorkerEvent::ControllerChange { .. }) {
            controller_changes += 1;
        }
    }
    assert_eq!(controller_changes, 2);
}

/// Test that activation pre-warms the core pages.
#[tokio::test]
async fn test_activate_prewarms_core_pages() {
    let harness = Harness::new();
    harness.serve_site();
    let config = test_config("v1");
    let pages = config.cache_names().pages;

    let (container, _events) = harness.container();
    container.register(harness.worker(config).unwrap()).await.unwrap();
    container.settle().await;

    assert_eq!(
        harness.keys(&pages).await,
        vec![url("/products.html").to_string(), url("/offers.html").to_string()]
    );
}

/// Test that the update-cache periodic sync refreshes and other tags are ignored.
#[tokio::test]
async fn test_periodic_sync_refresh() {
    let harness = Harness::new();
    harness.serve_site();
    let mut config = test_config("v1");
    config.prewarm_pages = 0;
    let (container, _events) = harness.container();
    container.register(harness.worker(config).unwrap()).await.unwrap();

    assert!(container.periodic_sync("content-sync").await.unwrap().is_none());

    let before = harness.network.request_count("/index.html");
    let report = container.periodic_sync("update-cache").await.unwrap().unwrap();
    assert_eq!(report.refreshed, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(harness.network.request_count("/index.html"), before + 1);
}

/// Test that the refresh timer runs once per interval after activation.
#[tokio::test(start_paused = true)]
async fn test_refresh_timer() {
    let harness = Harness::new();
    harness.serve_site();
    let mut config = test_config("v1");
    config.refresh.interval_secs = Some(60);
    config.prewarm_pages = 0;

    let (container, _events) = harness.container();
    container.register(harness.worker(config).unwrap()).await.unwrap();
    assert_eq!(harness.network.request_count("/index.html"), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.network.request_count("/index.html"), 1);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(harness.network.request_count("/index.html"), 2);
}

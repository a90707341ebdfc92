//! # Messaging Tests
//!
//! Page messages, push notifications and notification clicks.

use bytes::Bytes;
use pwakit_sw::{
    Client, ClientMessage, MessageReply, NotificationClickOutcome, ServiceWorkerHandler, StoreStats,
};
use serde_json::json;

use crate::{navigate, test_config, url, Harness};

/// Test that GET_STATS reports zeros for every store of a fresh worker.
#[tokio::test]
async fn test_get_stats_on_empty_stores() {
    let harness = Harness::new();
    let config = test_config("v1");
    let names = config.cache_names();
    let worker = harness.worker(config).unwrap();

    let reply = worker.message(ClientMessage::GetStats).await;
    let MessageReply::Stats(stats) = &reply else {
        panic!("expected stats, got {reply:?}");
    };

    assert_eq!(stats.len(), 4);
    for name in names.all() {
        assert_eq!(stats.get(name), Some(&StoreStats::default()), "{name}");
    }
    assert_eq!(
        serde_json::to_value(&reply).unwrap()[names.pages.as_str()],
        json!({"count": 0, "size": 0, "items": []})
    );
}

/// Test that GET_STATS counts entries and samples names after install.
#[tokio::test]
async fn test_get_stats_after_install() {
    let harness = Harness::new();
    harness.serve_site();
    let config = test_config("v1");
    let static_store = config.cache_names().static_assets;
    let (container, _events) = harness.container();
    container.register(harness.worker(config).unwrap()).await.unwrap();

    let reply = container.post_message(ClientMessage::GetStats).await.unwrap();
    let MessageReply::Stats(stats) = reply else {
        panic!("expected stats");
    };
    let store = &stats[&static_store];
    assert_eq!(store.count, 3);
    assert!(store.size > 0);
    assert_eq!(store.items, vec!["index.html", "manifest.json", "main.css"]);
}

/// Test clearing one store by alias and then every store.
#[tokio::test]
async fn test_clear_cache() {
    let harness = Harness::new();
    harness.serve_site();
    let config = test_config("v1");
    let names = config.cache_names();
    let (container, _events) = harness.container();
    container.register(harness.worker(config).unwrap()).await.unwrap();
    container.settle().await;

    let reply = container
        .post_message(ClientMessage::parse(r#"{"action":"CLEAR_CACHE","cacheName":"pages"}"#).unwrap())
        .await
        .unwrap();
    assert!(matches!(reply, MessageReply::Ack { success: true, .. }));
    assert!(!harness.store_names().await.contains(&names.pages));
    assert!(harness.store_names().await.contains(&names.static_assets));

    container
        .post_message(ClientMessage::ClearCache {
            cache_name: "ALL".into(),
        })
        .await
        .unwrap();
    assert!(harness.store_names().await.is_empty());
}

/// Test UPDATE_CACHE refreshes the listed URLs but skips excluded ones.
#[tokio::test]
async fn test_update_cache_message() {
    let harness = Harness::new();
    harness.serve_site();
    harness.network.serve("/help.html", "text/html", "help");
    harness.network.serve("/api/help", "application/json", "{}");
    let config = test_config("v1");
    let pages = config.cache_names().pages;
    let worker = harness.worker(config).unwrap();

    let reply = worker
        .message(ClientMessage::UpdateCache {
            cache_name: "pages".into(),
            urls: vec!["/help.html".into(), "/api/help".into()],
        })
        .await;

    assert!(matches!(reply, MessageReply::Ack { success: true, .. }));
    assert_eq!(harness.keys(&pages).await, vec![url("/help.html").to_string()]);
    assert_eq!(harness.network.request_count("/api/help"), 0);
}

/// Test PREFETCH_PAGE stores the page for later offline use.
#[tokio::test]
async fn test_prefetch_page_message() {
    let harness = Harness::new();
    harness.serve_site();
    let worker = harness.worker(test_config("v1")).unwrap();

    let reply = worker
        .message(ClientMessage::PrefetchPage {
            url: "/offers.html".into(),
        })
        .await;
    assert!(matches!(reply, MessageReply::Ack { success: true, .. }));

    harness.network.set_offline(true);
    let pwakit_sw::FetchOutcome::Respond(response) = worker.fetch(navigate("/offers.html")).await else {
        panic!("expected a response");
    };
    assert_eq!(response.text(), "<html><body>offers</body></html>");
}

/// Test SKIP_WAITING with nothing waiting.
#[tokio::test]
async fn test_skip_waiting_without_waiting_worker() {
    let harness = Harness::new();
    harness.serve_site();
    let (container, _events) = harness.container();
    container.register(harness.worker(test_config("v1")).unwrap()).await.unwrap();

    let reply = container.post_message(ClientMessage::SkipWaiting).await.unwrap();
    assert!(matches!(reply, MessageReply::Ack { success: false, .. }));
    assert_eq!(container.active().await.unwrap().version, "v1");
}

/// Test that a push builds a notification and a click opens its page.
#[tokio::test]
async fn test_push_and_click_opens_window() {
    let harness = Harness::new();
    harness.serve_site();
    let (container, _events) = harness.container();
    container.register(harness.worker(test_config("v1")).unwrap()).await.unwrap();

    let payload = Bytes::from_static(br#"{"title":"Flash sale","data":{"url":"/offers.html"}}"#);
    let notification = container.push(Some(payload)).await.unwrap();
    assert_eq!(notification.title, "Flash sale");

    let outcome = container.notification_click(&notification, "open").await.unwrap();
    let NotificationClickOutcome::Opened(client) = outcome else {
        panic!("expected a new window, got {outcome:?}");
    };
    assert_eq!(client.url, url("/offers.html"));
    assert_eq!(harness.clients.read().await.len(), 1);

    let dismissed = container.notification_click(&notification, "close").await.unwrap();
    assert_eq!(dismissed, NotificationClickOutcome::Dismissed);
}

/// Test that a click focuses an already open app window.
#[tokio::test]
async fn test_click_focuses_open_window() {
    let harness = Harness::new();
    harness.serve_site();
    let page = Client::window(url("/products.html"));
    let page_id = page.id.clone();
    harness.clients.write().await.add(page);

    let (container, _events) = harness.container();
    container.register(harness.worker(test_config("v1")).unwrap()).await.unwrap();

    let notification = container.push(None).await.unwrap();
    assert_eq!(notification.title, "Storefront");

    let outcome = container.notification_click(&notification, "").await.unwrap();
    let NotificationClickOutcome::Focused(client) = outcome else {
        panic!("expected focus, got {outcome:?}");
    };
    assert_eq!(client.id, page_id);
    assert!(client.focused);
}

//! Page-to-worker messages.
//!
//! Messages arrive as JSON objects tagged by `action`:
//!
//! ```json
//! {"action": "UPDATE_CACHE", "cacheName": "pages", "urls": ["/help.html"]}
//! {"action": "CLEAR_CACHE", "cacheName": "ALL"}
//! {"action": "GET_STATS"}
//! {"action": "PREFETCH_PAGE", "url": "/offers.html"}
//! {"action": "SKIP_WAITING"}
//! ```

use std::collections::BTreeMap;

use pwakit_net::file_name;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::config::ResourceClass;
use crate::lifecycle::Lifecycle;
use crate::state::WorkerState;
use crate::ServiceWorkerError;

/// `cacheName` value that targets every store.
pub const ALL_CACHES: &str = "ALL";

const STATS_SAMPLE: usize = 10;

/// A message posted by a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    UpdateCache { cache_name: String, urls: Vec<String> },
    #[serde(rename_all = "camelCase")]
    ClearCache { cache_name: String },
    GetStats,
    PrefetchPage { url: String },
    SkipWaiting,
}

impl ClientMessage {
    pub fn parse(json: &str) -> Result<Self, ServiceWorkerError> {
        serde_json::from_str(json).map_err(|e| ServiceWorkerError::InvalidMessage(e.to_string()))
    }
}

/// Per-store numbers reported by `GET_STATS`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub count: usize,
    /// Approximate bytes, from `content-length` where present.
    pub size: u64,
    /// Up to ten entry file names, oldest first.
    pub items: Vec<String>,
}

/// Reply to a [`ClientMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageReply {
    Ack {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Stats(BTreeMap<String, StoreStats>),
}

impl MessageReply {
    pub fn ok(message: impl Into<String>) -> Self {
        MessageReply::Ack {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        MessageReply::Ack {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Handle a message other than `SKIP_WAITING`, which only a container can act on.
pub async fn handle_message(state: &WorkerState, lifecycle: &Lifecycle, message: ClientMessage) -> MessageReply {
    debug!(?message, "Handling client message");
    match message {
        ClientMessage::UpdateCache { cache_name, urls } => {
            let store = resolve_store(state, &cache_name);
            let targets: Vec<Url> = state
                .config
                .resolve_all(&urls)
                .into_iter()
                .filter(|url| state.classifier.url_exclusion(url).is_none())
                .collect();
            let report = lifecycle.update_cache(&store, &targets).await;
            info!(cache = %store, refreshed = report.refreshed, failed = report.failed, "Cache updated");
            MessageReply::Ack {
                success: report.failed == 0,
                message: Some(format!("updated {} of {}", report.refreshed, urls.len())),
            }
        }
        ClientMessage::ClearCache { cache_name } => {
            let mut storage = state.caches.write().await;
            let targets: Vec<String> = if cache_name == ALL_CACHES {
                storage.keys().into_iter().map(str::to_string).collect()
            } else {
                vec![resolve_store(state, &cache_name)]
            };
            let mut cleared = 0;
            for name in &targets {
                if storage.delete(name) {
                    cleared += 1;
                }
            }
            info!(cache = %cache_name, cleared, "Cache cleared");
            if cleared > 0 {
                MessageReply::ok(format!("cleared {cleared} cache(s)"))
            } else {
                MessageReply::failed(format!("no cache named {cache_name}"))
            }
        }
        ClientMessage::GetStats => MessageReply::Stats(stats(state).await),
        ClientMessage::PrefetchPage { url } => {
            let Some(target) = state.config.resolve(&url) else {
                return MessageReply::failed(format!("invalid url {url}"));
            };
            if lifecycle.prefetch_page(&target).await {
                MessageReply::ok(target.to_string())
            } else {
                MessageReply::failed(format!("could not prefetch {target}"))
            }
        }
        ClientMessage::SkipWaiting => MessageReply::ok("skip waiting requested"),
    }
}

/// Accept either a full store name or a class alias such as `pages`.
fn resolve_store(state: &WorkerState, name: &str) -> String {
    ResourceClass::ALL
        .iter()
        .find(|class| class.as_str().eq_ignore_ascii_case(name))
        .map(|class| state.names.for_class(*class).to_string())
        .unwrap_or_else(|| name.to_string())
}

/// Stats for every store this version owns; missing stores report zeros.
pub async fn stats(state: &WorkerState) -> BTreeMap<String, StoreStats> {
    let storage = state.caches.read().await;
    state
        .names
        .all()
        .into_iter()
        .map(|name| {
            let stats = storage
                .get(name)
                .map(|cache| StoreStats {
                    count: cache.len(),
                    size: cache.approximate_size(),
                    items: cache
                        .entries()
                        .take(STATS_SAMPLE)
                        .map(|e| e.parsed_url().map(|u| file_name(&u)).unwrap_or_else(|| e.url.clone()))
                        .collect(),
                })
                .unwrap_or_default();
            (name.to_string(), stats)
        })
        .collect()
}

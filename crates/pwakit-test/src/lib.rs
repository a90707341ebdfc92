//! # PwaKit Test
//!
//! End-to-end scenarios for the service worker engine.
//!
//! [`MockNetwork`] stands in for the network: every URL can be scripted to
//! answer, fail, stall for a while or never answer at all, and every request
//! that reaches it is logged. [`Harness`] wires a network, shared cache
//! storage and clients together the way a host would.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pwakit_test::{test_config, Harness};
//!
//! let harness = Harness::new();
//! harness.serve_site();
//! let (container, _events) = harness.container();
//! container.register(harness.worker(test_config("v1"))?).await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::header::CONTENT_TYPE;
use http::StatusCode;
use pwakit_net::{Fetcher, NetError, Request, Response};
use pwakit_sw::{
    CacheStorage, Clients, EngineConfig, ServiceWorkerContainer, ServiceWorkerError, ServiceWorkerEvent,
    SharedCaches, SharedClients, StorefrontWorker,
};
use tokio::sync::mpsc;
use tracing::trace;
use url::Url;

#[cfg(test)]
mod exclusion;
#[cfg(test)]
mod fallback;
#[cfg(test)]
mod lifecycle;
#[cfg(test)]
mod messaging;
#[cfg(test)]
mod strategies;

/// Origin every scenario runs under.
pub const SCOPE: &str = "https://shop.test/";

/// Resolve `path` against [`SCOPE`]. Absolute URLs pass through.
pub fn url(path: &str) -> Url {
    match Url::parse(SCOPE).and_then(|scope| scope.join(path)) {
        Ok(url) => url,
        Err(e) => panic!("bad test url {path}: {e}"),
    }
}

pub fn get(path: &str) -> Request {
    Request::get(url(path))
}

pub fn navigate(path: &str) -> Request {
    Request::navigate(url(path))
}

/// How the mock answers one URL.
#[derive(Debug, Clone)]
pub enum Route {
    Respond {
        status: StatusCode,
        content_type: String,
        body: Bytes,
        delay: Option<Duration>,
    },
    Fail(String),
    /// Never answers; only a timeout gets the caller out.
    Hang,
}

/// Scriptable [`Fetcher`].
///
/// Unscripted URLs answer `404`. Going offline fails every request.
#[derive(Debug, Default)]
pub struct MockNetwork {
    routes: Mutex<HashMap<String, Route>>,
    offline: AtomicBool,
    log: Mutex<Vec<Request>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, path: &str, route: Route) -> &Self {
        self.routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(url(path).to_string(), route);
        self
    }

    pub fn serve(&self, path: &str, content_type: &str, body: impl Into<Bytes>) -> &Self {
        self.serve_status(path, StatusCode::OK, content_type, body)
    }

    pub fn serve_status(
        &self,
        path: &str,
        status: StatusCode,
        content_type: &str,
        body: impl Into<Bytes>,
    ) -> &Self {
        self.route(
            path,
            Route::Respond {
                status,
                content_type: content_type.to_string(),
                body: body.into(),
                delay: None,
            },
        )
    }

    pub fn serve_delayed(&self, path: &str, content_type: &str, body: impl Into<Bytes>, delay: Duration) -> &Self {
        self.route(
            path,
            Route::Respond {
                status: StatusCode::OK,
                content_type: content_type.to_string(),
                body: body.into(),
                delay: Some(delay),
            },
        )
    }

    pub fn fail(&self, path: &str) -> &Self {
        self.route(path, Route::Fail("connection refused".into()))
    }

    pub fn hang(&self, path: &str) -> &Self {
        self.route(path, Route::Hang)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every request seen so far, oldest first.
    pub fn requests(&self) -> Vec<Request> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn request_count(&self, path: &str) -> usize {
        let target = url(path);
        self.requests().iter().filter(|r| r.url == target).count()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }
}

#[async_trait]
impl Fetcher for MockNetwork {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        trace!(url = %request.url, "Mock fetch");
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::RequestFailed("network offline".into()));
        }

        let route = self
            .routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(request.url.as_str())
            .cloned();

        match route {
            Some(Route::Respond {
                status,
                content_type,
                body,
                delay,
            }) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(Response::new(status)
                    .with_header(CONTENT_TYPE, &content_type)
                    .with_body(body)
                    .with_url(request.url))
            }
            Some(Route::Fail(reason)) => Err(NetError::RequestFailed(reason)),
            Some(Route::Hang) => Ok(std::future::pending::<Response>().await),
            None => Ok(Response::new(StatusCode::NOT_FOUND)
                .with_header(CONTENT_TYPE, "text/plain")
                .with_body("Not Found")
                .with_url(request.url)),
        }
    }
}

/// Config with short timeouts and no refresh timer.
pub fn test_config(version: &str) -> EngineConfig {
    let mut config = EngineConfig::for_scope(url("/"));
    config.version = version.to_string();
    config.resources.essential = vec!["/index.html".into(), "/manifest.json".into(), "/css/main.css".into()];
    config.resources.core_pages = vec!["/products.html".into(), "/offers.html".into()];
    config.timeouts.network_first_ms = 200;
    config.timeouts.image_fetch_ms = 200;
    config.timeouts.image_revalidate_delay_ms = 10;
    config.timeouts.asset_revalidate_delay_ms = 10;
    config.timeouts.install_watchdog_ms = 2_000;
    config.refresh.interval_secs = None;
    config
}

/// A network, cache storage and clients shared by every worker in a scenario.
pub struct Harness {
    pub network: Arc<MockNetwork>,
    pub caches: SharedCaches,
    pub clients: SharedClients,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            network: Arc::new(MockNetwork::new()),
            caches: CacheStorage::new().shared(),
            clients: Clients::new().shared(),
        }
    }

    /// Serve every resource [`test_config`] references.
    pub fn serve_site(&self) -> &Self {
        self.network
            .serve("/index.html", "text/html", "<html><body>home</body></html>")
            .serve("/manifest.json", "application/manifest+json", r#"{"name":"Storefront"}"#)
            .serve("/css/main.css", "text/css", "body{margin:0}")
            .serve("/products.html", "text/html", "<html><body>products</body></html>")
            .serve("/offers.html", "text/html", "<html><body>offers</body></html>");
        self
    }

    pub fn worker(&self, config: EngineConfig) -> Result<Arc<StorefrontWorker>, ServiceWorkerError> {
        let fetcher: Arc<dyn Fetcher> = self.network.clone();
        Ok(Arc::new(StorefrontWorker::new(
            config,
            Arc::clone(&self.caches),
            Arc::clone(&self.clients),
            fetcher,
        )?))
    }

    pub fn container(&self) -> (ServiceWorkerContainer, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        ServiceWorkerContainer::new(
            url("/"),
            Arc::clone(&self.caches),
            Arc::clone(&self.clients),
            self.network.clone(),
        )
    }

    /// Keys of one store in insertion order; empty when the store is missing.
    pub async fn keys(&self, store: &str) -> Vec<String> {
        self.caches
            .read()
            .await
            .get(store)
            .map(|cache| cache.keys().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub async fn store_names(&self) -> Vec<String> {
        self.caches
            .read()
            .await
            .keys()
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

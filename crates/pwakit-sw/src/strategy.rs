//! Strategy execution.
//!
//! Each strategy turns a classified request into a response and queues its
//! cache side effects on the worker's background task set. Network and cache
//! failures never escape: the worst case is a synthesized fallback.

use std::sync::Arc;
use std::time::Duration;

use http::header::ACCEPT;
use http::HeaderValue;
use pwakit_net::{CredentialsMode, NetError, Request, RequestMode, Response};
use tracing::{debug, info, trace};
use url::Url;

use crate::cache::{cache_key, MatchOptions};
use crate::classify::{Classification, Strategy};
use crate::rewrite::optimize_image_url;
use crate::state::WorkerState;
use crate::worker::FetchOutcome;

const IMAGE_ACCEPT: &str = "image/webp,image/apng,image/*,*/*;q=0.8";

/// Runs cache strategies against one worker's state.
#[derive(Debug, Clone)]
pub struct StrategyExecutor {
    state: Arc<WorkerState>,
}

impl StrategyExecutor {
    pub fn new(state: Arc<WorkerState>) -> Self {
        Self { state }
    }

    /// Classify and handle an intercepted request.
    pub async fn handle(&self, request: Request) -> FetchOutcome {
        match self.state.classifier.classify(&request) {
            Classification::Excluded(reason) => {
                debug!(url = %request.url, ?reason, "Passing excluded request through");
                FetchOutcome::Passthrough
            }
            Classification::Cached { strategy, store } => {
                let store = self.state.names.for_class(store).to_string();
                FetchOutcome::Respond(self.execute(strategy, store, request).await)
            }
        }
    }

    /// Run one strategy, writing into `store`.
    pub async fn execute(&self, strategy: Strategy, store: String, request: Request) -> Response {
        let url = request.url.clone();
        let response = match strategy {
            Strategy::NetworkFirst => self.network_first(request, store).await,
            Strategy::CacheFirst => self.cache_first(request, store).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request, store).await,
            Strategy::CacheOnly => self.cache_only(&url).await,
            Strategy::Default => self.network_only(request).await,
        };

        info!(
            url = %url,
            %strategy,
            status = response.status.as_u16(),
            source = ?response.source,
            "Request handled"
        );
        response
    }

    async fn network_first(&self, request: Request, store: String) -> Response {
        let url = request.url.clone();
        let timeout = self.state.config.timeouts.network_first();

        match self.state.fetch_with_timeout(request, timeout).await {
            Ok(response) if response.ok() => {
                self.state.spawn_put(store, url, response.clone());
                return response;
            }
            Ok(response) => {
                debug!(url = %url, status = %response.status, "Network answered with an error status")
            }
            Err(e) => debug!(url = %url, error = %e, "Network fetch failed"),
        }

        if let Some(cached) = self.match_any(&url, MatchOptions::default()).await {
            return cached;
        }

        for shell in &self.state.config.shell_documents {
            let Some(shell_url) = self.state.config.resolve(shell) else {
                continue;
            };
            if let Some(cached) = self.match_any(&shell_url, MatchOptions::default()).await {
                debug!(url = %url, shell = %shell_url, "Serving shell document");
                return cached;
            }
        }

        let storage = self.state.caches.read().await;
        self.state.fallback.offline_document(&storage, &url)
    }

    async fn cache_first(&self, request: Request, store: String) -> Response {
        let url = request.url.clone();

        if let Some((holder, response)) = self.match_with_holder(&url, MatchOptions::default()).await {
            trace!(url = %url, cache = %holder, "Cache hit");
            let delay = self.state.config.timeouts.asset_revalidate_delay();
            self.spawn_revalidation(holder, request, url, delay, None);
            return response;
        }

        match self.state.fetcher.fetch(request).await {
            Ok(response) if response.ok() => {
                self.state.spawn_put(store, url, response.clone());
                response
            }
            Ok(response) => {
                debug!(url = %url, status = %response.status, "Asset fetch returned an error status");
                self.state.fallback.asset_placeholder(&url)
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Asset unavailable, serving placeholder");
                self.state.fallback.asset_placeholder(&url)
            }
        }
    }

    async fn stale_while_revalidate(&self, request: Request, store: String) -> Response {
        let request = match self.optimized(&request.url) {
            Some(optimized) => {
                debug!(from = %request.url, to = %optimized, "Rewrote image URL");
                request.with_url(optimized)
            }
            None => request,
        };
        let request = request
            .mode(RequestMode::Cors)
            .credentials(CredentialsMode::Omit)
            .header(ACCEPT, HeaderValue::from_static(IMAGE_ACCEPT));
        let url = request.url.clone();
        let timeout = self.state.config.timeouts.image_fetch();

        // Query variants only collapse inside the image store; elsewhere the key must match exactly.
        let hit = {
            let storage = self.state.caches.read().await;
            storage
                .get(&store)
                .and_then(|images| images.match_request(&url, MatchOptions::ignore_search()))
                .map(|entry| (store.as_str(), entry))
                .or_else(|| storage.match_request(&url, MatchOptions::default()))
                .map(|(holder, entry)| (holder.to_string(), entry.parsed_url(), entry.to_response()))
        };
        if let Some((holder, stored_url, response)) = hit {
            // Refresh the canonical entry rather than adding a query variant.
            let key_url = stored_url.unwrap_or_else(|| url.clone());
            let delay = self.state.config.timeouts.image_revalidate_delay();
            self.spawn_revalidation(holder, request.with_url(key_url.clone()), key_url, delay, Some(timeout));
            return response;
        }

        match self.state.fetch_with_timeout(request, timeout).await {
            Ok(response) if response.ok() => {
                self.state.cache_put(&store, &url, &response).await;
                self.state.spawn_evict(store);
                response
            }
            Ok(response) => {
                debug!(url = %url, status = %response.status, "Image fetch returned an error status");
                self.state.fallback.placeholder_image(&url)
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Image fetch failed");
                self.state.fallback.placeholder_image(&url)
            }
        }
    }

    async fn cache_only(&self, url: &Url) -> Response {
        match self.match_any(url, MatchOptions::default()).await {
            Some(response) => response,
            None => self.state.fallback.not_found(),
        }
    }

    async fn network_only(&self, request: Request) -> Response {
        let url = request.url.clone();
        match self.state.fetcher.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %url, error = %e, "Network failed, trying cache");
                match self.match_any(&url, MatchOptions::default()).await {
                    Some(response) => response,
                    None => self.state.fallback.service_unavailable(),
                }
            }
        }
    }

    fn optimized(&self, url: &Url) -> Option<Url> {
        if self.state.config.optimize_image_hosts {
            optimize_image_url(url)
        } else {
            None
        }
    }

    async fn match_any(&self, url: &Url, options: MatchOptions) -> Option<Response> {
        self.match_with_holder(url, options)
            .await
            .map(|(_, response)| response)
    }

    async fn match_with_holder(&self, url: &Url, options: MatchOptions) -> Option<(String, Response)> {
        let storage = self.state.caches.read().await;
        storage
            .match_request(url, options)
            .map(|(holder, entry)| (holder.to_string(), entry.to_response()))
    }

    /// Refresh `key_url` in `store` after `delay`, at most once at a time per key.
    fn spawn_revalidation(
        &self,
        store: String,
        request: Request,
        key_url: Url,
        delay: Duration,
        timeout: Option<Duration>,
    ) {
        let Some(slot) = self.state.begin_revalidation(cache_key(&key_url)) else {
            trace!(url = %key_url, "Revalidation already in flight");
            return;
        };

        let state = Arc::clone(&self.state);
        self.state.tasks.spawn(async move {
            // Dropping the slot frees the key, including on abort or panic.
            let _slot = slot;
            tokio::time::sleep(delay).await;

            let result: Result<Response, NetError> = match timeout {
                Some(timeout) => state.fetch_with_timeout(request, timeout).await,
                None => state.fetcher.fetch(request).await,
            };
            match result {
                Ok(response) if response.ok() => {
                    if state.cache_put(&store, &key_url, &response).await {
                        state.evict(&store).await;
                    }
                }
                Ok(response) => {
                    debug!(url = %key_url, status = %response.status, "Revalidation skipped, error status")
                }
                Err(e) => debug!(url = %key_url, error = %e, "Revalidation failed"),
            }
        });
    }
}

//! Install, activate and refresh.

use std::sync::Arc;

use futures::future::join_all;
use pwakit_common::with_timeout;
use pwakit_net::{Request, Response};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{InstallPolicy, ResourceClass};
use crate::state::WorkerState;
use crate::{Result, ServiceWorkerError};

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallOutcome {
    /// Essential resources now in the static store.
    pub cached: Vec<Url>,
    /// Essential resources that failed (lenient installs only).
    pub failed: Vec<(Url, String)>,
    /// The worker asks to be activated without waiting.
    pub skip_waiting: bool,
}

/// Result of an activation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivateOutcome {
    /// Stores from other versions that were removed.
    pub deleted: Vec<String>,
    /// Clients that switched to this worker.
    pub claimed: usize,
}

/// Result of a refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub failed: usize,
}

impl RefreshReport {
    fn merge(self, other: RefreshReport) -> RefreshReport {
        RefreshReport {
            refreshed: self.refreshed + other.refreshed,
            failed: self.failed + other.failed,
        }
    }
}

/// Lifecycle controller for one worker.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: Arc<WorkerState>,
}

impl Lifecycle {
    pub fn new(state: Arc<WorkerState>) -> Self {
        Self { state }
    }

    /// Open every store of this version and pre-cache the essential list.
    ///
    /// With [`InstallPolicy::Strict`] a single failed resource aborts the
    /// install and removes the stores this install created.
    pub async fn install(&self) -> Result<InstallOutcome> {
        let config = &self.state.config;
        info!(version = %config.version, "Installing");

        let mut created = Vec::new();
        {
            let mut storage = self.state.caches.write().await;
            for name in self.state.names.all() {
                if !storage.has(name) {
                    storage.open(name);
                    created.push(name.to_string());
                }
            }
        }

        let essentials = config.resolve_all(&config.resources.essential);
        let watchdog = config.timeouts.install_watchdog();
        let results = match with_timeout(watchdog, self.fetch_all(&essentials)).await {
            Ok(results) => results,
            Err(e) => essentials
                .iter()
                .map(|url| (url.clone(), Err(e.to_string())))
                .collect(),
        };

        let mut fetched = Vec::new();
        let mut failed = Vec::new();
        for (url, result) in results {
            match result {
                Ok(response) => fetched.push((url, response)),
                Err(reason) => {
                    warn!(url = %url, reason = %reason, "Essential resource failed");
                    failed.push((url, reason));
                }
            }
        }

        if config.install_policy == InstallPolicy::Strict && !failed.is_empty() {
            self.rollback(&created).await;
            let reasons: Vec<String> = failed.iter().map(|(u, r)| format!("{u} ({r})")).collect();
            return Err(ServiceWorkerError::InstallFailed(reasons.join(", ")));
        }

        let store = self.state.names.for_class(ResourceClass::Static);
        let mut cached = Vec::new();
        for (url, response) in fetched {
            if self.state.cache_put(store, &url, &response).await {
                cached.push(url);
            } else if config.install_policy == InstallPolicy::Strict {
                self.rollback(&created).await;
                return Err(ServiceWorkerError::InstallFailed(format!("could not store {url}")));
            } else {
                failed.push((url, "cache write failed".to_string()));
            }
        }

        self.cache_dependencies().await;

        info!(
            version = %config.version,
            cached = cached.len(),
            failed = failed.len(),
            "Install complete"
        );
        Ok(InstallOutcome {
            cached,
            failed,
            skip_waiting: true,
        })
    }

    async fn rollback(&self, created: &[String]) {
        let mut storage = self.state.caches.write().await;
        for name in created {
            storage.delete(name);
        }
        debug!(removed = created.len(), "Rolled back install");
    }

    async fn cache_dependencies(&self) {
        let config = &self.state.config;
        let dependencies = config.resolve_all(&config.resources.dependencies);
        if dependencies.is_empty() {
            return;
        }
        let store = self.state.names.for_class(ResourceClass::Static);
        for (url, result) in self.fetch_all(&dependencies).await {
            match result {
                Ok(response) => {
                    self.state.cache_put(store, &url, &response).await;
                }
                Err(reason) => debug!(url = %url, reason = %reason, "Dependency not cached"),
            }
        }
    }

    /// Fetch URLs concurrently, keeping only 2xx responses as successes.
    async fn fetch_all(&self, urls: &[Url]) -> Vec<(Url, std::result::Result<Response, String>)> {
        join_all(urls.iter().map(|url| async move {
            let result = match self.state.fetcher.fetch(Request::get(url.clone())).await {
                Ok(response) if response.ok() => Ok(response),
                Ok(response) => Err(format!("HTTP {}", response.status)),
                Err(e) => Err(e.to_string()),
            };
            (url.clone(), result)
        }))
        .await
    }

    /// Delete stores from other versions, claim clients and pre-warm pages.
    pub async fn activate(&self) -> Result<ActivateOutcome> {
        info!(version = %self.state.config.version, "Activating");

        let deleted: Vec<String> = {
            let mut storage = self.state.caches.write().await;
            let stale: Vec<String> = storage
                .keys()
                .into_iter()
                .filter(|name| !self.state.names.contains(name))
                .map(str::to_string)
                .collect();
            for name in &stale {
                storage.delete(name);
                info!(cache = %name, "Deleted old cache");
            }
            stale
        };

        let claimed = self
            .state
            .clients
            .write()
            .await
            .claim(self.state.id, &self.state.config.scope);

        self.spawn_prewarm();

        Ok(ActivateOutcome { deleted, claimed })
    }

    /// Fetch the first few core pages into the page store in the background.
    fn spawn_prewarm(&self) {
        let config = &self.state.config;
        let pages: Vec<Url> = config
            .resolve_all(&config.resources.core_pages)
            .into_iter()
            .take(config.prewarm_pages)
            .collect();
        if pages.is_empty() {
            return;
        }

        let lifecycle = self.clone();
        self.state.tasks.spawn(async move {
            let store = lifecycle.state.names.for_class(ResourceClass::Pages).to_string();
            let report = lifecycle.update_cache(&store, &pages).await;
            debug!(warmed = report.refreshed, failed = report.failed, "Pre-warm finished");
        });
    }

    /// Re-fetch `urls` into `store`. Failures are counted, never returned.
    pub async fn update_cache(&self, store: &str, urls: &[Url]) -> RefreshReport {
        let mut report = RefreshReport::default();
        for (url, result) in self.fetch_all(urls).await {
            match result {
                Ok(response) => {
                    if self.state.cache_put(store, &url, &response).await {
                        report.refreshed += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                Err(reason) => {
                    debug!(url = %url, reason = %reason, "Refresh failed");
                    report.failed += 1;
                }
            }
        }
        self.state.evict(store).await;
        report
    }

    /// Refresh the essential list and the newest pages.
    pub async fn refresh(&self) -> RefreshReport {
        let config = &self.state.config;
        let essentials = config.resolve_all(&config.resources.essential);
        let static_store = self.state.names.for_class(ResourceClass::Static);
        let pages_store = self.state.names.for_class(ResourceClass::Pages);

        let recent: Vec<Url> = {
            let storage = self.state.caches.read().await;
            storage
                .get(pages_store)
                .map(|cache| {
                    let keys = cache.keys();
                    let skip = keys.len().saturating_sub(config.refresh.recent_pages);
                    keys.into_iter()
                        .skip(skip)
                        .filter_map(|k| Url::parse(k).ok())
                        .collect()
                })
                .unwrap_or_default()
        };

        let report = self
            .update_cache(static_store, &essentials)
            .await
            .merge(self.update_cache(pages_store, &recent).await);
        info!(refreshed = report.refreshed, failed = report.failed, "Cache refresh finished");
        report
    }

    /// Fetch one page into the page store, unless it is excluded.
    pub async fn prefetch_page(&self, url: &Url) -> bool {
        if let Some(reason) = self.state.classifier.url_exclusion(url) {
            debug!(url = %url, ?reason, "Prefetch skipped, excluded");
            return false;
        }
        let store = self.state.names.for_class(ResourceClass::Pages);
        self.update_cache(store, std::slice::from_ref(url)).await.refreshed == 1
    }

    /// Run [`Lifecycle::refresh`] on the configured interval.
    pub fn spawn_periodic_refresh(&self) -> Option<JoinHandle<()>> {
        let period = self.state.config.refresh.interval()?;
        let lifecycle = self.clone();

        Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                lifecycle.refresh().await;
            }
        }))
    }
}

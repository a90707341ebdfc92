//! Per-worker state shared by the strategy executor, lifecycle and message handlers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use hashbrown::HashSet;
use pwakit_common::with_timeout;
use pwakit_net::{Fetcher, NetError, Request, Response};
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheEntry, SharedCaches};
use crate::classify::RequestClassifier;
use crate::clients::SharedClients;
use crate::config::{CacheNames, EngineConfig, ResourceClass};
use crate::eviction::{enforce_byte_budget, enforce_limit};
use crate::fallback::OfflineFallback;
use crate::registration::ServiceWorkerId;
use crate::tasks::BackgroundTasks;
use crate::Result;

/// Everything one worker instance owns for its lifetime.
pub struct WorkerState {
    pub id: ServiceWorkerId,
    pub config: EngineConfig,
    pub names: CacheNames,
    pub caches: SharedCaches,
    pub clients: SharedClients,
    pub fetcher: Arc<dyn Fetcher>,
    pub classifier: RequestClassifier,
    pub fallback: OfflineFallback,
    pub tasks: BackgroundTasks,

    /// Cache keys with a background refresh in flight.
    revalidating: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerState")
            .field("id", &self.id)
            .field("version", &self.config.version)
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}

impl WorkerState {
    pub fn new(
        config: EngineConfig,
        caches: SharedCaches,
        clients: SharedClients,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        let classifier = RequestClassifier::new(&config.exclusions)?;
        let fallback = OfflineFallback::new(config.app_name.clone());

        Ok(Self {
            id: ServiceWorkerId::new(),
            names: config.cache_names(),
            config,
            caches,
            clients,
            fetcher,
            classifier,
            fallback,
            tasks: BackgroundTasks::new(),
            revalidating: Mutex::new(HashSet::new()),
        })
    }

    /// Fetch, failing with [`NetError::Timeout`] once `timeout` elapses.
    pub async fn fetch_with_timeout(
        &self,
        request: Request,
        timeout: Duration,
    ) -> std::result::Result<Response, NetError> {
        let request = request.timeout(timeout);
        with_timeout(timeout, self.fetcher.fetch(request)).await?
    }

    /// Store a response, logging instead of failing.
    pub async fn cache_put(&self, store: &str, url: &Url, response: &Response) -> bool {
        let entry = CacheEntry::from_response(url, response);
        match self.caches.write().await.put(store, entry) {
            Ok(()) => {
                debug!(cache = %store, url = %url, "Cached response");
                true
            }
            Err(e) => {
                warn!(cache = %store, url = %url, error = %e, "Cache write failed");
                false
            }
        }
    }

    /// Store a response in the background, then apply the store's limits.
    pub fn spawn_put(self: &Arc<Self>, store: String, url: Url, response: Response) {
        let state = Arc::clone(self);
        self.tasks.spawn(async move {
            if state.cache_put(&store, &url, &response).await {
                state.evict(&store).await;
            }
        });
    }

    /// Apply the entry-count limit of `store` and the shared byte budget.
    pub async fn evict(&self, store: &str) {
        if let Some(max) = self.max_entries(store) {
            enforce_limit(&self.caches, store, max).await;
        }
        let evictable = [
            self.names.for_class(ResourceClass::Images),
            self.names.for_class(ResourceClass::Pages),
            self.names.for_class(ResourceClass::Assets),
        ];
        enforce_byte_budget(&self.caches, &evictable, self.config.limits.max_bytes).await;
    }

    /// Spawn [`WorkerState::evict`].
    pub fn spawn_evict(self: &Arc<Self>, store: String) {
        let state = Arc::clone(self);
        self.tasks.spawn(async move { state.evict(&store).await });
    }

    fn max_entries(&self, store: &str) -> Option<usize> {
        if store == self.names.images {
            Some(self.config.limits.max_images)
        } else if store == self.names.pages {
            Some(self.config.limits.max_pages)
        } else {
            None
        }
    }

    /// Claim a revalidation slot for `key`; `None` if one is already running.
    /// The slot is released when the returned guard drops.
    pub fn begin_revalidation(self: &Arc<Self>, key: String) -> Option<RevalidationSlot> {
        let claimed = self
            .revalidating
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.clone());
        claimed.then(|| RevalidationSlot {
            state: Arc::clone(self),
            key,
        })
    }

    pub fn revalidations_in_flight(&self) -> usize {
        self.revalidating
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// A claimed revalidation key.
pub struct RevalidationSlot {
    state: Arc<WorkerState>,
    key: String,
}

impl Drop for RevalidationSlot {
    fn drop(&mut self) {
        self.state
            .revalidating
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.key);
    }
}

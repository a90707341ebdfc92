//! One worker, backed by a cache snapshot on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use pwakit_net::{Fetcher, Request, Response};
use pwakit_sw::{
    ActivateOutcome, CacheStorage, ClientMessage, Clients, EngineConfig, FetchOutcome, InstallOutcome, MessageReply,
    RefreshReport, ServiceWorkerHandler, SharedCaches, StorefrontWorker,
};
use tracing::{debug, info};

/// What happened to one fetched URL.
#[derive(Debug)]
pub struct FetchReport {
    pub url: String,
    /// `None` when the request was excluded and went straight to the network.
    pub response: Option<Response>,
}

pub struct Host {
    snapshot: PathBuf,
    caches: SharedCaches,
    worker: Arc<StorefrontWorker>,
}

impl Host {
    /// Load the snapshot at `snapshot` (if any) and start a worker over it.
    pub fn open(mut config: EngineConfig, snapshot: &Path, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        // One-shot process; the refresh timer would never fire.
        config.refresh.interval_secs = None;

        let mut storage = CacheStorage::load(snapshot)
            .with_context(|| format!("failed to load cache snapshot {}", snapshot.display()))?;
        storage.set_quota(config.limits.quota_bytes);
        debug!(path = %snapshot.display(), caches = storage.keys().len(), "Snapshot loaded");

        let caches = storage.shared();
        let worker = StorefrontWorker::new(config, Arc::clone(&caches), Clients::new().shared(), fetcher)?;

        Ok(Self {
            snapshot: snapshot.to_path_buf(),
            caches,
            worker: Arc::new(worker),
        })
    }

    pub fn worker(&self) -> &StorefrontWorker {
        &self.worker
    }

    /// Install and activate the configured version.
    pub async fn install(&self) -> Result<(InstallOutcome, ActivateOutcome)> {
        let installed = self.worker.install().await?;
        let activated = self.worker.activate().await?;
        Ok((installed, activated))
    }

    /// Fetch `target` (a URL or a path under the scope) through the worker.
    pub async fn fetch(&self, target: &str, navigate: bool) -> Result<FetchReport> {
        let url = self
            .worker
            .state()
            .config
            .resolve(target)
            .ok_or_else(|| anyhow!("cannot resolve {target}"))?;
        let request = if navigate {
            Request::navigate(url.clone())
        } else {
            Request::get(url.clone())
        };

        let response = match self.worker.fetch(request).await {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::Passthrough => None,
        };
        Ok(FetchReport {
            url: url.to_string(),
            response,
        })
    }

    pub async fn message(&self, message: ClientMessage) -> MessageReply {
        self.worker.message(message).await
    }

    pub async fn refresh(&self) -> Option<RefreshReport> {
        self.worker.periodic_sync(pwakit_sw::worker::UPDATE_CACHE_TAG).await
    }

    /// Wait for background work, then write the snapshot.
    pub async fn persist(&self) -> Result<()> {
        self.worker.settle().await;
        let storage = self.caches.read().await;
        storage
            .save(&self.snapshot)
            .with_context(|| format!("failed to write cache snapshot {}", self.snapshot.display()))?;
        info!(path = %self.snapshot.display(), bytes = storage.total_size(), "Snapshot saved");
        Ok(())
    }
}

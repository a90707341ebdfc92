//! The event interface a container drives, and the storefront worker behind it.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use pwakit_net::{Fetcher, Request, Response};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::cache::SharedCaches;
use crate::clients::SharedClients;
use crate::config::EngineConfig;
use crate::lifecycle::{ActivateOutcome, InstallOutcome, Lifecycle, RefreshReport};
use crate::messages::{handle_message, ClientMessage, MessageReply};
use crate::push::{build_notification, handle_click, Notification, NotificationClickOutcome};
use crate::registration::ServiceWorkerId;
use crate::state::WorkerState;
use crate::strategy::StrategyExecutor;
use crate::Result;

/// Periodic sync tag that triggers a cache refresh.
pub const UPDATE_CACHE_TAG: &str = "update-cache";

/// What a worker did with an intercepted request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Answer with this response.
    Respond(Response),
    /// Let the request go to the network untouched.
    Passthrough,
}

impl FetchOutcome {
    pub fn response(self) -> Option<Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::Passthrough => None,
        }
    }
}

/// One method per worker event. Each returns a description of what happened
/// instead of driving a host directly.
#[async_trait]
pub trait ServiceWorkerHandler: Send + Sync {
    fn id(&self) -> ServiceWorkerId;

    fn version(&self) -> &str;

    fn script_url(&self) -> &Url;

    async fn install(&self) -> Result<InstallOutcome>;

    async fn activate(&self) -> Result<ActivateOutcome>;

    async fn fetch(&self, request: Request) -> FetchOutcome;

    async fn message(&self, message: ClientMessage) -> MessageReply;

    async fn push(&self, payload: Option<Bytes>) -> Notification;

    async fn notification_click(
        &self,
        notification: &Notification,
        action: &str,
    ) -> Result<NotificationClickOutcome>;

    /// `None` when the tag is not one this worker handles.
    async fn periodic_sync(&self, tag: &str) -> Option<RefreshReport>;

    /// Wait for background work spawned so far.
    async fn settle(&self) {}
}

/// The storefront's cache-strategy worker.
pub struct StorefrontWorker {
    state: Arc<WorkerState>,
    executor: StrategyExecutor,
    lifecycle: Lifecycle,
    script_url: Url,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl StorefrontWorker {
    pub fn new(
        config: EngineConfig,
        caches: SharedCaches,
        clients: SharedClients,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        let script_url = config
            .resolve("service-worker.js")
            .unwrap_or_else(|| config.scope.clone());
        let state = Arc::new(WorkerState::new(config, caches, clients, fetcher)?);

        Ok(Self {
            executor: StrategyExecutor::new(Arc::clone(&state)),
            lifecycle: Lifecycle::new(Arc::clone(&state)),
            state,
            script_url,
            refresh_task: Mutex::new(None),
        })
    }

    pub fn with_script_url(mut self, script_url: Url) -> Self {
        self.script_url = script_url;
        self
    }

    pub fn state(&self) -> &Arc<WorkerState> {
        &self.state
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn replace_refresh_task(&self, task: Option<JoinHandle<()>>) {
        let mut slot = self
            .refresh_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(old) = std::mem::replace(&mut *slot, task) {
            old.abort();
        }
    }
}

impl std::fmt::Debug for StorefrontWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorefrontWorker")
            .field("id", &self.state.id)
            .field("version", &self.state.config.version)
            .field("script_url", &self.script_url.as_str())
            .finish()
    }
}

impl Drop for StorefrontWorker {
    fn drop(&mut self) {
        self.replace_refresh_task(None);
    }
}

#[async_trait]
impl ServiceWorkerHandler for StorefrontWorker {
    fn id(&self) -> ServiceWorkerId {
        self.state.id
    }

    fn version(&self) -> &str {
        &self.state.config.version
    }

    fn script_url(&self) -> &Url {
        &self.script_url
    }

    async fn install(&self) -> Result<InstallOutcome> {
        self.lifecycle.install().await
    }

    async fn activate(&self) -> Result<ActivateOutcome> {
        let outcome = self.lifecycle.activate().await?;
        self.replace_refresh_task(self.lifecycle.spawn_periodic_refresh());
        info!(
            version = %self.state.config.version,
            deleted = outcome.deleted.len(),
            claimed = outcome.claimed,
            "Activated"
        );
        Ok(outcome)
    }

    async fn fetch(&self, request: Request) -> FetchOutcome {
        self.executor.handle(request).await
    }

    async fn message(&self, message: ClientMessage) -> MessageReply {
        handle_message(&self.state, &self.lifecycle, message).await
    }

    async fn push(&self, payload: Option<Bytes>) -> Notification {
        let notification = build_notification(&self.state.config.notifications, payload.as_deref());
        debug!(title = %notification.title, "Push received");
        notification
    }

    async fn notification_click(
        &self,
        notification: &Notification,
        action: &str,
    ) -> Result<NotificationClickOutcome> {
        handle_click(
            &self.state.clients,
            self.state.id,
            &self.state.config.scope,
            notification,
            action,
        )
        .await
    }

    async fn periodic_sync(&self, tag: &str) -> Option<RefreshReport> {
        if tag != UPDATE_CACHE_TAG {
            debug!(tag, "Ignoring periodic sync");
            return None;
        }
        Some(self.lifecycle.refresh().await)
    }

    async fn settle(&self) {
        self.state.tasks.settle().await;
    }
}

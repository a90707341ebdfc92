//! Service worker container: registration, promotion and event routing.

use std::sync::Arc;

use bytes::Bytes;
use hashbrown::HashMap;
use pwakit_net::{Fetcher, NetError, Request, Response};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::SharedCaches;
use crate::clients::SharedClients;
use crate::lifecycle::RefreshReport;
use crate::messages::{ClientMessage, MessageReply};
use crate::push::{Notification, NotificationClickOutcome};
use crate::registration::{ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};
use crate::worker::{FetchOutcome, ServiceWorkerHandler};
use crate::{Result, ServiceWorkerError};

/// Service worker events.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceWorkerEvent {
    /// A new version started installing.
    UpdateFound { worker: ServiceWorkerId, version: String },
    /// State changed.
    StateChange {
        worker: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// A different worker now controls the scope's pages.
    ControllerChange { worker: ServiceWorkerId },
}

/// Owns the registration for one scope and the workers behind it.
pub struct ServiceWorkerContainer {
    registration: RwLock<ServiceWorkerRegistration>,

    handlers: RwLock<HashMap<ServiceWorkerId, Arc<dyn ServiceWorkerHandler>>>,

    caches: SharedCaches,

    clients: SharedClients,

    /// Used for requests no worker answers.
    network: Arc<dyn Fetcher>,

    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new(
        scope: Url,
        caches: SharedCaches,
        clients: SharedClients,
        network: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                registration: RwLock::new(ServiceWorkerRegistration::new(scope)),
                handlers: RwLock::new(HashMap::new()),
                caches,
                clients,
                network,
                event_tx,
            },
            event_rx,
        )
    }

    pub fn caches(&self) -> &SharedCaches {
        &self.caches
    }

    pub fn clients(&self) -> &SharedClients {
        &self.clients
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn state_change(&self, worker: ServiceWorkerId, new_state: ServiceWorkerState) {
        self.emit(ServiceWorkerEvent::StateChange { worker, new_state });
    }

    /// Install a new worker version.
    ///
    /// A failed install leaves the current active worker in control. A
    /// successful one is activated straight away when it asks to skip waiting
    /// or when nothing is active yet; otherwise it stays waiting.
    pub async fn register(&self, handler: Arc<dyn ServiceWorkerHandler>) -> Result<ServiceWorkerState> {
        let id = handler.id();
        let worker = ServiceWorker::new(id, handler.script_url().clone(), handler.version());
        info!(worker = %id, version = %handler.version(), "Registering worker");

        {
            let mut registration = self.registration.write().await;
            if worker.script_url.origin() != registration.scope.origin() {
                return Err(ServiceWorkerError::RegistrationFailed(format!(
                    "script {} is outside scope {}",
                    worker.script_url, registration.scope
                )));
            }
            registration.update(worker);
        }
        self.handlers.write().await.insert(id, Arc::clone(&handler));
        self.emit(ServiceWorkerEvent::UpdateFound {
            worker: id,
            version: handler.version().to_string(),
        });
        self.state_change(id, ServiceWorkerState::Installing);

        let outcome = match handler.install().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(worker = %id, error = %e, "Install failed, keeping current worker");
                self.registration.write().await.install_failed(e.to_string());
                self.handlers.write().await.remove(&id);
                self.state_change(id, ServiceWorkerState::Redundant);
                return Err(e);
            }
        };

        let (superseded, nothing_active) = {
            let mut registration = self.registration.write().await;
            (registration.install_complete(), registration.active.is_none())
        };
        if let Some(old) = superseded {
            self.retire(old).await;
        }
        self.state_change(id, ServiceWorkerState::Installed);

        if outcome.skip_waiting || nothing_active {
            self.activate_waiting().await?;
            Ok(ServiceWorkerState::Activated)
        } else {
            Ok(ServiceWorkerState::Installed)
        }
    }

    async fn retire(&self, worker: ServiceWorker) {
        self.handlers.write().await.remove(&worker.id);
        self.clients.write().await.release(worker.id);
        self.state_change(worker.id, ServiceWorkerState::Redundant);
    }

    async fn activate_waiting(&self) -> Result<()> {
        let id = self
            .registration
            .write()
            .await
            .begin_activation()
            .ok_or_else(|| ServiceWorkerError::State("no waiting worker".to_string()))?;
        self.state_change(id, ServiceWorkerState::Activating);

        let handler = self
            .handlers
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("worker {id}")))?;

        if let Err(e) = handler.activate().await {
            warn!(worker = %id, error = %e, "Activation failed");
            self.registration.write().await.activation_failed(e.to_string());
            self.handlers.write().await.remove(&id);
            self.state_change(id, ServiceWorkerState::Redundant);
            return Err(e);
        }

        let retired = self.registration.write().await.activate();
        if let Some(old) = retired {
            self.handlers.write().await.remove(&old.id);
            self.state_change(old.id, ServiceWorkerState::Redundant);
        }
        self.state_change(id, ServiceWorkerState::Activated);
        self.emit(ServiceWorkerEvent::ControllerChange { worker: id });
        info!(worker = %id, "Worker activated");
        Ok(())
    }

    /// Promote the waiting worker, if any. Returns whether one was promoted.
    pub async fn skip_waiting(&self) -> Result<bool> {
        if self.registration.read().await.waiting.is_none() {
            return Ok(false);
        }
        self.activate_waiting().await?;
        Ok(true)
    }

    /// Remove every worker from the scope.
    pub async fn unregister(&self) -> usize {
        let retired = self.registration.write().await.unregister();
        let mut clients = self.clients.write().await;
        for worker in &retired {
            clients.release(worker.id);
            self.state_change(worker.id, ServiceWorkerState::Redundant);
        }
        self.handlers.write().await.clear();
        retired.len()
    }

    pub async fn active(&self) -> Option<ServiceWorker> {
        self.registration.read().await.active.clone()
    }

    pub async fn waiting(&self) -> Option<ServiceWorker> {
        self.registration.read().await.waiting.clone()
    }

    async fn active_handler(&self) -> Option<Arc<dyn ServiceWorkerHandler>> {
        let id = self.registration.read().await.active_id()?;
        self.handlers.read().await.get(&id).cloned()
    }

    async fn require_active(&self) -> Result<Arc<dyn ServiceWorkerHandler>> {
        self.active_handler()
            .await
            .ok_or_else(|| ServiceWorkerError::State("no active worker".to_string()))
    }

    /// Route a request through the active worker, or straight to the network.
    pub async fn handle_fetch(&self, request: Request) -> std::result::Result<Response, NetError> {
        let Some(handler) = self.active_handler().await else {
            debug!(url = %request.url, "No active worker, going to network");
            return self.network.fetch(request).await;
        };

        match handler.fetch(request.clone()).await {
            FetchOutcome::Respond(response) => Ok(response),
            FetchOutcome::Passthrough => self.network.fetch(request).await,
        }
    }

    /// Deliver a page message. `SKIP_WAITING` is handled here.
    pub async fn post_message(&self, message: ClientMessage) -> Result<MessageReply> {
        if message == ClientMessage::SkipWaiting {
            return Ok(if self.skip_waiting().await? {
                MessageReply::ok("waiting worker activated")
            } else {
                MessageReply::failed("no waiting worker")
            });
        }
        Ok(self.require_active().await?.message(message).await)
    }

    pub async fn push(&self, payload: Option<Bytes>) -> Result<Notification> {
        Ok(self.require_active().await?.push(payload).await)
    }

    pub async fn notification_click(
        &self,
        notification: &Notification,
        action: &str,
    ) -> Result<NotificationClickOutcome> {
        self.require_active()
            .await?
            .notification_click(notification, action)
            .await
    }

    pub async fn periodic_sync(&self, tag: &str) -> Result<Option<RefreshReport>> {
        Ok(self.require_active().await?.periodic_sync(tag).await)
    }

    /// Wait for every live worker's background work.
    pub async fn settle(&self) {
        let handlers: Vec<_> = self.handlers.read().await.values().cloned().collect();
        for handler in handlers {
            handler.settle().await;
        }
    }
}

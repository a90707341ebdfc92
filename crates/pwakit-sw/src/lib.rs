//! # PwaKit Service Worker
//!
//! Offline cache-strategy engine for a PWA storefront.
//!
//! ## Features
//!
//! - **Classification**: exclusion rules and per-request strategy selection
//! - **Strategies**: network-first, cache-first, stale-while-revalidate, cache-only
//! - **Cache API**: versioned named stores with FIFO eviction
//! - **Lifecycle**: install, activate, periodic refresh
//! - **Offline fallbacks**: cached documents with a banner, SVG placeholders
//! - **Messaging**: `UPDATE_CACHE`, `CLEAR_CACHE`, `GET_STATS`, `PREFETCH_PAGE`, `SKIP_WAITING`
//! - **Push**: notification building and click routing
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer
//!     ├── ServiceWorkerRegistration
//!     │       ├── installing / waiting / active (ServiceWorker)
//!     │       └── scope
//!     ├── SharedCaches ──► CacheStorage ──► Cache (URL → CacheEntry)
//!     └── handlers: ServiceWorkerHandler (StorefrontWorker)
//!             └── WorkerState
//!                     ├── RequestClassifier
//!                     ├── StrategyExecutor ──► OfflineFallback
//!                     ├── Lifecycle
//!                     └── BackgroundTasks
//! ```

use thiserror::Error;

pub mod cache;
pub mod classify;
pub mod clients;
pub mod config;
pub mod container;
pub mod eviction;
pub mod fallback;
pub mod lifecycle;
pub mod messages;
pub mod push;
pub mod registration;
pub mod rewrite;
pub mod state;
pub mod strategy;
pub mod tasks;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheError, CacheStorage, MatchOptions, SharedCaches};
pub use classify::{Classification, ExclusionReason, RequestClassifier, Strategy};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients, SharedClients};
pub use config::{CacheNames, EngineConfig, InstallPolicy, ResourceClass};
pub use container::{ServiceWorkerContainer, ServiceWorkerEvent};
pub use fallback::{OfflineFallback, PlaceholderKind};
pub use lifecycle::{ActivateOutcome, InstallOutcome, Lifecycle, RefreshReport};
pub use messages::{ClientMessage, MessageReply, StoreStats};
pub use push::{Notification, NotificationAction, NotificationClickOutcome, NotificationData};
pub use registration::{ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};
pub use state::WorkerState;
pub use strategy::StrategyExecutor;
pub use tasks::BackgroundTasks;
pub use worker::{FetchOutcome, ServiceWorkerHandler, StorefrontWorker};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("State error: {0}")]
    State(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Invalid exclusion pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl From<pwakit_common::PwaKitError> for ServiceWorkerError {
    fn from(err: pwakit_common::PwaKitError) -> Self {
        match err {
            pwakit_common::PwaKitError::NotFound(what) => ServiceWorkerError::NotFound(what),
            pwakit_common::PwaKitError::Config { message, .. } => ServiceWorkerError::Config(message),
            other => ServiceWorkerError::State(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceWorkerError>;

//! # PwaKit Tracker
//!
//! Client for the storefront's visit logger and ban list.
//!
//! The logger accepts `POST <endpoint>` with a [`VisitPayload`] and answers
//! with a [`VisitReceipt`], or a `{error, message}` object and a non-2xx
//! status. The ban list is a static JSON document clients fetch to skip
//! logging visitors the server already refuses.

pub mod types;

use std::time::Duration;

use pwakit_common::{retry_with_backoff_if, RetryConfig};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

pub use types::*;

/// Errors from the tracker client.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Rejected with status {status}: {error}")]
    Rejected {
        status: u16,
        error: String,
        message: Option<String>,
    },
}

impl TrackerError {
    /// Connection problems and server-side failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            TrackerError::Http(e) => e.is_timeout() || e.is_connect(),
            TrackerError::Rejected { status, .. } => *status >= 500,
            TrackerError::Decode(_) => false,
        }
    }
}

/// Tracker client configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Visit logger endpoint.
    pub endpoint: Url,
    /// Ban list document.
    pub ban_list_url: Url,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl TrackerConfig {
    /// Endpoints at their usual paths under `base`.
    pub fn for_site(base: &Url) -> Result<Self, url::ParseError> {
        Ok(Self {
            endpoint: base.join("api/tracker.php")?,
            ban_list_url: base.join("data/banned_visitors.json")?,
            timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        })
    }
}

/// Posts visits and reads the ban list.
pub struct TrackerClient {
    client: Client,
    config: TrackerConfig,
}

impl TrackerClient {
    pub fn new(config: TrackerConfig) -> Result<Self, TrackerError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        info!(endpoint = %config.endpoint, "Tracker client initialized");
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Record a visit, retrying transient failures with backoff.
    pub async fn record_visit(&self, payload: &VisitPayload) -> Result<VisitReceipt, TrackerError> {
        let receipt = retry_with_backoff_if(
            &self.config.retry,
            || self.post_once(payload),
            TrackerError::is_transient,
        )
        .await?;

        if receipt.data.banned {
            warn!(visitor = %payload.visitor.visitor_id, "Visitor is banned");
        }
        debug!(visit_id = %receipt.data.visit_id, action = %payload.action, "Visit recorded");
        Ok(receipt)
    }

    async fn post_once(&self, payload: &VisitPayload) -> Result<VisitReceipt, TrackerError> {
        let response = self
            .client
            .post(self.config.endpoint.clone())
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let rejection: Rejection = serde_json::from_slice(&body).unwrap_or_default();
            return Err(TrackerError::Rejected {
                status: status.as_u16(),
                error: rejection.error,
                message: rejection.message,
            });
        }

        Ok(serde_json::from_slice(&body)?)
    }

    /// Fetch the ban list. A missing document means nobody is banned.
    pub async fn fetch_ban_list(&self) -> Result<BanList, TrackerError> {
        let response = self.client.get(self.config.ban_list_url.clone()).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(url = %self.config.ban_list_url, "No ban list published");
            return Ok(BanList::default());
        }

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(TrackerError::Rejected {
                status: status.as_u16(),
                error: String::from_utf8_lossy(&body).into_owned(),
                message: None,
            });
        }

        let list: BanList = serde_json::from_slice(&body)?;
        debug!(entries = list.len(), "Ban list loaded");
        Ok(list)
    }
}

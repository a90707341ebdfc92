//! Push notifications and notification clicks.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::clients::{Client, ClientMatchOptions, ClientType, SharedClients};
use crate::config::NotificationDefaults;
use crate::registration::ServiceWorkerId;
use crate::Result;

const VIBRATE_PATTERN: [u32; 5] = [200, 100, 200, 100, 200];

/// Data attached to a notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    /// Page to open on click.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Anything else the sender attached (product ids, type, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// A notification ready to be shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub vibrate: Vec<u32>,
    pub actions: Vec<NotificationAction>,
    pub require_interaction: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub data: NotificationData,
}

#[derive(Debug, Default, Deserialize)]
struct PushPayload {
    title: Option<String>,
    body: Option<String>,
    icon: Option<String>,
    data: Option<NotificationData>,
}

/// Build a notification from a push payload, filling gaps from `defaults`.
///
/// A missing or non-JSON payload yields the default notification.
pub fn build_notification(defaults: &NotificationDefaults, payload: Option<&[u8]>) -> Notification {
    let payload = match payload {
        Some(bytes) if !bytes.is_empty() => serde_json::from_slice::<PushPayload>(bytes)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Push payload is not JSON, using defaults");
                PushPayload::default()
            }),
        _ => PushPayload::default(),
    };

    let mut data = payload.data.unwrap_or_default();
    if data.url.is_none() {
        data.url = Some(defaults.url.clone());
    }

    Notification {
        title: payload.title.unwrap_or_else(|| defaults.title.clone()),
        body: payload.body.unwrap_or_else(|| defaults.body.clone()),
        icon: payload.icon.unwrap_or_else(|| defaults.icon.clone()),
        badge: defaults.badge.clone(),
        tag: defaults.tag.clone(),
        vibrate: VIBRATE_PATTERN.to_vec(),
        actions: vec![
            NotificationAction {
                action: "open".into(),
                title: "Open app".into(),
            },
            NotificationAction {
                action: "close".into(),
                title: "Close".into(),
            },
        ],
        require_interaction: true,
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default(),
        data,
    }
}

/// What a notification click did.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationClickOutcome {
    /// An existing window under the scope was focused.
    Focused(Client),
    /// A new window was opened.
    Opened(Client),
    /// The notification was only closed.
    Dismissed,
}

/// Route a click: focus an open app window, or open the notification's URL.
pub async fn handle_click(
    clients: &SharedClients,
    worker: ServiceWorkerId,
    scope: &Url,
    notification: &Notification,
    action: &str,
) -> Result<NotificationClickOutcome> {
    if action != "open" && !action.is_empty() {
        debug!(action, "Notification dismissed");
        return Ok(NotificationClickOutcome::Dismissed);
    }

    let mut clients = clients.write().await;
    let existing = clients
        .match_all(
            worker,
            ClientMatchOptions {
                include_uncontrolled: true,
                client_type: ClientType::Window,
            },
        )
        .into_iter()
        .find(|c| c.url.as_str().starts_with(scope.as_str()))
        .map(|c| c.id.clone());

    if let Some(id) = existing {
        return Ok(NotificationClickOutcome::Focused(clients.focus(&id)?));
    }

    let target = notification.data.url.as_deref().unwrap_or("");
    let url = scope
        .join(target)
        .map_err(|e| crate::ServiceWorkerError::InvalidMessage(format!("{target}: {e}")))?;
    Ok(NotificationClickOutcome::Opened(clients.open_window(url)))
}

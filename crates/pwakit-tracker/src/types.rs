//! Wire types for the visit logger and ban list.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Who is visiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visitor {
    pub fingerprint: String,
    pub visitor_id: String,
    pub session_id: String,
}

/// The page being viewed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageInfo {
    pub title: String,
    pub url: String,
    pub path: String,
    pub hostname: String,
    pub protocol: String,
}

/// Engagement on the current page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionInfo {
    pub page: Option<PageInfo>,
    pub entry_time: Option<DateTime<Utc>>,
    pub exit_time: Option<DateTime<Utc>>,
    /// Seconds between entry and exit.
    pub time_spent: u64,
    /// Percent of the page scrolled.
    pub scroll_depth: u32,
    pub clicks: u32,
    pub mouse_movements: u32,
}

impl SessionInfo {
    /// A session entering `page` now.
    pub fn started(page: PageInfo) -> Self {
        Self {
            page: Some(page),
            entry_time: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Close the session at `exit`, rounding the time spent to whole seconds.
    pub fn finish(&mut self, exit: DateTime<Utc>) {
        self.exit_time = Some(exit);
        if let Some(entry) = self.entry_time {
            let millis = (exit - entry).num_milliseconds().max(0) as u64;
            self.time_spent = (millis + 500) / 1000;
        }
    }
}

/// Running totals for the visitor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VisitStatistics {
    pub visit_count: u32,
    pub total_time_spent: u64,
    pub average_time_per_page: f64,
}

/// Body of `POST <endpoint>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitPayload {
    /// What triggered the save, e.g. `page_exit` or `auto_save`.
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub visitor: Visitor,
    pub session: SessionInfo,
    pub statistics: VisitStatistics,
    pub page_info: PageInfo,
    /// Free-form device details; the logger stores them as-is.
    #[serde(default)]
    pub device_info: serde_json::Map<String, serde_json::Value>,
}

impl VisitPayload {
    pub fn new(action: impl Into<String>, visitor: Visitor, page_info: PageInfo) -> Self {
        Self {
            action: action.into(),
            timestamp: Utc::now(),
            visitor,
            session: SessionInfo::started(page_info.clone()),
            statistics: VisitStatistics::default(),
            page_info,
            device_info: serde_json::Map::new(),
        }
    }

    pub fn with_session(mut self, session: SessionInfo) -> Self {
        self.session = session;
        self
    }

    pub fn with_statistics(mut self, statistics: VisitStatistics) -> Self {
        self.statistics = statistics;
        self
    }

    pub fn with_device_info(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.device_info.insert(key.into(), value.into());
        self
    }
}

/// What the logger recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitRecord {
    pub saved: bool,
    pub banned: bool,
    pub visit_id: String,
}

/// Successful logger response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitReceipt {
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<FixedOffset>,
    pub data: VisitRecord,
}

/// Error object returned with a non-2xx status.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Rejection {
    pub error: String,
    pub message: Option<String>,
}

/// One banned visitor. Either field may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BannedVisitor {
    pub fingerprint: String,
    pub visitor_id: String,
}

/// Visitors the logger refuses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BanList {
    pub banned: Vec<BannedVisitor>,
}

impl BanList {
    /// Banned when either the fingerprint or the visitor id matches an entry.
    pub fn is_banned(&self, fingerprint: &str, visitor_id: &str) -> bool {
        self.banned.iter().any(|entry| {
            (!entry.fingerprint.is_empty() && entry.fingerprint == fingerprint)
                || (!entry.visitor_id.is_empty() && entry.visitor_id == visitor_id)
        })
    }

    pub fn len(&self) -> usize {
        self.banned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.banned.is_empty()
    }
}

//! Cache API.
//!
//! [`CacheStorage`] holds named [`Cache`]s; each cache maps a request URL to a
//! buffered response snapshot. Caches remember insertion order explicitly so
//! eviction can always find the oldest entries.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hashbrown::HashMap;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use pwakit_common::PwaKitError;
use pwakit_net::{Response, ResponseSource};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

/// Cache storage shared by every worker of a container.
pub type SharedCaches = Arc<RwLock<CacheStorage>>;

/// Errors raised by cache storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache not found: {0}")]
    NotFound(String),

    #[error("Quota exceeded: {needed} bytes requested, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

/// Options for [`Cache::match_request`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    /// Compare URLs without their query string.
    pub ignore_search: bool,
}

impl MatchOptions {
    pub fn ignore_search() -> Self {
        Self { ignore_search: true }
    }
}

/// Key a URL is stored under: the URL without its fragment.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

fn without_query(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.set_query(None);
    url.to_string()
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL (the cache key).
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers, in order.
    pub headers: Vec<(String, String)>,

    /// Response body.
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response for storage under `url`.
    pub fn from_response(url: &Url, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: cache_key(url),
            method: "GET".to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.clone(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild a response marked as served from cache.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }

        Response {
            url: Url::parse(&self.url).ok(),
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers,
            body: self.body.clone(),
            source: ResponseSource::Cache,
        }
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Size used for accounting: declared length, else the body length.
    pub fn size(&self) -> u64 {
        self.header(CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(self.body.len() as u64)
    }

    /// Whether the stored response is an HTML document.
    pub fn is_html(&self) -> bool {
        self.header("content-type")
            .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
            .unwrap_or(false)
    }

    /// Parsed URL of the entry.
    pub fn parsed_url(&self) -> Option<Url> {
        Url::parse(&self.url).ok()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A named cache.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<String, CacheEntry>,

    /// Keys in insertion order, oldest first.
    order: Vec<String>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Store an entry. Overwriting moves the key to the newest position.
    pub fn put(&mut self, entry: CacheEntry) {
        let key = entry.url.clone();
        if self.entries.insert(key.clone(), entry).is_some() {
            self.order.retain(|k| k != &key);
        }
        self.order.push(key);
    }

    /// Match a request URL.
    pub fn match_request(&self, url: &Url, options: MatchOptions) -> Option<&CacheEntry> {
        if !options.ignore_search {
            return self.entries.get(&cache_key(url));
        }

        let wanted = without_query(url);
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k))
            .find(|e| e.parsed_url().is_some_and(|u| without_query(&u) == wanted))
    }

    /// Entry by exact key.
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &str) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    /// Keys in insertion order, oldest first.
    pub fn keys(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    /// Entries in insertion order, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.order.iter().filter_map(|k| self.entries.get(k))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of entry sizes.
    pub fn approximate_size(&self) -> u64 {
        self.entries.values().map(CacheEntry::size).sum()
    }
}

#[derive(Serialize, Deserialize)]
struct StorageSnapshot {
    caches: Vec<CacheSnapshot>,
}

#[derive(Serialize, Deserialize)]
struct CacheSnapshot {
    name: String,
    entries: Vec<CacheEntry>,
}

/// Cache storage (the `caches` global).
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,

    /// Cache names in creation order.
    order: Vec<String>,

    /// Byte budget across all caches.
    quota: Option<u64>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that rejects puts beyond `quota` bytes.
    pub fn with_quota(quota: u64) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    pub fn set_quota(&mut self, quota: Option<u64>) {
        self.quota = quota;
    }

    /// Wrap for sharing between workers.
    pub fn shared(self) -> SharedCaches {
        Arc::new(RwLock::new(self))
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        if !self.caches.contains_key(name) {
            debug!(cache = %name, "Creating cache");
            self.order.push(name.to_string());
        }
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Cache> {
        self.caches.get_mut(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        if self.caches.remove(name).is_some() {
            self.order.retain(|n| n != name);
            true
        } else {
            false
        }
    }

    /// Cache names in creation order.
    pub fn keys(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    /// Caches in creation order.
    pub fn caches(&self) -> impl Iterator<Item = &Cache> {
        self.order.iter().filter_map(|n| self.caches.get(n))
    }

    /// Match across all caches, oldest cache first. Returns the holding cache's name.
    pub fn match_request(&self, url: &Url, options: MatchOptions) -> Option<(&str, &CacheEntry)> {
        self.caches().find_map(|cache| {
            cache
                .match_request(url, options)
                .map(|entry| (cache.name.as_str(), entry))
        })
    }

    /// Store an entry in `name`, creating the cache when needed.
    pub fn put(&mut self, name: &str, entry: CacheEntry) -> Result<(), CacheError> {
        if let Some(quota) = self.quota {
            let replaced = self
                .caches
                .get(name)
                .and_then(|c| c.get(&entry.url))
                .map(CacheEntry::size)
                .unwrap_or(0);
            let used = self.total_size().saturating_sub(replaced);
            let needed = entry.size();
            if used + needed > quota {
                return Err(CacheError::QuotaExceeded {
                    needed,
                    available: quota.saturating_sub(used),
                });
            }
        }

        self.open(name).put(entry);
        Ok(())
    }

    /// Sum of every cache's size.
    pub fn total_size(&self) -> u64 {
        self.caches.values().map(Cache::approximate_size).sum()
    }

    /// Serialize every cache to JSON.
    pub fn to_json(&self) -> Result<String, CacheError> {
        let snapshot = StorageSnapshot {
            caches: self
                .caches()
                .map(|c| CacheSnapshot {
                    name: c.name.clone(),
                    entries: c.entries().cloned().collect(),
                })
                .collect(),
        };
        serde_json::to_string(&snapshot).map_err(|e| CacheError::Snapshot(e.to_string()))
    }

    /// Restore storage from [`CacheStorage::to_json`] output.
    pub fn from_json(json: &str) -> Result<Self, CacheError> {
        let snapshot: StorageSnapshot =
            serde_json::from_str(json).map_err(|e| CacheError::Snapshot(e.to_string()))?;

        let mut storage = Self::new();
        for cache in snapshot.caches {
            let target = storage.open(&cache.name);
            for entry in cache.entries {
                target.put(entry);
            }
        }
        Ok(storage)
    }

    /// Write a JSON snapshot to disk.
    pub fn save(&self, path: &Path) -> pwakit_common::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| PwaKitError::cache(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a snapshot from disk; a missing file yields empty storage.
    pub fn load(path: &Path) -> pwakit_common::Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(|e| PwaKitError::cache(e.to_string()))
    }
}

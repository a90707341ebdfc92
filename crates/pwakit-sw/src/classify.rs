//! Request classification.
//!
//! Every intercepted request is either excluded (the engine stays out of the
//! way entirely) or tagged with a [`Strategy`] and the store it writes to.
//! Classification is a pure function of method, URL and `Accept` header.

use http::Method;
use pwakit_net::Request;
use regex::Regex;
use tracing::trace;
use url::Url;

use crate::config::{ExclusionConfig, ResourceClass};

const NETWORK_FIRST_EXTENSIONS: &[&str] = &["html", "htm", "php", "aspx"];
const CACHE_FIRST_EXTENSIONS: &[&str] = &["css", "js", "woff", "woff2", "ttf", "eot"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "ico", "webp"];
const CACHE_ONLY_EXTENSIONS: &[&str] = &["json", "webmanifest", "manifest"];
const CACHE_ONLY_MARKERS: &[&str] = &["manifest", "service-worker"];

/// Cache strategy for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    NetworkFirst,
    CacheFirst,
    StaleWhileRevalidate,
    CacheOnly,
    /// Network with an opportunistic cache fallback, never written back.
    Default,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::NetworkFirst => "network-first",
            Strategy::CacheFirst => "cache-first",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
            Strategy::CacheOnly => "cache-only",
            Strategy::Default => "default",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request bypasses the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionReason {
    /// Only GET is ever cached.
    Method(Method),
    /// Matched a deny pattern.
    Pattern(String),
    /// `?query` longer than the configured threshold.
    QueryTooLong(usize),
}

/// Outcome of classifying one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Excluded(ExclusionReason),
    Cached {
        strategy: Strategy,
        store: ResourceClass,
    },
}

impl Classification {
    pub fn is_excluded(&self) -> bool {
        matches!(self, Classification::Excluded(_))
    }

    pub fn strategy(&self) -> Option<Strategy> {
        match self {
            Classification::Cached { strategy, .. } => Some(*strategy),
            Classification::Excluded(_) => None,
        }
    }
}

/// Compiled exclusion rules plus the strategy table.
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    patterns: Vec<Regex>,
    max_query_length: usize,
}

impl RequestClassifier {
    /// Compile the configured deny patterns.
    pub fn new(config: &ExclusionConfig) -> Result<Self, regex::Error> {
        let patterns = config
            .patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            patterns,
            max_query_length: config.max_query_length,
        })
    }

    /// Classify a request.
    pub fn classify(&self, request: &Request) -> Classification {
        if let Some(reason) = self.exclusion(request) {
            trace!(url = %request.url, ?reason, "Request excluded");
            return Classification::Excluded(reason);
        }

        let strategy = select_strategy(request);
        let store = target_store(strategy, &request.url);
        trace!(url = %request.url, %strategy, store = store.as_str(), "Request classified");

        Classification::Cached { strategy, store }
    }

    /// Exclusion check alone, for callers that only need a yes/no.
    pub fn exclusion(&self, request: &Request) -> Option<ExclusionReason> {
        if request.method != Method::GET {
            return Some(ExclusionReason::Method(request.method.clone()));
        }
        self.url_exclusion(&request.url)
    }

    /// URL-only exclusion check, used for URLs that come from messages.
    pub fn url_exclusion(&self, url: &Url) -> Option<ExclusionReason> {
        let lowered = url.as_str().to_lowercase();
        if let Some(pattern) = self.patterns.iter().find(|p| p.is_match(&lowered)) {
            return Some(ExclusionReason::Pattern(pattern.as_str().to_string()));
        }

        let query_len = url.query().map(|q| q.len() + 1).unwrap_or(0);
        if query_len > self.max_query_length {
            return Some(ExclusionReason::QueryTooLong(query_len));
        }

        None
    }
}

/// Lowercased extension of the last path segment.
pub(crate) fn extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() && ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn select_strategy(request: &Request) -> Strategy {
    let ext = extension(&request.url);
    let has_ext = |list: &[&str]| ext.as_deref().is_some_and(|e| list.contains(&e));
    let accept = request.accept().unwrap_or_default().to_ascii_lowercase();

    if has_ext(NETWORK_FIRST_EXTENSIONS) || accept.contains("text/html") || request.is_navigation() {
        return Strategy::NetworkFirst;
    }
    if has_ext(CACHE_FIRST_EXTENSIONS) {
        return Strategy::CacheFirst;
    }
    if has_ext(IMAGE_EXTENSIONS) || accept.contains("image/") {
        return Strategy::StaleWhileRevalidate;
    }

    let path = request.url.path().to_ascii_lowercase();
    if has_ext(CACHE_ONLY_EXTENSIONS) || CACHE_ONLY_MARKERS.iter().any(|m| path.contains(m)) {
        return Strategy::CacheOnly;
    }

    Strategy::Default
}

fn target_store(strategy: Strategy, url: &Url) -> ResourceClass {
    match strategy {
        Strategy::NetworkFirst => ResourceClass::Pages,
        Strategy::StaleWhileRevalidate => ResourceClass::Images,
        Strategy::CacheFirst => match extension(url).as_deref() {
            Some("css") | Some("js") => ResourceClass::Assets,
            _ => ResourceClass::Static,
        },
        Strategy::CacheOnly | Strategy::Default => ResourceClass::Static,
    }
}

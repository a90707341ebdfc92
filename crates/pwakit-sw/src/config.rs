//! Engine configuration.
//!
//! One [`EngineConfig`] describes one worker version: which stores it owns,
//! what it pre-caches, its limits and timeouts, and which of the optional
//! behaviours (lenient install, image URL optimisation) are switched on.

use std::path::Path;
use std::time::Duration;

use pwakit_common::PwaKitError;
use serde::{Deserialize, Serialize};
use url::Url;

/// Resource classes, one cache store each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Static,
    Pages,
    Images,
    Assets,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 4] = [
        ResourceClass::Static,
        ResourceClass::Pages,
        ResourceClass::Images,
        ResourceClass::Assets,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Static => "static",
            ResourceClass::Pages => "pages",
            ResourceClass::Images => "images",
            ResourceClass::Assets => "assets",
        }
    }
}

/// Versioned store names derived from the app name and version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
    pub static_assets: String,
    pub pages: String,
    pub images: String,
    pub assets: String,
}

impl CacheNames {
    pub fn new(app: &str, version: &str) -> Self {
        let name = |class: ResourceClass| format!("{app}-{}-{version}", class.as_str());
        Self {
            static_assets: name(ResourceClass::Static),
            pages: name(ResourceClass::Pages),
            images: name(ResourceClass::Images),
            assets: name(ResourceClass::Assets),
        }
    }

    /// Store name for a resource class.
    pub fn for_class(&self, class: ResourceClass) -> &str {
        match class {
            ResourceClass::Static => &self.static_assets,
            ResourceClass::Pages => &self.pages,
            ResourceClass::Images => &self.images,
            ResourceClass::Assets => &self.assets,
        }
    }

    /// Every store name of this version, in class order.
    pub fn all(&self) -> Vec<&str> {
        ResourceClass::ALL.iter().map(|c| self.for_class(*c)).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.all().contains(&name)
    }
}

/// What happens when one essential resource fails to download during install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallPolicy {
    /// Abort the whole install; the previous worker keeps control.
    #[default]
    Strict,
    /// Cache what succeeded and carry on.
    Lenient,
}

/// Resource lists, as paths relative to the scope or absolute URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLists {
    /// Pre-cached into the static store at install.
    pub essential: Vec<String>,
    /// Secondary pages, pre-warmed after activation.
    pub core_pages: Vec<String>,
    /// Third-party dependencies, cached best-effort at install.
    pub dependencies: Vec<String>,
}

impl Default for ResourceLists {
    fn default() -> Self {
        Self {
            essential: vec![
                "/".into(),
                "/index.html".into(),
                "/manifest.json".into(),
                "/css/main.css".into(),
                "/favicon.ico".into(),
            ],
            core_pages: vec![
                "/products.html".into(),
                "/merchants.html".into(),
                "/offers.html".into(),
                "/help.html".into(),
                "/cart.html".into(),
                "/account.html".into(),
            ],
            dependencies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheLimits {
    pub max_images: usize,
    pub max_pages: usize,
    /// Soft budget across the evictable stores.
    pub max_bytes: u64,
    /// Hard storage quota; writes that would exceed it are rejected.
    pub quota_bytes: Option<u64>,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_images: 50,
            max_pages: 30,
            max_bytes: 200 * 1024 * 1024,
            quota_bytes: None,
        }
    }
}

/// Timeouts and delays, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub network_first_ms: u64,
    pub image_fetch_ms: u64,
    pub image_revalidate_delay_ms: u64,
    pub asset_revalidate_delay_ms: u64,
    pub install_watchdog_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            network_first_ms: 5_000,
            image_fetch_ms: 10_000,
            image_revalidate_delay_ms: 1_000,
            asset_revalidate_delay_ms: 2_000,
            install_watchdog_ms: 60_000,
        }
    }
}

impl Timeouts {
    pub fn network_first(&self) -> Duration {
        Duration::from_millis(self.network_first_ms)
    }

    pub fn image_fetch(&self) -> Duration {
        Duration::from_millis(self.image_fetch_ms)
    }

    pub fn image_revalidate_delay(&self) -> Duration {
        Duration::from_millis(self.image_revalidate_delay_ms)
    }

    pub fn asset_revalidate_delay(&self) -> Duration {
        Duration::from_millis(self.asset_revalidate_delay_ms)
    }

    pub fn install_watchdog(&self) -> Duration {
        Duration::from_millis(self.install_watchdog_ms)
    }
}

/// Requests the engine never touches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionConfig {
    /// Regular expressions matched against the lowercased URL.
    pub patterns: Vec<String>,
    /// Longest `?query` (including the `?`) still eligible for caching.
    pub max_query_length: usize,
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        let patterns = [
            // dynamic endpoints
            r"/api/",
            r"/auth/",
            r"/admin/",
            r"/dashboard/",
            // large media and archives
            r"\.(mp4|avi|mov|mkv|zip|rar|tar|gz)(\?|$)",
            // analytics and tracking
            r"google-analytics",
            r"analytics\.google",
            r"googletagmanager",
            r"facebook\.com/tr/",
            // realtime data backends
            r"firebaseio\.com",
            r"firestore\.googleapis\.com",
            // browser extensions
            r"^chrome-extension:",
            r"^safari-extension:",
            r"^moz-extension:",
        ];
        Self {
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            max_query_length: 100,
        }
    }
}

/// Background refresh of the essential list and recently cached pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// `None` disables the timer; periodic sync events still refresh.
    pub interval_secs: Option<u64>,
    /// How many of the newest page entries get refreshed.
    pub recent_pages: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: Some(60 * 60),
            recent_pages: 10,
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Fallback values for push notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Opened when a notification carries no URL.
    pub url: String,
    pub tag: String,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "Storefront".into(),
            body: "New offers and products are available".into(),
            icon: "/icons/icon-512x512.png".into(),
            badge: "/icons/icon-192x192.png".into(),
            url: "/index.html".into(),
            tag: "storefront-notification".into(),
        }
    }
}

/// Configuration for one worker version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix of every store name.
    pub app_name: String,
    /// Version tag; bumping it supersedes every store.
    pub version: String,
    /// Base URL relative resource paths resolve against.
    pub scope: Url,
    pub resources: ResourceLists,
    pub limits: CacheLimits,
    pub timeouts: Timeouts,
    pub exclusions: ExclusionConfig,
    pub install_policy: InstallPolicy,
    /// Rewrite known image hosts to pre-sized variants.
    pub optimize_image_hosts: bool,
    /// Documents served to a failed navigation before the offline page.
    pub shell_documents: Vec<String>,
    pub refresh: RefreshConfig,
    /// How many core pages to pre-warm after activation.
    pub prewarm_pages: usize,
    pub notifications: NotificationDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: "storefront".into(),
            version: "v1".into(),
            scope: default_scope(),
            resources: ResourceLists::default(),
            limits: CacheLimits::default(),
            timeouts: Timeouts::default(),
            exclusions: ExclusionConfig::default(),
            install_policy: InstallPolicy::default(),
            optimize_image_hosts: true,
            shell_documents: vec!["/index.html".into(), "/".into()],
            refresh: RefreshConfig::default(),
            prewarm_pages: 5,
            notifications: NotificationDefaults::default(),
        }
    }
}

fn default_scope() -> Url {
    Url::parse("http://localhost/").expect("static URL is valid")
}

impl EngineConfig {
    /// Config for `scope` with everything else defaulted.
    pub fn for_scope(scope: Url) -> Self {
        Self {
            scope,
            ..Default::default()
        }
    }

    /// Store names for this version.
    pub fn cache_names(&self) -> CacheNames {
        CacheNames::new(&self.app_name, &self.version)
    }

    /// Resolve a configured path or URL against the scope.
    pub fn resolve(&self, path: &str) -> Option<Url> {
        self.scope.join(path).ok()
    }

    /// Resolve a list, dropping entries that do not form a URL.
    pub fn resolve_all(&self, paths: &[String]) -> Vec<Url> {
        paths
            .iter()
            .filter_map(|p| {
                let url = self.resolve(p);
                if url.is_none() {
                    tracing::warn!(path = %p, "Skipping unresolvable resource path");
                }
                url
            })
            .collect()
    }

    /// Load from a JSON file; missing fields take their defaults.
    pub fn load(path: &Path) -> pwakit_common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| {
            PwaKitError::config_with_source(format!("invalid config {}", path.display()), e)
        })
    }

    /// Save as pretty JSON.
    pub fn save(&self, path: &Path) -> pwakit_common::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PwaKitError::config_with_source("failed to serialize config", e))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

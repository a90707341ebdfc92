//! Substitute responses for requests neither the network nor the cache can satisfy.

use http::header::CACHE_CONTROL;
use http::StatusCode;
use pwakit_net::{file_name, Response};
use tracing::debug;
use url::Url;

use crate::cache::{CacheEntry, CacheStorage};
use crate::classify::extension;

const SVG: &str = "image/svg+xml";
const HTML: &str = "text/html; charset=utf-8";

const PRODUCT_SVG: &str = r##"<svg width="400" height="300" xmlns="http://www.w3.org/2000/svg" class="placeholder-product">
  <title>Product image unavailable</title>
  <rect width="400" height="300" fill="#f8fafc"/>
  <rect x="100" y="50" width="200" height="200" rx="15" fill="#e2e8f0"/>
  <rect x="120" y="70" width="160" height="160" rx="10" fill="#cbd5e1"/>
  <circle cx="200" cy="150" r="50" fill="#94a3b8"/>
  <text x="200" y="275" text-anchor="middle" font-family="sans-serif" font-size="14" fill="#475569">Product image unavailable</text>
</svg>"##;

const PROFILE_SVG: &str = r##"<svg width="200" height="200" xmlns="http://www.w3.org/2000/svg" class="placeholder-profile">
  <title>Profile picture</title>
  <circle cx="100" cy="70" r="40" fill="#cbd5e1"/>
  <path d="M30 140 Q100 200 170 140" fill="#e2e8f0"/>
  <text x="100" y="190" text-anchor="middle" font-family="sans-serif" font-size="12" fill="#64748b">Profile picture</text>
</svg>"##;

const GENERIC_SVG: &str = r##"<svg width="300" height="200" xmlns="http://www.w3.org/2000/svg" class="placeholder-image">
  <title>Image unavailable</title>
  <rect width="300" height="200" fill="#f1f5f9"/>
  <path d="M50,50 L250,50 L250,150 L50,150 Z" fill="#cbd5e1" fill-opacity="0.5" stroke="#94a3b8" stroke-width="2"/>
  <line x1="50" y1="50" x2="250" y2="150" stroke="#94a3b8" stroke-width="1"/>
  <line x1="250" y1="50" x2="50" y2="150" stroke="#94a3b8" stroke-width="1"/>
  <text x="150" y="180" text-anchor="middle" font-family="sans-serif" font-size="14" fill="#64748b">Image unavailable</text>
</svg>"##;

/// Placeholder image flavour, picked from the requested file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderKind {
    Product,
    Profile,
    Generic,
}

impl PlaceholderKind {
    pub fn for_url(url: &Url) -> Self {
        let name = file_name(url).to_lowercase();
        if name.contains("product") || name.contains("item") {
            PlaceholderKind::Product
        } else if name.contains("user") || name.contains("profile") || name.contains("avatar") {
            PlaceholderKind::Profile
        } else {
            PlaceholderKind::Generic
        }
    }

    fn svg(&self) -> &'static str {
        match self {
            PlaceholderKind::Product => PRODUCT_SVG,
            PlaceholderKind::Profile => PROFILE_SVG,
            PlaceholderKind::Generic => GENERIC_SVG,
        }
    }
}

/// Builds offline documents and placeholders.
#[derive(Debug, Clone)]
pub struct OfflineFallback {
    app_name: String,
}

impl OfflineFallback {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }

    /// Offline response for a failed navigation to `url`.
    ///
    /// Serves the first cached HTML document found in any store, with a banner
    /// listing the other cached documents. Falls back to a minimal built-in page.
    pub fn offline_document(&self, storage: &CacheStorage, url: &Url) -> Response {
        let documents: Vec<&CacheEntry> = storage
            .caches()
            .flat_map(|cache| cache.entries())
            .filter(|entry| is_document(entry))
            .collect();

        let Some((first, others)) = documents.split_first() else {
            debug!(url = %url, "No cached documents, serving built-in offline page");
            return self.minimal_offline_page(url);
        };

        debug!(url = %url, alternative = %first.url, "Serving cached document offline");
        let banner = self.banner(url, others);
        let html = inject_banner(&String::from_utf8_lossy(&first.body), &banner);

        Response::synthesized(StatusCode::OK, HTML, html)
            .with_header(CACHE_CONTROL, "no-cache")
            .with_url(url.clone())
    }

    fn banner(&self, url: &Url, others: &[&CacheEntry]) -> String {
        let mut banner = format!(
            "<div class=\"offline-banner\" role=\"status\">\
             <strong>You are offline.</strong> \
             <span>{} is not available without a connection; showing a saved page instead.</span>",
            escape_html(&file_name(url))
        );
        if !others.is_empty() {
            banner.push_str("<ul class=\"offline-pages\">");
            for entry in others {
                let label = entry
                    .parsed_url()
                    .map(|u| file_name(&u))
                    .unwrap_or_else(|| entry.url.clone());
                banner.push_str(&format!(
                    "<li><a href=\"{}\">{}</a></li>",
                    escape_html(&entry.url),
                    escape_html(&label)
                ));
            }
            banner.push_str("</ul>");
        }
        banner.push_str("</div>");
        banner
    }

    fn minimal_offline_page(&self, url: &Url) -> Response {
        let html = format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
             <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
             <title>{app} - Offline</title>\n</head>\n<body>\n\
             <main class=\"offline-container\">\n<h1>You are offline</h1>\n\
             <p>{page} could not be loaded. Check your connection and try again.</p>\n\
             <button onclick=\"location.reload()\">Retry</button>\n</main>\n</body>\n</html>\n",
            app = escape_html(&self.app_name),
            page = escape_html(&file_name(url)),
        );

        Response::synthesized(StatusCode::OK, HTML, html)
            .with_header(CACHE_CONTROL, "no-cache")
            .with_url(url.clone())
    }

    /// Vector placeholder for an image that could not be loaded.
    pub fn placeholder_image(&self, url: &Url) -> Response {
        let kind = PlaceholderKind::for_url(url);
        debug!(url = %url, ?kind, "Serving placeholder image");

        Response::synthesized(StatusCode::OK, SVG, kind.svg())
            .with_header(CACHE_CONTROL, "public, max-age=31536000")
            .with_url(url.clone())
    }

    /// Empty, correctly typed stand-in for a stylesheet or script.
    pub fn asset_placeholder(&self, url: &Url) -> Response {
        let response = match extension(url).as_deref() {
            Some("css") => Response::synthesized(StatusCode::OK, "text/css", ""),
            Some("js") => Response::synthesized(
                StatusCode::OK,
                "application/javascript",
                "// resource unavailable offline\n",
            ),
            _ => self.service_unavailable(),
        };
        response.with_url(url.clone())
    }

    pub fn not_found(&self) -> Response {
        Response::synthesized(StatusCode::NOT_FOUND, "text/plain; charset=utf-8", "Not Found")
    }

    pub fn service_unavailable(&self) -> Response {
        Response::synthesized(
            StatusCode::SERVICE_UNAVAILABLE,
            "text/plain; charset=utf-8",
            "Service Unavailable: offline and not cached",
        )
    }
}

fn is_document(entry: &CacheEntry) -> bool {
    if entry.is_html() {
        return true;
    }
    entry
        .parsed_url()
        .and_then(|u| extension(&u))
        .is_some_and(|ext| ext == "html" || ext == "htm")
}

/// Insert `banner` right after the opening `<body>` tag, or at the very top.
fn inject_banner(html: &str, banner: &str) -> String {
    let lowered = html.to_ascii_lowercase();
    let insert_at = lowered
        .find("<body")
        .and_then(|start| lowered[start..].find('>').map(|end| start + end + 1));

    match insert_at {
        Some(at) => format!("{}{}{}", &html[..at], banner, &html[at..]),
        None => format!("{banner}{html}"),
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn html_entry(u: &str, body: &'static str) -> CacheEntry {
        CacheEntry {
            url: u.to_string(),
            method: "GET".into(),
            status: 200,
            headers: vec![("content-type".into(), "text/html".into())],
            body: Bytes::from_static(body.as_bytes()),
            cached_at: 0,
        }
    }

    fn fallback() -> OfflineFallback {
        OfflineFallback::new("Storefront")
    }

    #[test]
    fn test_placeholder_kind() {
        assert_eq!(
            PlaceholderKind::for_url(&url("https://s.test/img/product-42.png")),
            PlaceholderKind::Product
        );
        assert_eq!(
            PlaceholderKind::for_url(&url("https://s.test/u/avatar.jpg")),
            PlaceholderKind::Profile
        );
        assert_eq!(
            PlaceholderKind::for_url(&url("https://s.test/banner.webp")),
            PlaceholderKind::Generic
        );
    }

    #[test]
    fn test_product_placeholder() {
        let response = fallback().placeholder_image(&url("https://s.test/img/product-42.png"));
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type().unwrap().essence_str(), SVG);
        assert!(response.text().contains("placeholder-product"));
    }

    #[test]
    fn test_asset_placeholders() {
        let f = fallback();
        let css = f.asset_placeholder(&url("https://s.test/css/main.css"));
        assert_eq!(css.status, StatusCode::OK);
        assert_eq!(css.content_type().unwrap().essence_str(), "text/css");
        assert!(css.body.is_empty());

        let js = f.asset_placeholder(&url("https://s.test/js/app.js"));
        assert_eq!(js.content_type().unwrap().essence_str(), "application/javascript");
        assert!(js.text().starts_with("//"));

        let font = f.asset_placeholder(&url("https://s.test/fonts/a.woff2"));
        assert_eq!(font.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_minimal_offline_page_when_nothing_cached() {
        let storage = CacheStorage::new();
        let response = fallback().offline_document(&storage, &url("https://s.test/offers.html"));
        let body = response.text();
        assert!(body.contains("You are offline"));
        assert!(body.contains("offers.html"));
        assert_eq!(
            response.headers.get(CACHE_CONTROL).unwrap().to_str().unwrap(),
            "no-cache"
        );
    }

    #[test]
    fn test_offline_document_uses_cached_page_with_banner() {
        let mut storage = CacheStorage::new();
        storage
            .put("pages", html_entry("https://s.test/index.html", "<html><body class=\"x\"><h1>Home</h1></body></html>"))
            .unwrap();
        storage
            .put("pages", html_entry("https://s.test/help.html", "<p>help</p>"))
            .unwrap();

        let response = fallback().offline_document(&storage, &url("https://s.test/missing.html"));
        let body = response.text();
        assert!(body.starts_with("<html><body class=\"x\"><div class=\"offline-banner\""));
        assert!(body.contains("<h1>Home</h1>"));
        assert!(body.contains("href=\"https://s.test/help.html\""));
    }

    #[test]
    fn test_inject_banner_without_body() {
        assert_eq!(inject_banner("<p>x</p>", "<b>!</b>"), "<b>!</b><p>x</p>");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}

//! HTTP fetcher with rate limiting and link extraction
//!
//! Fetches a page with `reqwest`, waits on a `governor` quota before every
//! request and pulls `a[href]` links out of HTML bodies with `scraper`. Only
//! http(s) targets survive.
//!
//! Redirects are never followed. A 3xx answer reports its `Location` target as
//! the page's only link, so the coordinator's scope check decides whether the
//! target is ever fetched.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, LOCATION},
    redirect, Client,
};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroU32;
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

use super::{FetchError, FetchResponse, Fetcher};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetcherConfig {
    pub user_agent: String,

    pub timeout_secs: u64,

    /// Per-worker request rate
    pub requests_per_second: u32,

    /// Bodies larger than this are not parsed for links
    pub max_body_bytes: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("fleetscope/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            requests_per_second: 2,
            max_body_bytes: 5 * 1024 * 1024,
        }
    }
}

impl FetcherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ============================================================================
// HTTP Fetcher
// ============================================================================

pub struct HttpFetcher {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.timeout())
            .gzip(true)
            .cookie_store(true)
            .redirect(redirect::Policy::none())
            .build()?;

        let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
            max_body_bytes: config.max_body_bytes,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let target = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;

        self.rate_limiter.until_ready().await;

        let response = self.client.get(target).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Http(e)
            }
        })?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut result = FetchResponse::new(final_url.as_str(), status);

        if result.is_redirect() {
            let target = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|location| final_url.join(location.trim()).ok())
                .filter(|t| matches!(t.scheme(), "http" | "https"));

            return Ok(match target {
                Some(mut target) => {
                    target.set_fragment(None);
                    let target = target.to_string();
                    tracing::debug!(url = %final_url, status, target = %target, "Redirect reported as link");
                    result.metadata.insert("redirect".to_string(), target.clone());
                    result.with_links(vec![target])
                }
                None => result,
            });
        }

        if let Some(content_type) = &content_type {
            result
                .metadata
                .insert("content_type".to_string(), content_type.clone());
        }

        // Only successful HTML pages contribute links
        let is_html = content_type
            .as_deref()
            .map_or(true, |ct| ct.contains("html"));
        if !result.is_success() || !is_html {
            return Ok(result);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;
        if body.len() > self.max_body_bytes {
            tracing::debug!(url = %final_url, size = body.len(), "Body too large, skipping link extraction");
            return Ok(result);
        }

        let html = String::from_utf8_lossy(&body);
        let page = extract_page(&html, &final_url);
        if let Some(title) = page.title {
            result.metadata.insert("title".to_string(), title);
        }

        Ok(result.with_links(page.links))
    }
}

// ============================================================================
// Link Extraction
// ============================================================================

/// Links and title pulled out of one HTML document
#[derive(Debug, Default)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub links: Vec<String>,
}

fn anchor_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("a[href]").expect("Invalid selector"))
}

fn base_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("base[href]").expect("Invalid selector"))
}

fn title_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("title").expect("Invalid selector"))
}

/// Parse `html` served from `page_url`.
///
/// A `<base href>` overrides the resolution base. Fragments are stripped,
/// non-http(s) targets (`mailto:`, `javascript:`) dropped and duplicates removed
/// keeping the first occurrence.
pub fn extract_page(html: &str, page_url: &Url) -> ExtractedPage {
    let document = Html::parse_document(html);

    let base = document
        .select(base_selector())
        .next()
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| page_url.join(href.trim()).ok())
        .unwrap_or_else(|| page_url.clone());

    let title = document
        .select(title_selector())
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for anchor in document.select(anchor_selector()) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            continue;
        }

        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        resolved.set_fragment(None);

        let link = resolved.to_string();
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }

    ExtractedPage { title, links }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&FetcherConfig {
            requests_per_second: 100,
            timeout_secs: 5,
            ..FetcherConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_extract_page_resolves_and_dedups() {
        let base = Url::parse("https://example.com/docs/index.html").unwrap();
        let html = r##"
            <html><head><title> Docs </title></head><body>
              <a href="guide.html">Guide</a>
              <a href="/about#team">About</a>
              <a href="/about">About again</a>
              <a href="#top">Top</a>
              <a href="mailto:team@example.com">Mail</a>
              <a href="https://other.org/x">Other</a>
            </body></html>
        "##;

        let page = extract_page(html, &base);
        assert_eq!(page.title.as_deref(), Some("Docs"));
        assert_eq!(
            page.links,
            vec![
                "https://example.com/docs/guide.html",
                "https://example.com/about",
                "https://other.org/x",
            ]
        );
    }

    #[test]
    fn test_extract_page_honours_base_href() {
        let base = Url::parse("https://example.com/a/b").unwrap();
        let html = r#"<head><base href="https://cdn.example.com/root/"></head><a href="x">x</a>"#;
        let page = extract_page(html, &base);
        assert_eq!(page.links, vec!["https://cdn.example.com/root/x"]);
    }

    #[tokio::test]
    async fn test_fetch_html_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/start"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(
                        r#"<title>Start</title><a href="/next">next</a>"#,
                        "text/html; charset=utf-8",
                    ),
            )
            .mount(&server)
            .await;

        let response = fetcher()
            .fetch(&format!("{}/start", server.uri()))
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(response.links, vec![format!("{}/next", server.uri())]);
        assert_eq!(response.metadata.get("title").map(String::as_str), Some("Start"));
    }

    #[tokio::test]
    async fn test_fetch_error_status_has_no_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(503)
                    .insert_header("content-type", "text/html")
                    .set_body_string(r#"<a href="/next">next</a>"#),
            )
            .mount(&server)
            .await;

        let response = fetcher().fetch(&server.uri()).await.unwrap();
        assert_eq!(response.status, 503);
        assert!(response.is_retryable_status());
        assert!(response.links.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_skips_non_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"<a href="/next">next</a>"#, "application/pdf"),
            )
            .mount(&server)
            .await;

        let response = fetcher().fetch(&server.uri()).await.unwrap();
        assert!(response.links.is_empty());
        assert_eq!(
            response.metadata.get("content_type").map(String::as_str),
            Some("application/pdf")
        );
    }

    #[tokio::test]
    async fn test_redirect_reported_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/moved"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "https://elsewhere.org/landing#top"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let fetcher = fetcher();

        let offsite = fetcher
            .fetch(&format!("{}/moved", server.uri()))
            .await
            .unwrap();
        assert_eq!(offsite.status, 302);
        assert!(offsite.is_redirect());
        assert_eq!(offsite.final_url, format!("{}/moved", server.uri()));
        assert_eq!(offsite.links, vec!["https://elsewhere.org/landing"]);
        assert_eq!(
            offsite.metadata.get("redirect").map(String::as_str),
            Some("https://elsewhere.org/landing")
        );

        let local = fetcher.fetch(&format!("{}/old", server.uri())).await.unwrap();
        assert_eq!(local.status, 301);
        assert_eq!(local.links, vec![format!("{}/new", server.uri())]);
    }

    #[tokio::test]
    async fn test_fetch_invalid_url() {
        let err = fetcher().fetch("not a url").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }
}

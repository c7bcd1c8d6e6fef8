//! Common utilities and helper functions
//!
//! URL normalization and host extraction shared by the scope engine and the frontier.

pub mod retry;

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// Normalize a URL into the frontier's identity key.
///
/// Scheme and host are lower-cased and default ports dropped (handled by `url`),
/// the fragment is removed, duplicate slashes in the path collapse, an empty path
/// becomes `/` and query parameters are sorted. Only `http` and `https` URLs with
/// a host are accepted.
pub fn normalize_url(raw: &str) -> Option<String> {
    static SLASHES_RE: OnceLock<Regex> = OnceLock::new();
    let slashes = SLASHES_RE.get_or_init(|| Regex::new(r"/{2,}").expect("Invalid regex pattern"));

    let mut parsed = Url::parse(raw.trim()).ok()?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    let host = parsed.host_str()?.trim_end_matches('.').to_string();
    if host.is_empty() {
        return None;
    }
    parsed.set_host(Some(&host)).ok()?;
    parsed.set_fragment(None);

    let path = slashes.replace_all(parsed.path(), "/").into_owned();
    parsed.set_path(if path.is_empty() { "/" } else { &path });

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        pairs.sort();
        parsed.query_pairs_mut().clear().extend_pairs(pairs);
    }

    Some(parsed.to_string())
}

/// Extract the lower-cased hostname of a URL, trailing dot stripped.
///
/// Scheme, userinfo, port, path and query are ignored.
pub fn extract_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.trim_end_matches('.').to_lowercase();

    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url_basic() {
        assert_eq!(
            normalize_url("HTTPS://Example.COM").as_deref(),
            Some("https://example.com/")
        );
        assert_eq!(
            normalize_url("http://example.com:80/a//b/#frag").as_deref(),
            Some("http://example.com/a/b/")
        );
        assert_eq!(
            normalize_url("https://example.com:443/x?b=2&a=1").as_deref(),
            Some("https://example.com/x?a=1&b=2")
        );
    }

    #[test]
    fn test_normalize_url_keeps_path_case_and_port() {
        assert_eq!(
            normalize_url("https://example.com:8443/Docs").as_deref(),
            Some("https://example.com:8443/Docs")
        );
    }

    #[test]
    fn test_normalize_url_rejects_non_http() {
        assert!(normalize_url("ftp://example.com/file").is_none());
        assert!(normalize_url("mailto:someone@example.com").is_none());
        assert!(normalize_url("not a url").is_none());
        assert!(normalize_url("/relative/path").is_none());
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(
            extract_host("https://user:pw@API.Example.com.:8080/path?q=1").as_deref(),
            Some("api.example.com")
        );
        assert!(extract_host("example.com").is_none());
    }
}

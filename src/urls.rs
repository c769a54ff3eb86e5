//! URL canonicalization, hashing, and domain helpers.
//!
//! Every subsystem that touches a URL goes through this module so the
//! dedup, domain-cap, and `site:` filter paths agree on what a domain is.

use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{ExtractError, Result};

/// Query parameters that never change the document behind the URL.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "yclid", "_ga", "_gl", "mc_cid", "mc_eid", "igshid",
    "spm", "ref_src",
];

/// Second-level public suffixes treated as a single suffix for eTLD+1.
///
/// Hand-maintained; covers the registries that actually occur in news
/// sources rather than the full PSL.
static SECOND_LEVEL_SUFFIXES: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("co", "uk"),
        ("org", "uk"),
        ("ac", "uk"),
        ("gov", "uk"),
        ("me", "uk"),
        ("net", "uk"),
        ("com", "au"),
        ("net", "au"),
        ("org", "au"),
        ("gov", "au"),
        ("edu", "au"),
        ("co", "jp"),
        ("or", "jp"),
        ("ne", "jp"),
        ("ac", "jp"),
        ("go", "jp"),
        ("co", "nz"),
        ("org", "nz"),
        ("govt", "nz"),
        ("co", "za"),
        ("org", "za"),
        ("gov", "za"),
        ("com", "br"),
        ("org", "br"),
        ("gov", "br"),
        ("com", "mx"),
        ("org", "mx"),
        ("com", "ar"),
        ("com", "cn"),
        ("org", "cn"),
        ("gov", "cn"),
        ("co", "in"),
        ("org", "in"),
        ("gov", "in"),
        ("co", "kr"),
        ("or", "kr"),
        ("com", "tr"),
        ("gov", "tr"),
        ("com", "ua"),
        ("gov", "ua"),
        ("com", "sg"),
        ("gov", "sg"),
    ]
});

/// Whether a query parameter is pure tracking noise
fn is_tracking_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name.as_str())
}

/// Canonicalize an article or feed URL.
///
/// Lowercases scheme and host, strips `www.`, drops tracking parameters,
/// removes default ports and the trailing slash. Idempotent:
/// `canonicalize(canonicalize(u)) == canonicalize(u)`.
pub fn canonicalize(raw: &str) -> Result<String> {
    let mut url =
        Url::parse(raw.trim()).map_err(|e| ExtractError::InvalidUrl(format!("{raw}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ExtractError::InvalidUrl(format!("unsupported scheme: {raw}")).into());
    }

    let mut host = url
        .host_str()
        .ok_or_else(|| ExtractError::InvalidUrl(format!("no host: {raw}")))?
        .to_ascii_lowercase();
    while let Some(stripped) = host.strip_prefix("www.") {
        host = stripped.to_string();
    }
    url.set_host(Some(&host))
        .map_err(|e| ExtractError::InvalidUrl(format!("{raw}: {e}")))?;

    // Url::parse already normalizes default ports away; clear explicit ones
    // that match the scheme default.
    if let Some(port) = url.port() {
        let default = match url.scheme() {
            "http" => 80,
            _ => 443,
        };
        if port == default {
            let _ = url.set_port(None);
        }
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        let query = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    let mut out = url.to_string();
    // A bare "/" path renders as a trailing slash; strip it for stability.
    if out.ends_with('/') {
        out.pop();
    }
    Ok(out)
}

/// SHA-256 hex digest of the canonical URL
pub fn url_hash(canonical_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SHA-256 hex digest over whitespace-normalized, lowercased text
pub fn text_hash(clean_text: &str) -> String {
    let normalized = clean_text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Extract eTLD+1 from a host name.
///
/// Lowercases, strips `www.` and any port, then applies the second-level
/// suffix table. Idempotent: `etld1(etld1(h)) == etld1(h)`.
pub fn etld1(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    let host = host.split(':').next().unwrap_or(&host);
    let host = host.strip_prefix("www.").unwrap_or(host);
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() <= 2 {
        return labels.join(".");
    }

    let n = labels.len();
    let (second, tld) = (labels[n - 2], labels[n - 1]);
    let suffix_len = if SECOND_LEVEL_SUFFIXES
        .iter()
        .any(|(s, t)| *s == second && *t == tld)
    {
        2
    } else {
        1
    };

    let take = (suffix_len + 1).min(n);
    labels[n - take..].join(".")
}

/// eTLD+1 of a full URL, or None when the URL does not parse
pub fn url_etld1(raw: &str) -> Option<String> {
    Url::parse(raw).ok()?.host_str().map(etld1)
}

/// Normalize a URL path for dedup grouping.
///
/// Lowercases, drops tracking parameters, strips meaningless suffixes
/// (`.html`, `.php`, trailing `/`), and sorts the surviving query
/// parameters alphabetically.
pub fn normalize_path(raw: &str) -> String {
    let Ok(url) = Url::parse(raw) else {
        return raw.to_lowercase();
    };

    let mut path = url.path().to_lowercase();
    for suffix in [".html", ".htm", ".php"] {
        if let Some(stripped) = path.strip_suffix(suffix) {
            path = stripped.to_string();
            break;
        }
    }
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.to_lowercase(), v.to_lowercase()))
        .collect();
    params.sort();

    if params.is_empty() {
        path
    } else {
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{path}?{query}")
    }
}

/// Normalize a title for dedup grouping: lowercase, collapse whitespace,
/// drop punctuation.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_strips_tracking_and_www() {
        let url = canonicalize("HTTPS://WWW.BBC.com/News/article?utm_source=x&fbclid=abc&id=7")
            .unwrap();
        assert_eq!(url, "https://bbc.com/News/article?id=7");
    }

    #[test]
    fn test_canonicalize_idempotent() {
        let once = canonicalize("https://www.example.co.uk/a/b/?utm_medium=rss").unwrap();
        let twice = canonicalize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_canonicalize_default_port() {
        let url = canonicalize("https://example.com:443/path").unwrap();
        assert_eq!(url, "https://example.com/path");
    }

    #[test]
    fn test_canonicalize_rejects_non_http() {
        assert!(canonicalize("ftp://example.com/feed").is_err());
        assert!(canonicalize("not a url").is_err());
    }

    #[test]
    fn test_url_hash_deterministic() {
        let canonical = canonicalize("https://www.bbc.com/a?utm_source=x").unwrap();
        assert_eq!(url_hash(&canonical), url_hash(&canonical));
        // Hashing the canonical form again must not change the digest.
        assert_eq!(
            url_hash(&canonical),
            url_hash(&canonicalize(&canonical).unwrap())
        );
    }

    #[test]
    fn test_text_hash_whitespace_invariant() {
        assert_eq!(
            text_hash("Breaking  News \n today"),
            text_hash("breaking news today")
        );
    }

    #[test]
    fn test_etld1_second_level_suffixes() {
        assert_eq!(etld1("news.bbc.co.uk"), "bbc.co.uk");
        assert_eq!(etld1("www.smh.com.au"), "smh.com.au");
        assert_eq!(etld1("asahi.co.jp"), "asahi.co.jp");
    }

    #[test]
    fn test_etld1_plain() {
        assert_eq!(etld1("edition.cnn.com"), "cnn.com");
        assert_eq!(etld1("europa.eu"), "europa.eu");
        assert_eq!(etld1("EC.Europa.EU:8080"), "europa.eu");
    }

    #[test]
    fn test_etld1_idempotent() {
        let hosts = ["news.bbc.co.uk", "a.b.c.example.com", "europa.eu"];
        for host in hosts {
            assert_eq!(etld1(&etld1(host)), etld1(host));
        }
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path("https://ex.com/Story/One.html?b=2&a=1&utm_source=x"),
            "/story/one?a=1&b=2"
        );
        assert_eq!(normalize_path("https://ex.com/story/"), "/story");
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(
            normalize_title("  AI Regulation: What's Next?! "),
            "ai regulation what s next"
        );
    }
}

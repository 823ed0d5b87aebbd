//! URL normalization, redirect unwrapping, and registrable-domain
//! extraction.

use url::form_urlencoded;
use url::Url;

/// Query parameters that redirect wrappers hide their target in.
const REDIRECT_PARAMS: &[&str] = &["url", "u", "redirect", "goto", "target", "link"];

/// Tracking parameters stripped during normalization.
fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || key == "fbclid" || key == "gclid"
}

/// Multi-label public suffixes where the registrable domain spans three
/// labels (`example.co.uk`). Not the full published table, but the entries
/// that actually show up in scrape output.
const SECOND_LEVEL_TLDS: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "me.uk", "net.uk", "com.au", "net.au", "org.au",
    "edu.au", "gov.au", "co.nz", "net.nz", "org.nz", "com.br", "net.br", "org.br", "co.jp",
    "ne.jp", "or.jp", "co.in", "net.in", "org.in", "com.mx", "com.ar", "com.tr", "co.za",
    "com.sg", "com.hk", "com.tw", "com.cn", "net.cn", "org.cn", "co.kr", "com.my", "com.ph",
    "com.vn", "com.co", "com.pe", "com.sa", "com.eg",
];

/// Unwraps one layer of redirect indirection, if the URL matches a
/// recognized wrapper pattern; `None` otherwise. The decode is a no-op on
/// anything else, so repeated application is stable.
///
/// `?q=` is only honored under a `/url` path; on any other path it is a
/// search query, not a redirect.
pub fn unwrap_redirect(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;

    let is_url_path = url.path().ends_with("/url");
    for (key, value) in url.query_pairs() {
        let recognized = (is_url_path && key == "q") || REDIRECT_PARAMS.contains(&key.as_ref());
        if recognized && value.starts_with("http") {
            return Some(value.into_owned());
        }
    }
    None
}

/// Normalizes a URL into a stable dedup key.
///
/// Host lowercased, scheme preserved, trailing slash stripped from the
/// path, query pairs sorted by key with tracking parameters dropped, and
/// the fragment removed. Idempotent: normalizing a normalized URL yields
/// the same string. Returns `None` for unparseable input.
pub fn normalize_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?.to_lowercase();

    let mut out = format!("{}://{}", url.scheme(), host);
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }

    let path = url.path().trim_end_matches('/');
    out.push_str(path);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !pairs.is_empty() {
        pairs.sort();
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        out.push('?');
        out.push_str(&query);
    }

    Some(out)
}

/// Extracts the registrable domain from a host, honoring multi-label
/// public suffixes. IP literals come back unchanged.
pub fn registrable_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_lowercase();
    if host.parse::<std::net::IpAddr>().is_ok() {
        return host;
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }

    let last_two = labels[labels.len() - 2..].join(".");
    let take = if SECOND_LEVEL_TLDS.contains(&last_two.as_str()) {
        3
    } else {
        2
    };
    labels[labels.len().saturating_sub(take)..].join(".")
}

/// Returns a host and every ancestor suffix, most specific first:
/// `a.b.example.com` → `a.b.example.com`, `b.example.com`, `example.com`, `com`.
pub fn domain_suffixes(host: &str) -> Vec<String> {
    let host = host.trim_end_matches('.').to_lowercase();
    let mut out = vec![host.clone()];
    let mut rest = host.as_str();
    while let Some((_, suffix)) = rest.split_once('.') {
        out.push(suffix.to_string());
        rest = suffix;
    }
    out
}

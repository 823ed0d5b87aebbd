//! Google search backend: URL construction, proxied transport,
//! response classification, and result URL extraction.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::redirect;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::backend::{Classification, SearchBackend, SearchOutcome};
use crate::proxy::Proxy;

/// Body fragments that mark a CAPTCHA wall. Checked case-insensitively,
/// before block markers.
const CAPTCHA_MARKERS: &[&str] = &[
    "g-recaptcha",
    "recaptcha",
    "unusual traffic",
    "/recaptcha/",
    "captcha-form",
];

/// Body fragments that mark a soft block.
const BLOCK_MARKERS: &[&str] = &[
    "/sorry/",
    "detected unusual traffic",
    "access denied",
    "forbidden",
];

/// Google backend configuration.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// Regional mirrors; one is chosen at random per request.
    pub domains: Vec<String>,
    pub results_per_page: u32,
    pub timeout: Duration,
    /// Hard cap on how much of a response body is read.
    pub max_body_bytes: usize,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            domains: vec![
                "www.google.com".to_string(),
                "www.google.co.uk".to_string(),
                "www.google.ca".to_string(),
                "www.google.com.au".to_string(),
                "www.google.de".to_string(),
                "www.google.fr".to_string(),
                "www.google.nl".to_string(),
                "www.google.com.br".to_string(),
                "www.google.co.in".to_string(),
            ],
            results_per_page: 100,
            timeout: Duration::from_secs(30),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Google search engine backend.
pub struct Google {
    config: GoogleConfig,
}

impl Google {
    /// Creates a backend with default configuration.
    pub fn new() -> Self {
        Self::with_config(GoogleConfig::default())
    }

    /// Creates a backend with custom configuration.
    pub fn with_config(config: GoogleConfig) -> Self {
        let mut config = config;
        if config.domains.is_empty() {
            config.domains = GoogleConfig::default().domains;
        }
        if config.results_per_page == 0 {
            config.results_per_page = GoogleConfig::default().results_per_page;
        }
        Self { config }
    }

    fn select_domain(&self) -> &str {
        let idx = rand::thread_rng().gen_range(0..self.config.domains.len());
        &self.config.domains[idx]
    }

    /// Builds the parameterized search URL for one request.
    pub fn build_search_url(&self, domain: &str, dork: &str, page: u32) -> String {
        let mut url = Url::parse(&format!("https://{domain}/search"))
            .unwrap_or_else(|_| Url::parse("https://www.google.com/search").expect("literal URL"));

        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", dork);
            pairs.append_pair("num", &self.config.results_per_page.to_string());
            pairs.append_pair("hl", "en");
            pairs.append_pair("safe", "off");
            pairs.append_pair("filter", "0");

            let start = page * self.config.results_per_page;
            if start > 0 {
                pairs.append_pair("start", &start.to_string());
            }

            // Occasional nuisance parameters to look less mechanical.
            let mut rng = rand::thread_rng();
            if rng.gen::<f32>() < 0.5 {
                pairs.append_pair("pws", "0");
            }
            if rng.gen::<f32>() < 0.3 {
                pairs.append_pair("nfpr", "1");
            }
        }

        url.into()
    }

    fn build_client(&self, proxy: &Proxy) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(self.config.timeout)
            .redirect(redirect::Policy::limited(5))
            .proxy(reqwest::Proxy::all(proxy.url())?)
            .build()
    }

    /// Plausible consent cookies; some requests also carry a session id.
    fn cookies(&self) -> String {
        let mut rng = rand::thread_rng();
        let mut cookies = vec![
            format!("CONSENT=YES+{}", rng.gen_range(0..999)),
            "SOCS=CAISHAgBEhJnd3NfMjAyMzA4MTAtMF9SQzEaAmVuIAEaBgiA_LqmBg".to_string(),
        ];
        if rng.gen::<f32>() < 0.5 {
            cookies.push(format!("NID={}", rng.gen_range(0..999_999_999u32)));
        }
        cookies.join("; ")
    }

    /// Detects a CAPTCHA wall in the response body.
    pub fn detect_captcha(&self, html: &str) -> bool {
        let lower = html.to_lowercase();
        CAPTCHA_MARKERS.iter().any(|marker| lower.contains(marker))
    }

    /// Detects a soft block in the response body.
    pub fn detect_block(&self, html: &str) -> bool {
        let lower = html.to_lowercase();
        BLOCK_MARKERS.iter().any(|marker| lower.contains(marker))
    }

    /// Extracts result URLs from a results page.
    ///
    /// Selector strategies are tried in order: structured result containers
    /// first, then any absolute anchor that does not point back at Google.
    /// First-seen order is preserved, duplicates within the response are
    /// dropped, and the list is capped at `results_per_page * 2`.
    pub fn extract_urls(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let cap = (self.config.results_per_page as usize) * 2;

        let mut urls = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for css in ["div.g a[href]", "div#search a[href]", "a[href]"] {
            let selector = match Selector::parse(css) {
                Ok(s) => s,
                Err(_) => continue,
            };

            for element in document.select(&selector) {
                let Some(href) = element.value().attr("href") else {
                    continue;
                };
                let Some(target) = self.resolve_href(href) else {
                    continue;
                };
                if seen.insert(target.clone()) {
                    urls.push(target);
                    if urls.len() >= cap {
                        return urls;
                    }
                }
            }

            if !urls.is_empty() {
                break;
            }
        }

        urls
    }

    /// Resolves one candidate href to an outbound URL, decoding Google's
    /// `/url?q=` and `/url?url=` redirect wrappers. Links back to Google
    /// itself are dropped.
    fn resolve_href(&self, href: &str) -> Option<String> {
        if href.starts_with("/url?") || href.contains("google.") && href.contains("/url?") {
            let full = if href.starts_with('/') {
                format!("https://www.google.com{href}")
            } else {
                href.to_string()
            };
            let parsed = Url::parse(&full).ok()?;
            for (key, value) in parsed.query_pairs() {
                if key == "q" || key == "url" {
                    if value.starts_with("http") && !self.is_own_domain(&value) {
                        return Some(value.into_owned());
                    }
                    return None;
                }
            }
            return None;
        }

        if !href.starts_with("http") {
            return None;
        }
        if self.is_own_domain(href) {
            return None;
        }
        Some(href.to_string())
    }

    fn is_own_domain(&self, href: &str) -> bool {
        match Url::parse(href) {
            Ok(url) => url
                .host_str()
                .map(|host| {
                    host.contains("google.")
                        || host == "google.com"
                        || host.ends_with(".googleusercontent.com")
                })
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Detects a next-page affordance.
    pub fn has_next_page(&self, html: &str) -> bool {
        if let Ok(selector) = Selector::parse("a#pnnext") {
            if Html::parse_document(html).select(&selector).next().is_some() {
                return true;
            }
        }
        html.contains("pnnext") || html.contains("aria-label=\"Next page\"")
    }

    /// Classifies a body that arrived with an acceptable status code.
    fn classify_body(&self, html: &str, status: u16, latency: Duration) -> SearchOutcome {
        if self.detect_captcha(html) {
            return SearchOutcome {
                classification: Classification::Captcha,
                urls: Vec::new(),
                has_next_page: false,
                latency,
                status_code: Some(status),
                error: None,
            };
        }

        if self.detect_block(html) {
            return SearchOutcome {
                classification: Classification::Blocked,
                urls: Vec::new(),
                has_next_page: false,
                latency,
                status_code: Some(status),
                error: None,
            };
        }

        let urls = self.extract_urls(html);
        let has_next_page = self.has_next_page(html);
        let classification = if urls.is_empty() {
            Classification::NoResults
        } else {
            Classification::Success
        };

        SearchOutcome {
            classification,
            urls,
            has_next_page,
            latency,
            status_code: Some(status),
            error: None,
        }
    }
}

impl Default for Google {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchBackend for Google {
    async fn search(
        &self,
        dork: &str,
        page: u32,
        proxy: &Proxy,
        mut headers: HeaderMap,
    ) -> SearchOutcome {
        let start = Instant::now();
        let domain = self.select_domain().to_string();
        let search_url = self.build_search_url(&domain, dork, page);

        let client = match self.build_client(proxy) {
            Ok(client) => client,
            Err(e) => return SearchOutcome::error(format!("client setup: {e}"), start.elapsed()),
        };

        if let Ok(value) = HeaderValue::from_str(&self.cookies()) {
            headers.insert(reqwest::header::COOKIE, value);
        }
        if page > 0 {
            // Subsequent pages arrive from the results page itself.
            if let Ok(referer) = HeaderValue::from_str(&format!("https://{domain}/search")) {
                headers.insert(reqwest::header::REFERER, referer);
            }
            headers.insert("Sec-Fetch-Site", HeaderValue::from_static("same-origin"));
        }

        debug!(%domain, page, "searching through {}", proxy.id);

        let response = match client.get(&search_url).headers(headers).send().await {
            Ok(resp) => resp,
            Err(e) => return SearchOutcome::error(format!("request failed: {e}"), start.elapsed()),
        };

        let status = response.status().as_u16();

        if status == 429 {
            return SearchOutcome {
                classification: Classification::Blocked,
                urls: Vec::new(),
                has_next_page: false,
                latency: start.elapsed(),
                status_code: Some(status),
                error: Some("rate limited".to_string()),
            };
        }
        if status == 503 {
            return SearchOutcome {
                classification: Classification::Blocked,
                urls: Vec::new(),
                has_next_page: false,
                latency: start.elapsed(),
                status_code: Some(status),
                error: Some("service unavailable".to_string()),
            };
        }
        if !(200..400).contains(&status) {
            let mut outcome =
                SearchOutcome::error(format!("unexpected status: {status}"), start.elapsed());
            outcome.status_code = Some(status);
            return outcome;
        }

        // Bounded body read.
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    body.extend_from_slice(&bytes);
                    if body.len() >= self.config.max_body_bytes {
                        break;
                    }
                }
                Err(e) => {
                    return SearchOutcome::error(format!("body read: {e}"), start.elapsed());
                }
            }
        }
        let html = String::from_utf8_lossy(&body);

        self.classify_body(&html, status, start.elapsed())
    }
}

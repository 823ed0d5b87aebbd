//! Deduplicating filter pipeline over the raw result URL stream.
//!
//! Stages run in a fixed order, each independently toggleable: length
//! bounds, redirect unwrap, normalized-URL dedup, anti-public suppression,
//! domain dedup, parameters-only, and TLD/keyword screens. Dedup is backed
//! by bloom filters, so a false positive can over-filter but never admits
//! a duplicate.

mod normalize;
mod public;

pub use normalize::{domain_suffixes, normalize_url, registrable_domain, unwrap_redirect};
pub use public::{is_public_domain, PUBLIC_DOMAINS};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bloomfilter::Bloom;
use serde::{Deserialize, Serialize};
use url::Url;

/// Filter pipeline configuration.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Reject URLs shorter than this. Zero disables the stage.
    pub min_url_length: usize,
    /// Reject URLs longer than this.
    pub max_url_length: usize,
    pub unwrap_redirects: bool,
    pub dedup_urls: bool,
    pub anti_public: bool,
    pub dedup_domains: bool,
    /// Keep only URLs with a non-empty query string.
    pub parameters_only: bool,
    /// When non-empty, only these TLDs pass.
    pub tld_whitelist: Vec<String>,
    pub tld_blacklist: Vec<String>,
    /// When non-empty, a URL must contain at least one of these.
    pub include_keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,
    /// Expected unique URL cardinality for bloom sizing.
    pub expected_urls: usize,
    /// Expected unique domain cardinality for bloom sizing.
    pub expected_domains: usize,
    pub false_positive_rate: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_url_length: 12,
            max_url_length: 2048,
            unwrap_redirects: true,
            dedup_urls: true,
            anti_public: true,
            dedup_domains: false,
            parameters_only: false,
            tld_whitelist: Vec::new(),
            tld_blacklist: Vec::new(),
            include_keywords: Vec::new(),
            exclude_keywords: Vec::new(),
            expected_urls: 10_000_000,
            expected_domains: 1_000_000,
            false_positive_rate: 0.001,
        }
    }
}

/// Why a URL was dropped, or that it survived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Length,
    Unparseable,
    DuplicateUrl,
    PublicDomain,
    DuplicateDomain,
    NoParameters,
    Tld,
    Keyword,
}

/// Snapshot of pipeline counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FilterStats {
    pub input: u64,
    pub passed: u64,
    pub dropped_length: u64,
    pub dropped_unparseable: u64,
    pub dropped_duplicate_url: u64,
    pub dropped_public_domain: u64,
    pub dropped_duplicate_domain: u64,
    pub dropped_no_parameters: u64,
    pub dropped_tld: u64,
    pub dropped_keyword: u64,
}

#[derive(Default)]
struct Counters {
    input: AtomicU64,
    passed: AtomicU64,
    length: AtomicU64,
    unparseable: AtomicU64,
    duplicate_url: AtomicU64,
    public_domain: AtomicU64,
    duplicate_domain: AtomicU64,
    no_parameters: AtomicU64,
    tld: AtomicU64,
    keyword: AtomicU64,
}

/// The filter pipeline. Thread-safe; shared behind an `Arc` by whatever
/// drains the engine's result stream.
pub struct FilterPipeline {
    config: FilterConfig,
    url_seen: Mutex<Bloom<String>>,
    domain_seen: Mutex<Bloom<String>>,
    counters: Counters,
}

impl FilterPipeline {
    /// Creates a pipeline; bloom filters are sized from the config.
    pub fn new(config: FilterConfig) -> Self {
        let (url_seen, domain_seen) = Self::make_blooms(&config);
        Self {
            config,
            url_seen: Mutex::new(url_seen),
            domain_seen: Mutex::new(domain_seen),
            counters: Counters::default(),
        }
    }

    fn make_blooms(config: &FilterConfig) -> (Bloom<String>, Bloom<String>) {
        let fp = config.false_positive_rate.clamp(1e-9, 0.5);
        let urls = Bloom::new_for_fp_rate(config.expected_urls.max(1), fp)
            .expect("bloom parameters are clamped to valid ranges");
        let domains = Bloom::new_for_fp_rate(config.expected_domains.max(1), fp)
            .expect("bloom parameters are clamped to valid ranges");
        (urls, domains)
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Runs one URL through every enabled stage.
    ///
    /// Returns the surviving (unwrapped, normalized) URL, or `None` with
    /// the drop counted under its reason.
    pub fn check(&self, raw: &str) -> Option<String> {
        self.counters.input.fetch_add(1, Ordering::Relaxed);

        match self.apply(raw) {
            Ok(url) => {
                self.counters.passed.fetch_add(1, Ordering::Relaxed);
                Some(url)
            }
            Err(reason) => {
                let counter = match reason {
                    DropReason::Length => &self.counters.length,
                    DropReason::Unparseable => &self.counters.unparseable,
                    DropReason::DuplicateUrl => &self.counters.duplicate_url,
                    DropReason::PublicDomain => &self.counters.public_domain,
                    DropReason::DuplicateDomain => &self.counters.duplicate_domain,
                    DropReason::NoParameters => &self.counters.no_parameters,
                    DropReason::Tld => &self.counters.tld,
                    DropReason::Keyword => &self.counters.keyword,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn apply(&self, raw: &str) -> std::result::Result<String, DropReason> {
        let raw = raw.trim();

        if self.config.min_url_length > 0
            && (raw.len() < self.config.min_url_length || raw.len() > self.config.max_url_length)
        {
            return Err(DropReason::Length);
        }

        let unwrapped = if self.config.unwrap_redirects {
            unwrap_redirect(raw).unwrap_or_else(|| raw.to_string())
        } else {
            raw.to_string()
        };

        let normalized = normalize_url(&unwrapped).ok_or(DropReason::Unparseable)?;
        let parsed = Url::parse(&normalized).map_err(|_| DropReason::Unparseable)?;
        let host = parsed.host_str().ok_or(DropReason::Unparseable)?.to_string();

        if self.config.dedup_urls {
            let mut seen = self.url_seen.lock().expect("url bloom poisoned");
            if seen.check_and_set(&normalized) {
                return Err(DropReason::DuplicateUrl);
            }
        }

        let domain = registrable_domain(&host);

        if self.config.anti_public && domain_suffixes(&host).iter().any(|s| is_public_domain(s)) {
            return Err(DropReason::PublicDomain);
        }

        if self.config.dedup_domains {
            let mut seen = self.domain_seen.lock().expect("domain bloom poisoned");
            if seen.check_and_set(&domain) {
                return Err(DropReason::DuplicateDomain);
            }
        }

        if self.config.parameters_only && parsed.query().map(|q| q.is_empty()).unwrap_or(true) {
            return Err(DropReason::NoParameters);
        }

        if !self.config.tld_whitelist.is_empty() || !self.config.tld_blacklist.is_empty() {
            let tld = domain.rsplit('.').next().unwrap_or_default().to_string();
            if self.config.tld_blacklist.iter().any(|t| *t == tld) {
                return Err(DropReason::Tld);
            }
            if !self.config.tld_whitelist.is_empty()
                && !self.config.tld_whitelist.iter().any(|t| *t == tld)
            {
                return Err(DropReason::Tld);
            }
        }

        if !self.config.exclude_keywords.is_empty() || !self.config.include_keywords.is_empty() {
            let lower = normalized.to_lowercase();
            if self
                .config
                .exclude_keywords
                .iter()
                .any(|k| lower.contains(&k.to_lowercase()))
            {
                return Err(DropReason::Keyword);
            }
            if !self.config.include_keywords.is_empty()
                && !self
                    .config
                    .include_keywords
                    .iter()
                    .any(|k| lower.contains(&k.to_lowercase()))
            {
                return Err(DropReason::Keyword);
            }
        }

        Ok(normalized)
    }

    /// Filters a batch, preserving order of survivors.
    pub fn check_all<'a, I>(&self, urls: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        urls.into_iter().filter_map(|u| self.check(u)).collect()
    }

    /// Replaces both bloom filters with fresh ones. Counters survive.
    pub fn reset(&self) {
        let (urls, domains) = Self::make_blooms(&self.config);
        *self.url_seen.lock().expect("url bloom poisoned") = urls;
        *self.domain_seen.lock().expect("domain bloom poisoned") = domains;
    }

    /// Counter snapshot.
    pub fn stats(&self) -> FilterStats {
        FilterStats {
            input: self.counters.input.load(Ordering::Relaxed),
            passed: self.counters.passed.load(Ordering::Relaxed),
            dropped_length: self.counters.length.load(Ordering::Relaxed),
            dropped_unparseable: self.counters.unparseable.load(Ordering::Relaxed),
            dropped_duplicate_url: self.counters.duplicate_url.load(Ordering::Relaxed),
            dropped_public_domain: self.counters.public_domain.load(Ordering::Relaxed),
            dropped_duplicate_domain: self.counters.duplicate_domain.load(Ordering::Relaxed),
            dropped_no_parameters: self.counters.no_parameters.load(Ordering::Relaxed),
            dropped_tld: self.counters.tld.load(Ordering::Relaxed),
            dropped_keyword: self.counters.keyword.load(Ordering::Relaxed),
        }
    }
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> FilterConfig {
        FilterConfig {
            expected_urls: 10_000,
            expected_domains: 1_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_length_bounds() {
        let pipeline = FilterPipeline::new(FilterConfig {
            min_url_length: 15,
            max_url_length: 40,
            ..small_config()
        });
        assert!(pipeline.check("https://a.io/").is_none());
        assert!(pipeline.check("https://example.com/ok").is_some());
        assert!(pipeline
            .check("https://example.com/far-too-long-for-this-pipeline-config")
            .is_none());
        assert_eq!(pipeline.stats().dropped_length, 2);
    }

    #[test]
    fn test_url_dedup_via_normalization() {
        let pipeline = FilterPipeline::new(small_config());
        assert!(pipeline.check("https://example.com/a").is_some());
        // Trailing slash and tracking params normalize away.
        assert!(pipeline.check("https://example.com/a/").is_none());
        assert!(pipeline.check("https://EXAMPLE.com/a?utm_source=x").is_none());
        assert_eq!(pipeline.stats().dropped_duplicate_url, 2);
    }

    #[test]
    fn test_anti_public_suppresses_subdomains() {
        let pipeline = FilterPipeline::new(small_config());
        assert!(pipeline.check("https://www.facebook.com/somepage").is_none());
        assert!(pipeline.check("https://m.facebook.com/other").is_none());
        assert_eq!(pipeline.stats().dropped_public_domain, 2);
    }

    #[test]
    fn test_redirect_unwrap_feeds_dedup() {
        let pipeline = FilterPipeline::new(small_config());
        assert!(pipeline.check("https://example.com/landing").is_some());
        let wrapped = "https://www.google.com/url?q=https://example.com/landing&sa=U";
        assert!(pipeline.check(wrapped).is_none());
        assert_eq!(pipeline.stats().dropped_duplicate_url, 1);
    }

    #[test]
    fn test_domain_dedup() {
        let pipeline = FilterPipeline::new(FilterConfig {
            dedup_domains: true,
            ..small_config()
        });
        assert!(pipeline.check("https://example.com/a").is_some());
        assert!(pipeline.check("https://www.example.com/b").is_none());
        assert!(pipeline.check("https://other.org/c").is_some());
        assert_eq!(pipeline.stats().dropped_duplicate_domain, 1);
    }

    #[test]
    fn test_parameters_only() {
        let pipeline = FilterPipeline::new(FilterConfig {
            parameters_only: true,
            ..small_config()
        });
        assert!(pipeline.check("https://example.com/page?id=1").is_some());
        assert!(pipeline.check("https://example.com/static").is_none());
        assert_eq!(pipeline.stats().dropped_no_parameters, 1);
    }

    #[test]
    fn test_tld_whitelist_and_blacklist() {
        let pipeline = FilterPipeline::new(FilterConfig {
            tld_whitelist: vec!["com".to_string()],
            tld_blacklist: vec!["gov".to_string()],
            ..small_config()
        });
        assert!(pipeline.check("https://example.com/x").is_some());
        assert!(pipeline.check("https://example.org/x").is_none());
        assert!(pipeline.check("https://example.gov/x").is_none());
        assert_eq!(pipeline.stats().dropped_tld, 2);
    }

    #[test]
    fn test_keyword_screens() {
        let pipeline = FilterPipeline::new(FilterConfig {
            include_keywords: vec!["admin".to_string()],
            exclude_keywords: vec!["logout".to_string()],
            ..small_config()
        });
        assert!(pipeline.check("https://example.com/admin/login").is_some());
        assert!(pipeline.check("https://example.com/admin/logout").is_none());
        assert!(pipeline.check("https://example.com/public").is_none());
        assert_eq!(pipeline.stats().dropped_keyword, 2);
    }

    #[test]
    fn test_spec_end_to_end_scenario() {
        let pipeline = FilterPipeline::new(small_config());
        let inputs = [
            "https://example.com/a",
            "https://example.com/a/",
            "https://example.com/b?utm_source=x",
            "https://example.com/b",
            "https://www.facebook.com/foo",
        ];
        let survivors = pipeline.check_all(inputs);
        assert_eq!(
            survivors,
            vec!["https://example.com/a", "https://example.com/b"]
        );

        // With domain dedup on, only one example.com URL survives.
        let pipeline = FilterPipeline::new(FilterConfig {
            dedup_domains: true,
            ..small_config()
        });
        let survivors = pipeline.check_all(inputs);
        assert_eq!(survivors, vec!["https://example.com/a"]);
    }

    #[test]
    fn test_monotone_adding_stages_only_reduces() {
        let inputs = [
            "https://example.com/a?id=1",
            "https://example.com/b",
            "https://www.facebook.com/c",
            "https://other.org/d?x=2",
        ];
        let loose = FilterPipeline::new(FilterConfig {
            anti_public: false,
            dedup_domains: false,
            parameters_only: false,
            ..small_config()
        });
        let strict = FilterPipeline::new(FilterConfig {
            anti_public: true,
            dedup_domains: true,
            parameters_only: true,
            ..small_config()
        });
        let loose_out = loose.check_all(inputs);
        let strict_out = strict.check_all(inputs);
        assert!(strict_out.len() <= loose_out.len());
        for url in &strict_out {
            assert!(loose_out.contains(url));
        }
    }

    #[test]
    fn test_reset_forgets_seen_urls() {
        let pipeline = FilterPipeline::new(small_config());
        assert!(pipeline.check("https://example.com/a").is_some());
        assert!(pipeline.check("https://example.com/a").is_none());
        pipeline.reset();
        assert!(pipeline.check("https://example.com/a").is_some());
    }

    #[test]
    fn test_stats_accounting() {
        let pipeline = FilterPipeline::new(small_config());
        pipeline.check("https://example.com/a");
        pipeline.check("https://example.com/a");
        pipeline.check("this is not a url at all");
        let stats = pipeline.stats();
        assert_eq!(stats.input, 3);
        assert_eq!(stats.passed, 1);
        assert_eq!(stats.dropped_duplicate_url, 1);
        assert_eq!(stats.dropped_unparseable, 1);
    }
}

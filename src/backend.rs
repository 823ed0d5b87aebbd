//! Search backend abstraction: one request in, one classified outcome out.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::proxy::Proxy;

/// Categorical outcome of one search response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// At least one result URL was extracted.
    Success,
    /// A well-formed result page with nothing on it.
    NoResults,
    /// A CAPTCHA wall.
    Captcha,
    /// A soft block, including HTTP 429 rate limiting and 503.
    Blocked,
    /// Transport failure or unexpected status; retriable.
    Error,
}

impl Classification {
    /// Whether the engine should retry the task on a fresh proxy.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Classification::Captcha | Classification::Blocked | Classification::Error
        )
    }
}

/// The classified result of one search request.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub classification: Classification,
    /// Extracted result URLs, first-seen order, deduplicated per response.
    pub urls: Vec<String>,
    /// Whether a next-page affordance was present.
    pub has_next_page: bool,
    pub latency: Duration,
    /// HTTP status, when a response was received at all.
    pub status_code: Option<u16>,
    /// Human-readable failure detail for `Error` outcomes.
    pub error: Option<String>,
}

impl SearchOutcome {
    /// Shorthand for a transport-level failure.
    pub fn error(message: impl Into<String>, latency: Duration) -> Self {
        Self {
            classification: Classification::Error,
            urls: Vec::new(),
            has_next_page: false,
            latency,
            status_code: None,
            error: Some(message.into()),
        }
    }
}

/// One search request → one classified outcome.
///
/// Implementations bind the request to the given proxy, send the supplied
/// header set verbatim, and never panic on adversarial responses: every
/// failure mode is folded into the outcome's [`Classification`].
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Performs one search for `dork` at zero-based `page` through `proxy`.
    async fn search(&self, dork: &str, page: u32, proxy: &Proxy, headers: HeaderMap)
        -> SearchOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classifications() {
        assert!(Classification::Captcha.is_retriable());
        assert!(Classification::Blocked.is_retriable());
        assert!(Classification::Error.is_retriable());
        assert!(!Classification::Success.is_retriable());
        assert!(!Classification::NoResults.is_retriable());
    }

    #[test]
    fn test_classification_serde_names() {
        let json = serde_json::to_string(&Classification::NoResults).unwrap();
        assert_eq!(json, "\"no_results\"");
        let back: Classification = serde_json::from_str("\"captcha\"").unwrap();
        assert_eq!(back, Classification::Captcha);
    }

    #[test]
    fn test_error_outcome_shape() {
        let outcome = SearchOutcome::error("connection refused", Duration::from_millis(12));
        assert_eq!(outcome.classification, Classification::Error);
        assert!(outcome.urls.is_empty());
        assert!(!outcome.has_next_page);
        assert_eq!(outcome.error.as_deref(), Some("connection refused"));
    }
}

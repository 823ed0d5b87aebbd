//! Error types for the scraping engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, ScrapeError>;

/// Errors that can occur while scraping.
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A proxy line did not match any recognized format.
    #[error("line {line}: invalid proxy format: {input}")]
    ParseLine { line: usize, input: String },

    /// The pool has no proxy that is currently available.
    #[error("no proxy available")]
    NoProxyAvailable,

    /// No proxy is registered under the given id.
    #[error("proxy not found: {0}")]
    ProxyNotFound(String),

    /// The engine has not been started (or was stopped).
    #[error("engine is not running")]
    NotRunning,

    /// The task buffer is full; the caller must back off.
    #[error("task buffer full")]
    BufferFull,

    /// URL parsing error.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// File or stream I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_parse_line() {
        let err = ScrapeError::ParseLine {
            line: 7,
            input: "not-a-proxy".to_string(),
        };
        assert_eq!(err.to_string(), "line 7: invalid proxy format: not-a-proxy");
    }

    #[test]
    fn test_error_display_no_proxy() {
        let err = ScrapeError::NoProxyAvailable;
        assert_eq!(err.to_string(), "no proxy available");
    }

    #[test]
    fn test_error_display_proxy_not_found() {
        let err = ScrapeError::ProxyNotFound("http_10.0.0.1_8080".to_string());
        assert_eq!(err.to_string(), "proxy not found: http_10.0.0.1_8080");
    }

    #[test]
    fn test_error_display_not_running() {
        let err = ScrapeError::NotRunning;
        assert_eq!(err.to_string(), "engine is not running");
    }

    #[test]
    fn test_error_display_buffer_full() {
        let err = ScrapeError::BufferFull;
        assert_eq!(err.to_string(), "task buffer full");
    }

    #[test]
    fn test_error_display_other() {
        let err = ScrapeError::Other("something went wrong".to_string());
        assert_eq!(err.to_string(), "something went wrong");
    }

    #[test]
    fn test_error_debug() {
        let err = ScrapeError::BufferFull;
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("BufferFull"));
    }
}

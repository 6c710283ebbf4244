//! Custom error types for abstractdigger.
//!
//! This module defines all error types used throughout the application.
//! All functions return `Result<T, DiggerError>` instead of using `unwrap()`.

use crate::corpus::{CandidateSet, Record};
use thiserror::Error;

/// Main error type for abstractdigger operations.
///
/// Uses `thiserror` for ergonomic error handling and automatic `Display`
/// implementation. The first four variants form the caller-facing taxonomy;
/// the rest are ambient failures that feed the retry policy.
#[derive(Debug, Error)]
pub enum DiggerError {
    /// No identity matches the query; user-correctable, surfaced verbatim
    #[error("no author found matching: {0}")]
    NotFound(String),

    /// The query matched several identities; a user decision is required
    #[error("ambiguous query '{}': {} candidates require selection", .0.query, .0.candidates.len())]
    Ambiguous(CandidateSet),

    /// Remote source down or rate-limited after the retry budget
    #[error("upstream {upstream} unavailable: {message} (retryable, try again in ~{retry_after_secs}s)")]
    UpstreamUnavailable {
        upstream: &'static str,
        message: String,
        retry_after_secs: u64,
    },

    /// Pagination failed partway; carries everything collected so far
    #[error("collection incomplete: {} records collected before failure", records.len())]
    PartialCollection {
        records: Vec<Record>,
        /// Cursor at which the failure occurred, for diagnostics
        cursor: Option<String>,
        #[source]
        source: Box<DiggerError>,
    },

    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Rate limited by external API
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// External API returned an error
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code from API
        code: i32,
        /// Error message from API
        message: String,
    },

    /// Response parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV serialization error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl DiggerError {
    /// Whether a retry might succeed: timeouts, rate limits, and 5xx
    /// responses are transient; everything else is not.
    pub fn is_transient(&self) -> bool {
        match self {
            DiggerError::Network(e) => e.is_timeout() || e.is_connect(),
            DiggerError::RateLimited(_) => true,
            DiggerError::Api { code, .. } => *code >= 500,
            _ => false,
        }
    }
}

/// Result type alias using `DiggerError`
pub type Result<T> = std::result::Result<T, DiggerError>;

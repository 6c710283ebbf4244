//! Pipeline configuration.
//!
//! Everything that used to be a scattered constant (polite-pool email, page
//! size, request intervals) lives in one struct injected at construction, so
//! components carry no ambient global state and tests can point the clients
//! at a mock server.

use std::time::Duration;

/// OpenAlex API base URL
pub const OPENALEX_API_BASE: &str = "https://api.openalex.org";

/// NCBI E-utilities base URL
pub const PUBMED_API_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Maximum results per page (OpenAlex limit)
pub const MAX_PER_PAGE: usize = 200;

/// Configuration shared by all pipeline components.
#[derive(Debug, Clone)]
pub struct DiggerConfig {
    /// Contact email sent as `mailto`/`email` for polite-pool access
    pub mailto: String,
    pub openalex_base_url: String,
    pub pubmed_base_url: String,
    /// Works per pagination request (capped at [`MAX_PER_PAGE`])
    pub per_page: usize,
    /// Optional ceiling on total records collected per identity
    pub max_records: Option<usize>,
    pub request_timeout: Duration,
    /// Retry attempts per request before giving up
    pub max_retries: u32,
    /// Concurrent abstract-chain workers per collection
    pub enrich_concurrency: usize,
    /// Whether the chain may fall back to PubMed at all
    pub pubmed_fallback: bool,
    /// Minimum spacing between OpenAlex requests (polite pool: 10 req/s)
    pub openalex_min_interval: Duration,
    /// Minimum spacing between PubMed requests (3 req/s unauthenticated)
    pub pubmed_min_interval: Duration,
    /// Maximum candidates returned for disambiguation
    pub candidate_cap: usize,
    /// Name-search score a top candidate must reach to resolve directly
    pub confidence_threshold: f64,
    /// Minimum lead over the runner-up to resolve directly
    pub confidence_margin: f64,
}

impl DiggerConfig {
    /// Configuration with the given contact email and default tuning.
    pub fn new(mailto: impl Into<String>) -> Self {
        Self {
            mailto: mailto.into(),
            ..Self::default()
        }
    }
}

impl Default for DiggerConfig {
    fn default() -> Self {
        Self {
            mailto: "digger@example.com".to_string(),
            openalex_base_url: OPENALEX_API_BASE.to_string(),
            pubmed_base_url: PUBMED_API_BASE.to_string(),
            per_page: MAX_PER_PAGE,
            max_records: None,
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            enrich_concurrency: 5,
            pubmed_fallback: true,
            openalex_min_interval: Duration::from_millis(100),
            pubmed_min_interval: Duration::from_millis(340),
            candidate_cap: 7,
            confidence_threshold: 50.0,
            confidence_margin: 25.0,
        }
    }
}

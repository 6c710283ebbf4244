//! OpenAlex API client (primary metadata index).
//!
//! Author lookup and cursor-paginated works retrieval for one author.
//!
//! API Best Practices (per OpenAlex docs):
//! - Use `mailto:email` parameter for polite pool (10 req/s vs 1 req/s)
//! - Use `per-page=200` for maximum results per page
//! - Use `cursor=*` then `meta.next_cursor` to walk unbounded result sets
//! - Implement exponential backoff for retries

use crate::config::{DiggerConfig, MAX_PER_PAGE};
use crate::corpus::{Grant, Identity, Provenance, Record};
use crate::error::{DiggerError, Result};
use crate::inverted::InvertedIndex;
use crate::pubmed::{clean_doi, clean_pmid};
use crate::ratelimit::RateLimiter;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fields requested from the works endpoint; everything the pipeline reads
const WORKS_SELECT: &str = "id,title,display_name,doi,ids,publication_year,type,cited_by_count,authorships,grants,abstract_inverted_index";

/// Opening cursor for a fresh pagination walk
pub const CURSOR_START: &str = "*";

/// Filters applied to an author's works collection.
#[derive(Debug, Clone, Default)]
pub struct WorkFilters {
    /// Minimum publication year (inclusive)
    pub year_from: Option<i32>,
    /// Maximum publication year (inclusive)
    pub year_to: Option<i32>,
    /// Allowed work types (e.g., "article", "book"); empty allows all
    pub work_types: Vec<String>,
}

/// One page of works plus the continuation state.
#[derive(Debug)]
pub struct WorksPage {
    pub records: Vec<Record>,
    /// Token for the next page; `None` when the walk is complete
    pub next_cursor: Option<String>,
    /// Server-reported total, when the header is present
    pub total: Option<u64>,
}

/// OpenAlex API client with rate limiting and bounded retries.
pub struct OpenAlexClient {
    client: Client,
    base_url: String,
    mailto: String,
    limiter: Arc<RateLimiter>,
    max_retries: u32,
}

impl OpenAlexClient {
    pub fn new(config: &DiggerConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(format!("abstractdigger/0.1 (mailto:{})", config.mailto))
            .build()
            .map_err(|e| DiggerError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.openalex_base_url.trim_end_matches('/').to_string(),
            mailto: config.mailto.clone(),
            limiter,
            max_retries: config.max_retries,
        })
    }

    /// Fetch a single author by short OpenAlex ID (e.g., "A5023888391").
    pub async fn author_by_id(&self, author_id: &str) -> Result<Identity> {
        let url = format!(
            "{}/authors/{}?mailto={}",
            self.base_url,
            urlencoding::encode(author_id),
            self.mailto
        );

        match self.get::<AuthorPayload>(&url).await {
            Ok(payload) => parse_author(payload)
                .ok_or_else(|| DiggerError::Parse("author payload missing id".to_string())),
            Err(DiggerError::Api { code: 404, .. }) => {
                Err(DiggerError::NotFound(author_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch authors whose registered ORCID matches exactly.
    pub async fn authors_by_orcid(&self, orcid: &str) -> Result<Vec<Identity>> {
        let url = format!(
            "{}/authors?filter=orcid:{}&per-page=10&mailto={}",
            self.base_url,
            urlencoding::encode(orcid),
            self.mailto
        );
        let response: AuthorsResponse = self.get(&url).await?;
        Ok(response
            .results
            .into_iter()
            .filter_map(parse_author)
            .collect())
    }

    /// Full-text author name search.
    pub async fn search_authors(&self, name: &str, per_page: usize) -> Result<Vec<Identity>> {
        let url = format!(
            "{}/authors?search={}&per-page={}&mailto={}",
            self.base_url,
            urlencoding::encode(name),
            per_page.min(MAX_PER_PAGE),
            self.mailto
        );
        let response: AuthorsResponse = self.get(&url).await?;
        Ok(response
            .results
            .into_iter()
            .filter_map(parse_author)
            .collect())
    }

    /// Fetch one page of an author's works at the given cursor.
    pub async fn works_page(
        &self,
        author_id: &str,
        filters: &WorkFilters,
        cursor: &str,
        per_page: usize,
    ) -> Result<WorksPage> {
        let url = build_works_url(&self.base_url, &self.mailto, author_id, filters, cursor, per_page);
        debug!(cursor = cursor, "Fetching works page");

        let response: WorksResponse = self.get(&url).await?;
        let total = response.meta.as_ref().and_then(|m| m.count);
        let next_cursor = response
            .meta
            .and_then(|m| m.next_cursor)
            .filter(|c| !c.is_empty());
        let records = response.results.into_iter().filter_map(parse_work).collect();

        Ok(WorksPage {
            records,
            next_cursor,
            total,
        })
    }

    /// GET with rate limiting and bounded exponential-backoff retries.
    ///
    /// Transient failures (timeouts, 429, 5xx) are retried up to the budget;
    /// exhaustion surfaces as `UpstreamUnavailable`.
    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut backoff = Duration::from_millis(500);

        for attempt in 0..self.max_retries {
            self.limiter.acquire().await;

            match self.try_get(url).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    if attempt + 1 >= self.max_retries {
                        return Err(DiggerError::UpstreamUnavailable {
                            upstream: "openalex",
                            message: e.to_string(),
                            retry_after_secs: 60,
                        });
                    }
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
                    warn!(
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Transient OpenAlex error, backing off"
                    );
                    tokio::time::sleep(backoff + jitter).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }

        Err(DiggerError::UpstreamUnavailable {
            upstream: "openalex",
            message: "retry budget exhausted".to_string(),
            retry_after_secs: 60,
        })
    }

    /// Single request attempt with status classification.
    async fn try_get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(DiggerError::RateLimited(60));
        }

        if !status.is_success() {
            return Err(DiggerError::Api {
                code: status.as_u16() as i32,
                message: format!("OpenAlex API error: {}", status),
            });
        }

        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| DiggerError::Parse(format!("Failed to parse OpenAlex response: {}", e)))
    }
}

/// Strip the `https://openalex.org/` prefix from entity IDs.
pub fn short_id(id: &str) -> String {
    id.trim_start_matches("https://openalex.org/").to_string()
}

/// Strip the `https://orcid.org/` prefix from a registered ORCID.
fn clean_orcid(orcid: &str) -> String {
    orcid.trim_start_matches("https://orcid.org/").to_string()
}

/// Build the filter expression for an author's works query.
fn works_filter(author_id: &str, filters: &WorkFilters) -> String {
    let mut parts = vec![format!("author.id:{}", author_id)];

    match (filters.year_from, filters.year_to) {
        (Some(from), Some(to)) => parts.push(format!("publication_year:{}-{}", from, to)),
        (Some(from), None) => parts.push(format!("publication_year:>{}", from - 1)),
        (None, Some(to)) => parts.push(format!("publication_year:<{}", to + 1)),
        (None, None) => {}
    }

    if !filters.work_types.is_empty() {
        parts.push(format!("type:{}", filters.work_types.join("|")));
    }

    parts.join(",")
}

/// Build a works-page URL for one cursor position.
fn build_works_url(
    base_url: &str,
    mailto: &str,
    author_id: &str,
    filters: &WorkFilters,
    cursor: &str,
    per_page: usize,
) -> String {
    format!(
        "{}/works?filter={}&per-page={}&cursor={}&select={}&mailto={}",
        base_url,
        works_filter(author_id, filters),
        per_page.min(MAX_PER_PAGE),
        urlencoding::encode(cursor),
        WORKS_SELECT,
        mailto
    )
}

// === OpenAlex API Response Types ===

#[derive(Debug, Deserialize)]
struct AuthorsResponse {
    #[serde(default)]
    results: Vec<AuthorPayload>,
}

#[derive(Debug, Deserialize)]
struct AuthorPayload {
    id: Option<String>,
    display_name: Option<String>,
    orcid: Option<String>,
    #[serde(default)]
    affiliations: Vec<AffiliationPayload>,
    works_count: Option<i64>,
    cited_by_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AffiliationPayload {
    institution: Option<InstitutionPayload>,
}

#[derive(Debug, Deserialize)]
struct InstitutionPayload {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorksResponse {
    meta: Option<WorksMeta>,
    #[serde(default)]
    results: Vec<WorkPayload>,
}

#[derive(Debug, Deserialize)]
struct WorksMeta {
    count: Option<u64>,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkPayload {
    id: Option<String>,
    title: Option<String>,
    display_name: Option<String>,
    doi: Option<String>,
    ids: Option<WorkIds>,
    publication_year: Option<i32>,
    #[serde(rename = "type")]
    work_type: Option<String>,
    cited_by_count: Option<i64>,
    authorships: Option<Vec<Authorship>>,
    grants: Option<Vec<GrantPayload>>,
    #[serde(rename = "abstract_inverted_index")]
    abstract_index: Option<InvertedIndex>,
}

#[derive(Debug, Deserialize)]
struct WorkIds {
    pmid: Option<String>,
    doi: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Authorship {
    author: Option<AuthorRef>,
}

#[derive(Debug, Deserialize)]
struct AuthorRef {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GrantPayload {
    funder: Option<String>,
    funder_display_name: Option<String>,
    award_id: Option<String>,
}

/// Validate an author payload into an [`Identity`]. Requires an ID.
fn parse_author(payload: AuthorPayload) -> Option<Identity> {
    let id = short_id(&payload.id?);
    let affiliations: Vec<String> = payload
        .affiliations
        .into_iter()
        .filter_map(|a| a.institution.and_then(|i| i.display_name))
        .take(3)
        .collect();

    Some(Identity {
        display_name: payload.display_name.unwrap_or_else(|| id.clone()),
        id,
        orcid: payload.orcid.map(|o| clean_orcid(&o)),
        affiliations,
        works_count: payload.works_count.unwrap_or(0),
        cited_by_count: payload.cited_by_count.unwrap_or(0),
    })
}

/// Validate a work payload into a [`Record`]. Requires an ID; identifier
/// fields are cleaned of URL-prefixed forms here so downstream lookups never
/// see them.
fn parse_work(payload: WorkPayload) -> Option<Record> {
    let id = short_id(&payload.id?);

    let doi = payload
        .doi
        .or_else(|| payload.ids.as_ref().and_then(|ids| ids.doi.clone()))
        .and_then(|d| clean_doi(&d));
    let pmid = payload
        .ids
        .and_then(|ids| ids.pmid)
        .and_then(|p| clean_pmid(&p));

    let authors = payload
        .authorships
        .unwrap_or_default()
        .into_iter()
        .filter_map(|a| a.author.and_then(|r| r.display_name))
        .collect();

    let grants = payload
        .grants
        .unwrap_or_default()
        .into_iter()
        .map(|g| Grant {
            funder: g.funder.map(|f| short_id(&f)),
            funder_display_name: g.funder_display_name,
            award_id: g.award_id,
        })
        .collect();

    Some(Record {
        id,
        doi,
        pmid,
        title: payload.display_name.or(payload.title),
        publication_year: payload.publication_year,
        work_type: payload.work_type,
        cited_by_count: payload.cited_by_count.unwrap_or(0),
        authors,
        grants,
        abstract_text: None,
        provenance: Provenance::None,
        inverted_index: payload.abstract_index.filter(|i| !i.is_empty()),
    })
}

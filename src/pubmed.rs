//! PubMed / NCBI E-utilities client (secondary biomedical index).
//!
//! Three lookup modes feed the abstract resolution chain: efetch by PMID
//! (most reliable), esearch by DOI, and esearch by exact title. Abstracts
//! come back as XML; labeled sections are joined into one plain string.
//!
//! API Details:
//! - esearch.fcgi supports `retmode=json`; efetch.fcgi is XML only
//! - Rate limit: 3 req/s without an API key
//! - `email`/`tool` parameters are expected for polite access

use crate::config::DiggerConfig;
use crate::error::{DiggerError, Result};
use crate::ratelimit::RateLimiter;
use rand::Rng;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Tool name reported to NCBI
const TOOL_NAME: &str = "abstractdigger";

/// Matches returned by a title esearch before the uniqueness check
const TITLE_SEARCH_RETMAX: usize = 5;

/// PubMed E-utilities client with rate limiting and bounded retries.
pub struct PubMedClient {
    client: Client,
    base_url: String,
    email: String,
    limiter: Arc<RateLimiter>,
    max_retries: u32,
}

impl PubMedClient {
    pub fn new(config: &DiggerConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(format!("{}/0.1 (mailto:{})", TOOL_NAME, config.mailto))
            .build()
            .map_err(|e| DiggerError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.pubmed_base_url.trim_end_matches('/').to_string(),
            email: config.mailto.clone(),
            limiter,
            max_retries: config.max_retries,
        })
    }

    /// Fetch an abstract by PMID via efetch.
    pub async fn abstract_by_pmid(&self, pmid: &str) -> Result<Option<String>> {
        let Some(pmid) = clean_pmid(pmid) else {
            return Ok(None);
        };

        let xml = self
            .get_text(
                "efetch.fcgi",
                &[("db", "pubmed"), ("id", &pmid), ("retmode", "xml"), ("rettype", "xml")],
            )
            .await?;

        Ok(extract_abstract_xml(&xml))
    }

    /// Find the PMID registered for a DOI, if any.
    pub async fn pmid_for_doi(&self, doi: &str) -> Result<Option<String>> {
        let Some(doi) = clean_doi(doi) else {
            return Ok(None);
        };

        let term = format!("{}[DOI]", doi);
        let ids = self.esearch(&term, 1).await?;
        Ok(ids.into_iter().next())
    }

    /// DOI lookup: resolve to a PMID, then fetch the abstract.
    pub async fn abstract_by_doi(&self, doi: &str) -> Result<Option<String>> {
        match self.pmid_for_doi(doi).await? {
            Some(pmid) => self.abstract_by_pmid(&pmid).await,
            None => Ok(None),
        }
    }

    /// Exact-title search, accepted only when exactly one article matches.
    ///
    /// Anything else (zero or two-plus matches) returns `None` to avoid
    /// attaching a stranger's abstract to the record.
    pub async fn unique_pmid_for_title(&self, title: &str) -> Result<Option<String>> {
        let Some(title) = sanitize_title(title) else {
            return Ok(None);
        };

        let term = format!("\"{}\"[Title]", title);
        let ids = self.esearch(&term, TITLE_SEARCH_RETMAX).await?;

        if ids.len() == 1 {
            Ok(ids.into_iter().next())
        } else {
            debug!(matches = ids.len(), "Title search not unique, rejecting");
            Ok(None)
        }
    }

    /// Title lookup: unique-match search, then fetch the abstract.
    pub async fn abstract_by_unique_title(&self, title: &str) -> Result<Option<String>> {
        match self.unique_pmid_for_title(title).await? {
            Some(pmid) => self.abstract_by_pmid(&pmid).await,
            None => Ok(None),
        }
    }

    /// Run an esearch query, returning the matching PMIDs.
    async fn esearch(&self, term: &str, retmax: usize) -> Result<Vec<String>> {
        let retmax = retmax.to_string();
        let text = self
            .get_text(
                "esearch.fcgi",
                &[
                    ("db", "pubmed"),
                    ("term", term),
                    ("retmode", "json"),
                    ("retmax", &retmax),
                ],
            )
            .await?;

        let response: ESearchResponse = serde_json::from_str(&text)
            .map_err(|e| DiggerError::Parse(format!("Failed to parse esearch response: {}", e)))?;

        Ok(response.esearchresult.map(|r| r.idlist).unwrap_or_default())
    }

    /// GET with rate limiting and bounded exponential-backoff retries.
    async fn get_text(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<String> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut backoff = Duration::from_millis(500);

        for attempt in 0..self.max_retries {
            self.limiter.acquire().await;

            match self.try_get_text(&url, params).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() => {
                    if attempt + 1 >= self.max_retries {
                        return Err(DiggerError::UpstreamUnavailable {
                            upstream: "pubmed",
                            message: e.to_string(),
                            retry_after_secs: 30,
                        });
                    }
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
                    warn!(
                        endpoint = endpoint,
                        attempt = attempt + 1,
                        error = %e,
                        "Transient PubMed error, backing off"
                    );
                    tokio::time::sleep(backoff + jitter).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }

        Err(DiggerError::UpstreamUnavailable {
            upstream: "pubmed",
            message: "retry budget exhausted".to_string(),
            retry_after_secs: 30,
        })
    }

    async fn try_get_text(&self, url: &str, params: &[(&str, &str)]) -> Result<String> {
        let response = self
            .client
            .get(url)
            .query(params)
            .query(&[("email", self.email.as_str()), ("tool", TOOL_NAME)])
            .send()
            .await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(DiggerError::RateLimited(1));
        }

        if !status.is_success() {
            return Err(DiggerError::Api {
                code: status.as_u16() as i32,
                message: format!("PubMed API error: {}", status),
            });
        }

        Ok(response.text().await?)
    }
}

// === E-utilities Response Types ===

#[derive(Debug, Deserialize)]
struct ESearchResponse {
    esearchresult: Option<ESearchResult>,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}

/// Reduce a PMID in any of its common forms (bare digits, pubmed URL,
/// `pmid:` prefix) to plain digits. Returns `None` when no ID is present.
pub fn clean_pmid(pmid: &str) -> Option<String> {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    let re = DIGITS.get_or_init(|| Regex::new(r"\d{6,9}").expect("static pattern"));
    re.find(pmid.trim()).map(|m| m.as_str().to_string())
}

/// Strip resolver-URL prefixes from a DOI.
pub fn clean_doi(doi: &str) -> Option<String> {
    let doi = doi.trim();
    let doi = doi
        .strip_prefix("https://doi.org/")
        .or_else(|| doi.strip_prefix("http://doi.org/"))
        .or_else(|| doi.strip_prefix("doi.org/"))
        .unwrap_or(doi);

    if doi.is_empty() {
        None
    } else {
        Some(doi.to_string())
    }
}

/// Prepare a title for an exact-match search: drop brackets, normalize
/// quotes, truncate to 200 chars. Titles under 10 chars are too generic to
/// search safely and are rejected.
fn sanitize_title(title: &str) -> Option<String> {
    static BRACKETS: OnceLock<Regex> = OnceLock::new();
    let re = BRACKETS.get_or_init(|| Regex::new(r"[\[\]{}()]").expect("static pattern"));

    let cleaned = re.replace_all(title.trim(), "").replace('"', "'");
    let cleaned: String = cleaned.chars().take(200).collect();
    let cleaned = cleaned.trim().to_string();

    if cleaned.len() < 10 {
        None
    } else {
        Some(cleaned)
    }
}

/// Pull the abstract out of an efetch XML document.
///
/// Labeled sections (`<AbstractText Label="METHODS">…`) are joined with a
/// space in document order. Returns `None` when the article has no abstract.
fn extract_abstract_xml(xml: &str) -> Option<String> {
    let sections = capture_all_tags(xml, "AbstractText");
    if sections.is_empty() {
        None
    } else {
        Some(sections.join(" "))
    }
}

/// Capture the text content of every `<tag …>…</tag>` occurrence.
fn capture_all_tags(xml: &str, tag: &str) -> Vec<String> {
    let pattern = format!(r"(?is)<{tag}\b[^>]*>(.*?)</{tag}>");
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };

    re.captures_iter(xml)
        .filter_map(|caps| caps.get(1))
        .map(|m| unescape_xml(&strip_xml_tags(m.as_str())))
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .collect()
}

/// Strip nested markup (e.g., `<i>`, `<sup>`) from captured content.
fn strip_xml_tags(value: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let re = TAG.get_or_init(|| Regex::new(r"<[^>]+>").expect("static pattern"));
    re.replace_all(value, "").to_string()
}

/// Decode the five predefined XML entities.
fn unescape_xml(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_pmid() {
        assert_eq!(clean_pmid("12345678").as_deref(), Some("12345678"));
        assert_eq!(
            clean_pmid("https://pubmed.ncbi.nlm.nih.gov/12345678").as_deref(),
            Some("12345678")
        );
        assert_eq!(
            clean_pmid("https://pubmed.ncbi.nlm.nih.gov/12345678/").as_deref(),
            Some("12345678")
        );
        assert_eq!(clean_pmid("pmid:987654").as_deref(), Some("987654"));
        assert_eq!(clean_pmid("none here"), None);
        assert_eq!(clean_pmid(""), None);
    }

    #[test]
    fn test_clean_doi() {
        assert_eq!(
            clean_doi("https://doi.org/10.1234/example").as_deref(),
            Some("10.1234/example")
        );
        assert_eq!(
            clean_doi("http://doi.org/10.1234/example").as_deref(),
            Some("10.1234/example")
        );
        assert_eq!(clean_doi("10.1234/example").as_deref(), Some("10.1234/example"));
        assert_eq!(clean_doi(""), None);
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(
            sanitize_title("A study of [something] (revised)").as_deref(),
            Some("A study of something revised")
        );
        assert_eq!(
            sanitize_title("Said \"quoted\" things here").as_deref(),
            Some("Said 'quoted' things here")
        );
        // too short to search safely
        assert_eq!(sanitize_title("Short"), None);

        let long = "x".repeat(300);
        assert_eq!(sanitize_title(&long).map(|t| t.len()), Some(200));
    }

    #[test]
    fn test_extract_abstract_xml() {
        let xml = r#"<PubmedArticleSet><PubmedArticle><MedlineCitation><Article>
            <Abstract>
              <AbstractText Label="BACKGROUND">Context &amp; setting.</AbstractText>
              <AbstractText Label="RESULTS">We found <i>things</i>.</AbstractText>
            </Abstract>
        </Article></MedlineCitation></PubmedArticle></PubmedArticleSet>"#;

        assert_eq!(
            extract_abstract_xml(xml).as_deref(),
            Some("Context & setting. We found things.")
        );
    }

    #[test]
    fn test_extract_abstract_xml_missing() {
        let xml = "<PubmedArticleSet><PubmedArticle/></PubmedArticleSet>";
        assert_eq!(extract_abstract_xml(xml), None);
    }

    // === Network behavior against a mock server ===

    use crate::config::DiggerConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_client(base_url: String) -> PubMedClient {
        let config = DiggerConfig {
            pubmed_base_url: base_url,
            pubmed_min_interval: Duration::from_millis(1),
            ..DiggerConfig::default()
        };
        let limiter = Arc::new(crate::ratelimit::RateLimiter::new(config.pubmed_min_interval));
        PubMedClient::new(&config, limiter).expect("client builds")
    }

    #[tokio::test]
    async fn test_title_search_rejects_multiple_matches() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/esearch.fcgi")
            .match_query(mockito::Matcher::UrlEncoded(
                "term".to_string(),
                "\"A sufficiently long title\"[Title]".to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"esearchresult":{"idlist":["111111","222222"]}}"#)
            .create_async()
            .await;

        let client = test_client(server.url());
        let pmid = client
            .unique_pmid_for_title("A sufficiently long title")
            .await
            .expect("request succeeds");
        assert_eq!(pmid, None);
    }

    #[tokio::test]
    async fn test_doi_lookup_then_fetch() {
        let mut server = mockito::Server::new_async().await;
        let _search = server
            .mock("GET", "/esearch.fcgi")
            .match_query(mockito::Matcher::UrlEncoded(
                "term".to_string(),
                "10.1234/example[DOI]".to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"esearchresult":{"idlist":["31452104"]}}"#)
            .create_async()
            .await;
        let _fetch = server
            .mock("GET", "/efetch.fcgi")
            .match_query(mockito::Matcher::UrlEncoded(
                "id".to_string(),
                "31452104".to_string(),
            ))
            .with_status(200)
            .with_body("<Abstract><AbstractText>Found it.</AbstractText></Abstract>")
            .create_async()
            .await;

        let client = test_client(server.url());
        let text = client
            .abstract_by_doi("https://doi.org/10.1234/example")
            .await
            .expect("request succeeds");
        assert_eq!(text.as_deref(), Some("Found it."));
    }
}

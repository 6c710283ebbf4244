//! Abstract resolution chain.
//!
//! Per-record ordered fallback for filling the abstract field: primary
//! source text first, then the secondary source by increasingly fuzzy
//! identifiers. The chain is data — an ordered slice of [`Step`]s walked by
//! a first-success combinator — so steps can be added, removed, or
//! reordered without touching control flow.
//!
//! Every network-backed step is individually absorbed: a timeout, miss, or
//! rate-limit on one step logs and falls through to the next. A record for
//! which every step fails comes back with `Provenance::None` and no text;
//! the chain itself never errors.

use crate::corpus::{Provenance, Record};
use crate::inverted;
use crate::pubmed::PubMedClient;
use tracing::{debug, warn};

/// One strategy for locating a record's abstract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Text already on the record, decoding the inverted index if needed
    Primary,
    /// Secondary source by exact cross-reference ID (most reliable)
    SecondaryByPmid,
    /// Secondary source by DOI
    SecondaryByDoi,
    /// Secondary source by exact title, unique match only
    SecondaryByTitle,
}

impl Step {
    fn provenance(self) -> Provenance {
        match self {
            Step::Primary => Provenance::Primary,
            _ => Provenance::Secondary,
        }
    }
}

/// The default attempt order. Primary text always wins; secondary lookups
/// run most-reliable first.
pub const DEFAULT_CHAIN: &[Step] = &[
    Step::Primary,
    Step::SecondaryByPmid,
    Step::SecondaryByDoi,
    Step::SecondaryByTitle,
];

/// Outcome of a chain run: text plus how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub text: Option<String>,
    pub provenance: Provenance,
}

/// Walk the chain, short-circuiting at the first step that produces text.
///
/// Safe to invoke concurrently across records; the only shared state is the
/// secondary source's rate limiter inside `pubmed`.
pub async fn resolve(
    steps: &[Step],
    record: &Record,
    pubmed: Option<&PubMedClient>,
) -> Resolved {
    for step in steps {
        if let Some(text) = run_step(*step, record, pubmed).await {
            debug!(work = %record.id, step = ?step, "Abstract resolved");
            return Resolved {
                text: Some(text),
                provenance: step.provenance(),
            };
        }
    }

    Resolved {
        text: None,
        provenance: Provenance::None,
    }
}

/// Run the chain against a record and write the result into it.
///
/// Consumes the record's inverted index; the returned record is final.
pub async fn enrich(
    mut record: Record,
    steps: &[Step],
    pubmed: Option<&PubMedClient>,
) -> Record {
    let resolved = resolve(steps, &record, pubmed).await;
    record.finalize_abstract(resolved.text, resolved.provenance);
    record
}

/// Attempt a single step. `None` means "no text here, keep going" whether
/// the step missed, lacked an identifier, or failed outright.
async fn run_step(step: Step, record: &Record, pubmed: Option<&PubMedClient>) -> Option<String> {
    match step {
        Step::Primary => record
            .abstract_text
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| inverted::decode_opt(record.inverted_index.as_ref())),

        Step::SecondaryByPmid => {
            let pubmed = pubmed?;
            let pmid = record.pmid.as_deref()?;
            absorb(step, record, pubmed.abstract_by_pmid(pmid).await)
        }

        Step::SecondaryByDoi => {
            let pubmed = pubmed?;
            let doi = record.doi.as_deref()?;
            absorb(step, record, pubmed.abstract_by_doi(doi).await)
        }

        Step::SecondaryByTitle => {
            let pubmed = pubmed?;
            let title = record.title.as_deref()?;
            absorb(step, record, pubmed.abstract_by_unique_title(title).await)
        }
    }
}

/// Collapse a step failure into a miss so the chain can continue.
fn absorb(
    step: Step,
    record: &Record,
    result: crate::error::Result<Option<String>>,
) -> Option<String> {
    match result {
        Ok(text) => text.filter(|t| !t.trim().is_empty()),
        Err(e) => {
            warn!(work = %record.id, step = ?step, error = %e, "Abstract step failed, continuing");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiggerConfig;
    use crate::inverted::InvertedIndex;
    use crate::ratelimit::RateLimiter;
    use std::sync::Arc;
    use std::time::Duration;

    fn record_with(
        pmid: Option<&str>,
        doi: Option<&str>,
        inverted: Option<InvertedIndex>,
    ) -> Record {
        Record {
            id: "W1".to_string(),
            doi: doi.map(String::from),
            pmid: pmid.map(String::from),
            title: Some("A sufficiently long test title".to_string()),
            publication_year: Some(2021),
            work_type: Some("article".to_string()),
            cited_by_count: 0,
            authors: vec![],
            grants: vec![],
            abstract_text: None,
            provenance: Provenance::None,
            inverted_index: inverted,
        }
    }

    fn inverted_hello() -> InvertedIndex {
        [("Hello".to_string(), vec![0]), ("world".to_string(), vec![1])]
            .into_iter()
            .collect()
    }

    fn pubmed_client(base_url: String) -> PubMedClient {
        let config = DiggerConfig {
            pubmed_base_url: base_url,
            pubmed_min_interval: Duration::from_millis(1),
            max_retries: 1,
            ..DiggerConfig::default()
        };
        let limiter = Arc::new(RateLimiter::new(config.pubmed_min_interval));
        PubMedClient::new(&config, limiter).expect("client builds")
    }

    #[tokio::test]
    async fn test_primary_never_loses_to_secondary() {
        let mut server = mockito::Server::new_async().await;
        // A reachable secondary source that must never be consulted
        let fetch = server
            .mock("GET", "/efetch.fcgi")
            .match_query(mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let pubmed = pubmed_client(server.url());
        let record = record_with(Some("12345678"), Some("10.1/x"), Some(inverted_hello()));

        let resolved = resolve(DEFAULT_CHAIN, &record, Some(&pubmed)).await;
        assert_eq!(resolved.provenance, Provenance::Primary);
        assert_eq!(resolved.text.as_deref(), Some("Hello world"));
        fetch.assert_async().await;
    }

    #[tokio::test]
    async fn test_fallback_to_secondary_by_pmid() {
        let mut server = mockito::Server::new_async().await;
        let _fetch = server
            .mock("GET", "/efetch.fcgi")
            .match_query(mockito::Matcher::UrlEncoded(
                "id".to_string(),
                "12345678".to_string(),
            ))
            .with_status(200)
            .with_body("<Abstract><AbstractText>From PubMed.</AbstractText></Abstract>")
            .create_async()
            .await;

        let pubmed = pubmed_client(server.url());
        let record = record_with(Some("12345678"), None, None);

        let enriched = enrich(record, DEFAULT_CHAIN, Some(&pubmed)).await;
        assert_eq!(enriched.provenance, Provenance::Secondary);
        assert_eq!(enriched.abstract_text.as_deref(), Some("From PubMed."));
        assert!(enriched.inverted_index.is_none());
    }

    #[tokio::test]
    async fn test_title_step_rejects_multiple_matches() {
        let mut server = mockito::Server::new_async().await;
        let _search = server
            .mock("GET", "/esearch.fcgi")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"esearchresult":{"idlist":["111111","222222"]}}"#)
            .create_async()
            .await;

        let pubmed = pubmed_client(server.url());
        // Only the title step has anything to go on
        let record = record_with(None, None, None);

        let resolved = resolve(DEFAULT_CHAIN, &record, Some(&pubmed)).await;
        assert_eq!(resolved.provenance, Provenance::None);
        assert_eq!(resolved.text, None);
    }

    #[tokio::test]
    async fn test_step_failures_never_raise() {
        let mut server = mockito::Server::new_async().await;
        let _broken = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(500)
            .with_body("upstream down")
            .create_async()
            .await;

        let pubmed = pubmed_client(server.url());
        let record = record_with(Some("12345678"), Some("10.1/x"), None);

        let enriched = enrich(record, DEFAULT_CHAIN, Some(&pubmed)).await;
        assert_eq!(enriched.provenance, Provenance::None);
        assert_eq!(enriched.abstract_text, None);
    }

    #[tokio::test]
    async fn test_without_secondary_client_resolves_none() {
        let record = record_with(Some("12345678"), Some("10.1/x"), None);
        let resolved = resolve(DEFAULT_CHAIN, &record, None).await;
        assert_eq!(resolved.provenance, Provenance::None);
        assert_eq!(resolved.text, None);
    }

    #[tokio::test]
    async fn test_reordered_chain_is_data() {
        // Putting the title step first changes behavior without code changes.
        let mut server = mockito::Server::new_async().await;
        let _search = server
            .mock("GET", "/esearch.fcgi")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"esearchresult":{"idlist":["999999"]}}"#)
            .create_async()
            .await;
        let _fetch = server
            .mock("GET", "/efetch.fcgi")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("<Abstract><AbstractText>Unique hit.</AbstractText></Abstract>")
            .create_async()
            .await;

        let pubmed = pubmed_client(server.url());
        let record = record_with(None, None, Some(inverted_hello()));

        let chain = [Step::SecondaryByTitle, Step::Primary];
        let resolved = resolve(&chain, &record, Some(&pubmed)).await;
        assert_eq!(resolved.provenance, Provenance::Secondary);
        assert_eq!(resolved.text.as_deref(), Some("Unique hit."));
    }
}

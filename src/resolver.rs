//! Author identity resolution.
//!
//! Turns a raw query string (OpenAlex ID, ORCID, or free-text name) into a
//! resolved [`Identity`], or an [`DiggerError::Ambiguous`] carrying the
//! candidates when no single identity dominates. The ranking and the
//! resolve-or-disambiguate decision are pure functions over the candidate
//! list so they can be tuned against representative ambiguous-name cases.

use crate::config::DiggerConfig;
use crate::corpus::{CandidateSet, Identity};
use crate::error::{DiggerError, Result};
use crate::openalex::OpenAlexClient;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Candidates requested from a name search before ranking
const NAME_SEARCH_SIZE: usize = 10;

/// Check if a query is an OpenAlex author ID (e.g., "A5023888391").
pub fn is_openalex_id(query: &str) -> bool {
    let query = query.trim();
    let mut chars = query.chars();
    matches!(chars.next(), Some('A')) && {
        let rest = &query[1..];
        !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit())
    }
}

/// Check if a query is an ORCID (e.g., "0000-0002-1825-0097").
pub fn is_orcid(query: &str) -> bool {
    static ORCID: OnceLock<Regex> = OnceLock::new();
    let re = ORCID
        .get_or_init(|| Regex::new(r"^\d{4}-\d{4}-\d{4}-\d{3}[\dX]$").expect("static pattern"));
    re.is_match(query.trim())
}

/// Composite relevance score for a name-search candidate.
///
/// An affiliation-hint match dominates, ORCID presence nudges, and the work
/// count breaks ties between otherwise equal profiles.
fn score(identity: &Identity, affiliation_hint: Option<&str>) -> f64 {
    let mut score = ((identity.works_count.max(0) as f64) + 1.0).log10();

    if identity.orcid.is_some() {
        score += 10.0;
    }

    if let Some(hint) = affiliation_hint {
        let hint = hint.to_lowercase();
        if !hint.is_empty()
            && identity
                .affiliations
                .iter()
                .any(|a| a.to_lowercase().contains(&hint))
        {
            score += 50.0;
        }
    }

    score
}

/// Rank candidates by score, descending.
pub fn rank(mut candidates: Vec<Identity>, affiliation_hint: Option<&str>) -> Vec<(Identity, f64)> {
    let mut scored: Vec<(Identity, f64)> = candidates
        .drain(..)
        .map(|c| {
            let s = score(&c, affiliation_hint);
            (c, s)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

/// Outcome of the resolve-or-disambiguate decision.
#[derive(Debug)]
enum Decision {
    Resolved(Identity),
    NeedsSelection(Vec<Identity>),
}

/// Decide whether the top-ranked candidate wins outright.
///
/// A single candidate always resolves. Otherwise the top score must clear
/// the confidence threshold and lead the runner-up by the configured margin;
/// anything closer goes back to the caller as a candidate set.
fn decide(ranked: Vec<(Identity, f64)>, config: &DiggerConfig) -> Decision {
    if ranked.is_empty() {
        return Decision::NeedsSelection(Vec::new());
    }
    if ranked.len() == 1 {
        let (only, _) = ranked
            .into_iter()
            .next()
            .expect("length checked above");
        return Decision::Resolved(only);
    }

    let top_score = ranked[0].1;
    let runner_up = ranked.get(1).map(|(_, s)| *s).unwrap_or(f64::MIN);

    if top_score >= config.confidence_threshold
        && top_score - runner_up >= config.confidence_margin
    {
        let (top, _) = ranked
            .into_iter()
            .next()
            .expect("non-empty checked by caller");
        return Decision::Resolved(top);
    }

    Decision::NeedsSelection(
        ranked
            .into_iter()
            .take(config.candidate_cap)
            .map(|(c, _)| c)
            .collect(),
    )
}

/// Resolve a query to a single identity.
///
/// Direct IDs and ORCIDs skip the name search entirely. Name queries run the
/// fuzzy search and either resolve with confidence or surface an
/// `Ambiguous` error carrying the candidate set.
pub async fn resolve(
    client: &OpenAlexClient,
    config: &DiggerConfig,
    query: &str,
    affiliation_hint: Option<&str>,
) -> Result<Identity> {
    let query = query.trim();
    if query.is_empty() {
        return Err(DiggerError::Validation("empty author query".to_string()));
    }

    if is_openalex_id(query) {
        debug!(query = query, "Resolving by OpenAlex ID");
        return client.author_by_id(query).await;
    }

    if is_orcid(query) {
        debug!(query = query, "Resolving by ORCID");
        let matches = client.authors_by_orcid(query).await?;
        return match matches.len() {
            0 => Err(DiggerError::NotFound(query.to_string())),
            1 => Ok(matches
                .into_iter()
                .next()
                .expect("length checked above")),
            // One ORCID should map to one profile; treat upstream
            // disagreement as an ambiguity the caller must settle.
            _ => Err(DiggerError::Ambiguous(CandidateSet {
                query: query.to_string(),
                candidates: matches.into_iter().take(config.candidate_cap).collect(),
            })),
        };
    }

    let found = client.search_authors(query, NAME_SEARCH_SIZE).await?;
    if found.is_empty() {
        return Err(DiggerError::NotFound(query.to_string()));
    }

    let ranked = rank(found, affiliation_hint);
    match decide(ranked, config) {
        Decision::Resolved(identity) => {
            info!(
                id = %identity.id,
                name = %identity.display_name,
                "Resolved author by name"
            );
            Ok(identity)
        }
        Decision::NeedsSelection(candidates) => Err(DiggerError::Ambiguous(CandidateSet {
            query: query.to_string(),
            candidates,
        })),
    }
}

/// List ranked candidates for a name, for disambiguation UIs.
pub async fn candidates(
    client: &OpenAlexClient,
    config: &DiggerConfig,
    name: &str,
    affiliation_hint: Option<&str>,
) -> Result<CandidateSet> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DiggerError::Validation("empty author name".to_string()));
    }

    let found = client.search_authors(name, NAME_SEARCH_SIZE).await?;
    let candidates = rank(found, affiliation_hint)
        .into_iter()
        .take(config.candidate_cap)
        .map(|(c, _)| c)
        .collect();

    Ok(CandidateSet {
        query: name.to_string(),
        candidates,
    })
}

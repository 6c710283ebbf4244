//! Corpus data model and aggregation.
//!
//! Defines the fixed-shape records that flow through the pipeline
//! (`Identity`, `Record`, `Provenance`) and builds the final [`Corpus`]:
//! provenance statistics, funding summary, and the multi-identity merge
//! used after disambiguation multi-select.

use crate::inverted::InvertedIndex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A disambiguated author identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Short OpenAlex author ID (e.g., "A5023888391")
    pub id: String,
    pub display_name: String,
    pub orcid: Option<String>,
    /// Institution display names, most recent first
    pub affiliations: Vec<String>,
    pub works_count: i64,
    pub cited_by_count: i64,
}

/// Ordered candidate identities returned when a query is ambiguous.
///
/// Transient: exists only until the caller selects one or more candidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSet {
    /// The query that produced these candidates
    pub query: String,
    /// Candidates in descending score order
    pub candidates: Vec<Identity>,
}

/// Which source supplied a record's abstract text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Primary,
    Secondary,
    #[default]
    None,
}

/// A grant attached to a work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    /// Funder entity ID, when known
    pub funder: Option<String>,
    pub funder_display_name: Option<String>,
    pub award_id: Option<String>,
}

/// One work belonging to an identity.
///
/// Created by the collector from raw upstream payloads; the abstract fields
/// are written exactly once by the resolution chain and the record is
/// immutable afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Short OpenAlex work ID (e.g., "W2741809807")
    pub id: String,
    /// DOI without the resolver URL prefix
    pub doi: Option<String>,
    /// PubMed ID, digits only
    pub pmid: Option<String>,
    pub title: Option<String>,
    pub publication_year: Option<i32>,
    pub work_type: Option<String>,
    pub cited_by_count: i64,
    pub authors: Vec<String>,
    #[serde(default)]
    pub grants: Vec<Grant>,
    pub abstract_text: Option<String>,
    pub provenance: Provenance,
    /// Raw compressed abstract; consumed once by the chain, never exported
    #[serde(skip)]
    pub inverted_index: Option<InvertedIndex>,
}

impl Record {
    /// Write the abstract fields, consuming the inverted index.
    ///
    /// Enforces the invariant that a record with no abstract text always
    /// carries `Provenance::None`, and vice versa.
    pub fn finalize_abstract(&mut self, text: Option<String>, provenance: Provenance) {
        match &text {
            Some(_) => debug_assert!(provenance != Provenance::None),
            None => debug_assert!(provenance == Provenance::None),
        }
        self.provenance = if text.is_some() {
            provenance
        } else {
            Provenance::None
        };
        self.abstract_text = text;
        self.inverted_index = None;
    }
}

/// Counts of records per abstract provenance tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceStats {
    pub primary: usize,
    pub secondary: usize,
    pub none: usize,
}

impl ProvenanceStats {
    /// Count provenance tags across a record set.
    pub fn tally(records: &[Record]) -> Self {
        let mut stats = Self::default();
        for record in records {
            match record.provenance {
                Provenance::Primary => stats.primary += 1,
                Provenance::Secondary => stats.secondary += 1,
                Provenance::None => stats.none += 1,
            }
        }
        stats
    }

    pub fn total(&self) -> usize {
        self.primary + self.secondary + self.none
    }
}

/// One funder's aggregate across a record set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunderSummary {
    pub name: String,
    pub funder_id: Option<String>,
    /// Grant mentions across all records (a work may mention a funder twice)
    pub mention_count: usize,
    /// Unique award IDs, first ten
    pub awards: Vec<String>,
    /// Distinct works mentioning this funder
    pub works_count: usize,
}

/// Funding aggregated over a corpus, sorted by mention count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundingSummary {
    pub funders: Vec<FunderSummary>,
    pub total_mentions: usize,
    pub works_with_funding: usize,
}

/// The assembled output: an identity's records plus derived statistics.
#[derive(Debug, Clone, Serialize)]
pub struct Corpus {
    /// Display identity; composite when several identities were merged
    pub identity: Identity,
    /// The source identities this corpus was built from
    pub identities: Vec<Identity>,
    /// Records in retrieval order (deduplicated on merge, first seen wins)
    pub records: Vec<Record>,
    pub stats: ProvenanceStats,
    pub funding: FundingSummary,
    /// True when a collection failed mid-pagination and the caller accepted
    /// the records gathered so far
    pub partial: bool,
}

impl Corpus {
    /// Build a corpus for a single identity. Records are kept as-is.
    pub fn from_single(identity: Identity, records: Vec<Record>) -> Self {
        Self::merge(vec![(identity, records)])
    }

    /// Union several identities' record sets into one corpus.
    ///
    /// Records are deduplicated by work ID, first occurrence wins. Identity
    /// counters are summed from the `Identity` objects rather than recounted
    /// from records, since source counts may cover works outside the fetched
    /// window. Stats and funding are re-derived from the deduplicated set.
    pub fn merge(parts: Vec<(Identity, Vec<Record>)>) -> Self {
        let identities: Vec<Identity> = parts.iter().map(|(i, _)| i.clone()).collect();

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for (_, part_records) in parts {
            for record in part_records {
                if seen.insert(record.id.clone()) {
                    records.push(record);
                }
            }
        }

        let stats = ProvenanceStats::tally(&records);
        let funding = summarize_funding(&records);

        Self {
            identity: composite_identity(&identities),
            identities,
            records,
            stats,
            funding,
            partial: false,
        }
    }
}

/// Collapse one or more identities into a single display identity.
fn composite_identity(identities: &[Identity]) -> Identity {
    if identities.len() == 1 {
        return identities[0].clone();
    }

    let mut names = Vec::new();
    let mut affiliations = Vec::new();
    let mut works_count = 0;
    let mut cited_by_count = 0;
    let mut orcid = None;

    for identity in identities {
        if !names.contains(&identity.display_name) {
            names.push(identity.display_name.clone());
        }
        for affiliation in &identity.affiliations {
            if !affiliations.contains(affiliation) {
                affiliations.push(affiliation.clone());
            }
        }
        works_count += identity.works_count;
        cited_by_count += identity.cited_by_count;
        if orcid.is_none() {
            orcid = identity.orcid.clone();
        }
    }

    Identity {
        id: identities
            .iter()
            .map(|i| i.id.as_str())
            .collect::<Vec<_>>()
            .join("+"),
        display_name: names.join(" / "),
        orcid,
        affiliations,
        works_count,
        cited_by_count,
    }
}

/// Aggregate grants across a record set into a funding summary.
fn summarize_funding(records: &[Record]) -> FundingSummary {
    struct Entry {
        funder_id: Option<String>,
        mentions: usize,
        awards: Vec<String>,
        works: HashSet<String>,
    }

    let mut by_funder: HashMap<String, Entry> = HashMap::new();
    let mut total_mentions = 0;

    for record in records {
        for grant in &record.grants {
            total_mentions += 1;
            let name = grant
                .funder_display_name
                .clone()
                .or_else(|| grant.funder.clone())
                .unwrap_or_else(|| "Unknown Funder".to_string());

            let entry = by_funder.entry(name).or_insert_with(|| Entry {
                funder_id: grant.funder.clone(),
                mentions: 0,
                awards: Vec::new(),
                works: HashSet::new(),
            });
            entry.mentions += 1;
            if let Some(award) = &grant.award_id {
                if !entry.awards.contains(award) {
                    entry.awards.push(award.clone());
                }
            }
            entry.works.insert(record.id.clone());
        }
    }

    let works_with_funding = by_funder
        .values()
        .flat_map(|e| e.works.iter())
        .collect::<HashSet<_>>()
        .len();

    let mut funders: Vec<FunderSummary> = by_funder
        .into_iter()
        .map(|(name, entry)| FunderSummary {
            name,
            funder_id: entry.funder_id,
            mention_count: entry.mentions,
            awards: entry.awards.into_iter().take(10).collect(),
            works_count: entry.works.len(),
        })
        .collect();
    funders.sort_by(|a, b| b.mention_count.cmp(&a.mention_count).then(a.name.cmp(&b.name)));

    FundingSummary {
        funders,
        total_mentions,
        works_with_funding,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str, name: &str) -> Identity {
        Identity {
            id: id.to_string(),
            display_name: name.to_string(),
            orcid: None,
            affiliations: vec!["Example University".to_string()],
            works_count: 10,
            cited_by_count: 100,
        }
    }

    fn record(id: &str, provenance: Provenance) -> Record {
        Record {
            id: id.to_string(),
            doi: None,
            pmid: None,
            title: Some(format!("Work {id}")),
            publication_year: Some(2021),
            work_type: Some("article".to_string()),
            cited_by_count: 0,
            authors: vec![],
            grants: vec![],
            abstract_text: match provenance {
                Provenance::None => None,
                _ => Some("text".to_string()),
            },
            provenance,
            inverted_index: None,
        }
    }

    #[test]
    fn test_stats_tally() {
        let records = vec![
            record("W1", Provenance::Primary),
            record("W2", Provenance::Primary),
            record("W3", Provenance::Secondary),
            record("W4", Provenance::None),
        ];
        let stats = ProvenanceStats::tally(&records);
        assert_eq!(stats.primary, 2);
        assert_eq!(stats.secondary, 1);
        assert_eq!(stats.none, 1);
        assert_eq!(stats.total(), 4);
    }

    #[test]
    fn test_self_merge_is_idempotent() {
        let author = identity("A1", "Jane Doe");
        let records = vec![
            record("W1", Provenance::Primary),
            record("W2", Provenance::Secondary),
        ];

        let single = Corpus::from_single(author.clone(), records.clone());
        let doubled = Corpus::merge(vec![
            (author.clone(), records.clone()),
            (author, records),
        ]);

        assert_eq!(single.records.len(), doubled.records.len());
        assert_eq!(single.stats, doubled.stats);
    }

    #[test]
    fn test_merge_dedup_first_seen_wins() {
        let a = identity("A1", "Jane Doe");
        let b = identity("A2", "J. Doe");

        let from_a = record("W1", Provenance::Primary);
        let mut from_b = record("W1", Provenance::Secondary);
        from_b.title = Some("Duplicate seen second".to_string());

        let corpus = Corpus::merge(vec![(a, vec![from_a]), (b, vec![from_b, record("W2", Provenance::None)])]);

        assert_eq!(corpus.records.len(), 2);
        assert_eq!(corpus.records[0].provenance, Provenance::Primary);
        assert_eq!(corpus.stats.primary, 1);
        assert_eq!(corpus.stats.none, 1);
    }

    #[test]
    fn test_composite_identity_sums_counts() {
        let a = identity("A1", "Jane Doe");
        let mut b = identity("A2", "J. Doe");
        b.affiliations = vec!["Example University".to_string(), "Other Institute".to_string()];

        let corpus = Corpus::merge(vec![(a, vec![]), (b, vec![])]);
        assert_eq!(corpus.identity.id, "A1+A2");
        assert_eq!(corpus.identity.display_name, "Jane Doe / J. Doe");
        assert_eq!(corpus.identity.works_count, 20);
        assert_eq!(corpus.identity.cited_by_count, 200);
        // affiliations deduplicated across identities
        assert_eq!(
            corpus.identity.affiliations,
            vec!["Example University".to_string(), "Other Institute".to_string()]
        );
        assert_eq!(corpus.identities.len(), 2);
    }

    #[test]
    fn test_funding_summary() {
        let mut w1 = record("W1", Provenance::Primary);
        w1.grants = vec![
            Grant {
                funder: Some("F1".to_string()),
                funder_display_name: Some("NIH".to_string()),
                award_id: Some("R01-123".to_string()),
            },
            Grant {
                funder: Some("F2".to_string()),
                funder_display_name: Some("NSF".to_string()),
                award_id: None,
            },
        ];
        let mut w2 = record("W2", Provenance::None);
        w2.grants = vec![Grant {
            funder: Some("F1".to_string()),
            funder_display_name: Some("NIH".to_string()),
            award_id: Some("R01-456".to_string()),
        }];

        let funding = summarize_funding(&[w1, w2, record("W3", Provenance::None)]);
        assert_eq!(funding.total_mentions, 3);
        assert_eq!(funding.works_with_funding, 2);
        assert_eq!(funding.funders[0].name, "NIH");
        assert_eq!(funding.funders[0].mention_count, 2);
        assert_eq!(funding.funders[0].awards.len(), 2);
        assert_eq!(funding.funders[0].works_count, 2);
        assert_eq!(funding.funders[1].name, "NSF");
    }

    #[test]
    fn test_finalize_abstract_invariant() {
        let mut rec = record("W1", Provenance::None);
        rec.inverted_index = Some(crate::inverted::InvertedIndex::new());

        rec.finalize_abstract(Some("found".to_string()), Provenance::Secondary);
        assert_eq!(rec.provenance, Provenance::Secondary);
        assert!(rec.inverted_index.is_none());

        let mut missing = record("W2", Provenance::None);
        missing.finalize_abstract(None, Provenance::None);
        assert_eq!(missing.provenance, Provenance::None);
        assert!(missing.abstract_text.is_none());
    }
}

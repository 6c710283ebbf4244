//! Pipeline orchestration.
//!
//! Wires resolver, collector, chain, and aggregator into the one operation
//! this crate performs: resolve a query to one or more identities, collect
//! their complete work sets, fill missing abstracts through the fallback
//! chain, and hand back a corpus — streaming progress to the session the
//! whole way. Construction takes an explicit [`DiggerConfig`]; the per-
//! upstream rate limiters are created here once and shared by reference
//! with every client the service builds.

use crate::chain::{self, DEFAULT_CHAIN};
use crate::collector;
use crate::config::DiggerConfig;
use crate::corpus::{CandidateSet, Corpus, Identity, Record};
use crate::error::{DiggerError, Result};
use crate::openalex::{OpenAlexClient, WorkFilters};
use crate::progress::{Phase, ProgressEmitter};
use crate::pubmed::PubMedClient;
use crate::ratelimit::RateLimiter;
use crate::resolver;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// The author-corpus pipeline.
///
/// One instance serves many requests; cancellation is request-scoped —
/// dropping a caller's future abandons its in-flight upstream requests
/// without disturbing other sessions.
pub struct WorksService {
    config: DiggerConfig,
    openalex: OpenAlexClient,
    pubmed: Option<PubMedClient>,
    emitter: Arc<ProgressEmitter>,
}

impl WorksService {
    pub fn new(config: DiggerConfig) -> Result<Self> {
        let openalex_limiter = Arc::new(RateLimiter::new(config.openalex_min_interval));
        let pubmed_limiter = Arc::new(RateLimiter::new(config.pubmed_min_interval));

        let openalex = OpenAlexClient::new(&config, openalex_limiter)?;
        let pubmed = if config.pubmed_fallback {
            Some(PubMedClient::new(&config, pubmed_limiter)?)
        } else {
            None
        };

        Ok(Self {
            config,
            openalex,
            pubmed,
            emitter: Arc::new(ProgressEmitter::new()),
        })
    }

    pub fn config(&self) -> &DiggerConfig {
        &self.config
    }

    /// The progress emitter, for attaching event-stream subscribers.
    pub fn emitter(&self) -> Arc<ProgressEmitter> {
        Arc::clone(&self.emitter)
    }

    /// Resolve a query to a single identity (see [`resolver::resolve`]).
    pub async fn resolve(&self, query: &str, affiliation_hint: Option<&str>) -> Result<Identity> {
        resolver::resolve(&self.openalex, &self.config, query, affiliation_hint).await
    }

    /// Ranked candidate listing for disambiguation UIs.
    pub async fn candidates(
        &self,
        name: &str,
        affiliation_hint: Option<&str>,
    ) -> Result<CandidateSet> {
        resolver::candidates(&self.openalex, &self.config, name, affiliation_hint).await
    }

    /// Resolve a post-disambiguation multi-select: each entry must be a
    /// canonical author ID taken from a candidate set.
    pub async fn resolve_selected(&self, ids: &[String]) -> Result<Vec<Identity>> {
        if ids.is_empty() {
            return Err(DiggerError::Validation("no identities selected".to_string()));
        }
        let mut identities = Vec::with_capacity(ids.len());
        for id in ids {
            identities.push(self.openalex.author_by_id(id.trim()).await?);
        }
        Ok(identities)
    }

    /// Full pipeline for a raw query: resolve, then build the corpus.
    ///
    /// An ambiguous resolution is not a failure — the session is closed
    /// with a `complete` event and the candidate set is returned for the
    /// caller to select from.
    pub async fn run(
        &self,
        session_id: Option<&str>,
        query: &str,
        affiliation_hint: Option<&str>,
        filters: &WorkFilters,
    ) -> Result<Corpus> {
        self.emit(session_id, Phase::Resolving, Some(0.0), "Looking up author...", None);

        let identity = match self.resolve(query, affiliation_hint).await {
            Ok(identity) => identity,
            Err(DiggerError::Ambiguous(set)) => {
                self.emit(
                    session_id,
                    Phase::Complete,
                    Some(100.0),
                    format!("Found {} matching authors, selection required", set.candidates.len()),
                    None,
                );
                return Err(DiggerError::Ambiguous(set));
            }
            Err(e) => {
                self.emit(session_id, Phase::Error, Some(100.0), e.to_string(), None);
                return Err(e);
            }
        };

        self.emit(
            session_id,
            Phase::Resolving,
            Some(100.0),
            format!("Resolved {} ({})", identity.display_name, identity.id),
            None,
        );

        self.build_corpus(session_id, vec![identity], filters).await
    }

    /// Collect, enrich, and aggregate for one or more resolved identities.
    ///
    /// A collection that fails mid-pagination degrades to the records
    /// gathered so far (`Corpus::partial`) instead of failing the request;
    /// a collection that produced nothing at all propagates its cause.
    pub async fn build_corpus(
        &self,
        session_id: Option<&str>,
        identities: Vec<Identity>,
        filters: &WorkFilters,
    ) -> Result<Corpus> {
        if identities.is_empty() {
            return Err(DiggerError::Validation("no identities to collect".to_string()));
        }

        let mut parts: Vec<(Identity, Vec<Record>)> = Vec::with_capacity(identities.len());
        let mut partial = false;

        for identity in identities {
            info!(author = %identity.id, name = %identity.display_name, "Collecting works");
            self.emit(
                session_id,
                Phase::Fetching,
                None,
                format!("Fetching works for {}...", identity.display_name),
                None,
            );

            let records = match collector::collect_all(
                &self.openalex,
                &identity,
                filters,
                self.config.per_page,
                self.config.max_records,
                &self.emitter,
                session_id,
            )
            .await
            {
                Ok(records) => records,
                Err(DiggerError::PartialCollection { records, cursor, source }) => {
                    if records.is_empty() {
                        self.emit(session_id, Phase::Error, Some(100.0), source.to_string(), None);
                        return Err(*source);
                    }
                    warn!(
                        author = %identity.id,
                        collected = records.len(),
                        cursor = ?cursor,
                        error = %source,
                        "Accepting partial collection"
                    );
                    partial = true;
                    records
                }
                Err(e) => {
                    self.emit(session_id, Phase::Error, Some(100.0), e.to_string(), None);
                    return Err(e);
                }
            };

            parts.push((identity, records));
        }

        let total: usize = parts.iter().map(|(_, r)| r.len()).sum();
        self.emit(
            session_id,
            Phase::Processing,
            Some(0.0),
            format!("Total works fetched: {}", total),
            Some(total),
        );

        let done = AtomicUsize::new(0);
        let mut enriched_parts = Vec::with_capacity(parts.len());
        for (identity, records) in parts {
            let records = self.enrich_all(records, session_id, &done, total).await;
            enriched_parts.push((identity, records));
        }

        let mut corpus = Corpus::merge(enriched_parts);
        corpus.partial = partial;

        let stats_msg = format!(
            "Abstract stats: primary={}, secondary={}, missing={}{}",
            corpus.stats.primary,
            corpus.stats.secondary,
            corpus.stats.none,
            if partial { " (collection incomplete)" } else { "" }
        );
        info!(
            records = corpus.records.len(),
            primary = corpus.stats.primary,
            secondary = corpus.stats.secondary,
            missing = corpus.stats.none,
            partial = partial,
            "Corpus assembled"
        );
        self.emit(session_id, Phase::Complete, Some(100.0), stats_msg, Some(total));

        Ok(corpus)
    }

    /// Run the abstract chain over a record set with bounded concurrency.
    ///
    /// Workers complete in arbitrary order; results are reassembled by the
    /// records' original indices so corpus order stays retrieval order.
    async fn enrich_all(
        &self,
        records: Vec<Record>,
        session_id: Option<&str>,
        done: &AtomicUsize,
        total: usize,
    ) -> Vec<Record> {
        let pubmed = self.pubmed.as_ref();

        let mut indexed: Vec<(usize, Record)> = stream::iter(records.into_iter().enumerate())
            .map(|(idx, record)| async move {
                let title_short = record
                    .title
                    .as_deref()
                    .unwrap_or("Untitled")
                    .chars()
                    .take(50)
                    .collect::<String>();

                let record = chain::enrich(record, DEFAULT_CHAIN, pubmed).await;

                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                if total > 0 {
                    self.emit(
                        session_id,
                        Phase::Processing,
                        Some((n as f32 / total as f32) * 100.0),
                        format!("Processed work {}/{}: {}", n, total, title_short),
                        Some(total),
                    );
                }
                (idx, record)
            })
            .buffer_unordered(self.config.enrich_concurrency.max(1))
            .collect()
            .await;

        indexed.sort_by_key(|(idx, _)| *idx);
        indexed.into_iter().map(|(_, record)| record).collect()
    }

    fn emit(
        &self,
        session_id: Option<&str>,
        phase: Phase,
        percent: Option<f32>,
        message: impl Into<String>,
        total: Option<usize>,
    ) {
        if let Some(session) = session_id {
            self.emitter.emit(session, phase, percent, message, total);
        }
    }
}

//! Complete-set works collection via cursor pagination.
//!
//! Walks an author's works from `cursor=*` to exhaustion, so the caller
//! always gets the full ordered set — never a silently truncated first
//! page. Each page fetch already carries the client's bounded retry policy;
//! when a page still fails, everything collected so far is surfaced inside
//! [`DiggerError::PartialCollection`] and the caller decides whether the
//! partial set is acceptable.

use crate::corpus::{Identity, Record};
use crate::error::{DiggerError, Result};
use crate::openalex::{OpenAlexClient, WorkFilters, CURSOR_START};
use crate::progress::{Phase, ProgressEmitter};
use tracing::{info, warn};

/// Collect every work for one identity, in retrieval order.
///
/// Emits a `Fetching`-phase progress event after each page; percentage is
/// derived from the server-reported total when present, indeterminate
/// otherwise. An optional `max_records` ceiling stops the walk early.
#[allow(clippy::too_many_arguments)]
pub async fn collect_all(
    client: &OpenAlexClient,
    identity: &Identity,
    filters: &WorkFilters,
    per_page: usize,
    max_records: Option<usize>,
    emitter: &ProgressEmitter,
    session_id: Option<&str>,
) -> Result<Vec<Record>> {
    let mut records: Vec<Record> = Vec::new();
    let mut cursor = CURSOR_START.to_string();
    let mut total: Option<u64> = None;
    let mut page_no = 0u32;

    loop {
        page_no += 1;

        let page = match client
            .works_page(&identity.id, filters, &cursor, per_page)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(
                    author = %identity.id,
                    page = page_no,
                    collected = records.len(),
                    error = %e,
                    "Works page failed after retries"
                );
                return Err(DiggerError::PartialCollection {
                    records,
                    cursor: Some(cursor),
                    source: Box::new(e),
                });
            }
        };

        if total.is_none() {
            total = page.total;
        }

        let fetched = page.records.len();
        records.extend(page.records);
        info!(
            author = %identity.id,
            page = page_no,
            fetched = fetched,
            collected = records.len(),
            "Collected works page"
        );

        let capped = match max_records {
            Some(cap) if records.len() >= cap => {
                records.truncate(cap);
                true
            }
            _ => false,
        };

        if let Some(session) = session_id {
            let percent = total.filter(|t| *t > 0).map(|t| {
                ((records.len() as f32 / t as f32) * 100.0).min(100.0)
            });
            let described_total = total.map(|t| t as usize);
            emitter.emit(
                session,
                Phase::Fetching,
                percent,
                match described_total {
                    Some(t) => format!("Fetched {} of {} works", records.len(), t),
                    None => format!("Fetched {} works", records.len()),
                },
                described_total,
            );
        }

        if capped {
            info!(author = %identity.id, cap = records.len(), "Record ceiling reached");
            break;
        }

        match page.next_cursor {
            Some(next) if fetched > 0 => cursor = next,
            _ => break,
        }
    }

    info!(author = %identity.id, total = records.len(), "Collection complete");
    Ok(records)
}

//! abstractdigger - Author Abstract Corpus Pipeline
//!
//! Resolves an author (OpenAlex ID, ORCID, or name), collects their complete
//! work set, fills missing abstracts via PubMed fallback, and writes the
//! corpus as JSONL or CSV.
//!
//! ## Usage
//!
//! ### CLI Mode
//! ```bash
//! abstractdigger fetch "A5023888391" --email you@example.com
//! abstractdigger fetch "J. Smith" --email you@example.com --affiliation "Example University"
//! ```
//!
//! ### HTTP Server Mode
//! ```bash
//! abstractdigger serve --port 3000 --email you@example.com
//! ```

use abstractdigger::config::DiggerConfig;
use abstractdigger::corpus::CandidateSet;
use abstractdigger::openalex::WorkFilters;
use abstractdigger::service::WorksService;
use abstractdigger::{export, DiggerError};
use anyhow::{Context, Result};
use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Local;
use clap::{Parser, Subcommand};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Author Abstract Corpus Pipeline - Rust Microservice
#[derive(Parser)]
#[command(name = "abstractdigger")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an author and assemble their abstract corpus
    Fetch {
        /// Author query: OpenAlex ID (A…), ORCID, or free-text name
        query: String,

        /// Contact email for polite-pool API access
        #[arg(long)]
        email: String,

        /// Affiliation hint to help disambiguate name searches
        #[arg(long)]
        affiliation: Option<String>,

        /// Minimum publication year
        #[arg(long)]
        year_from: Option<i32>,

        /// Maximum publication year
        #[arg(long)]
        year_to: Option<i32>,

        /// Work types to keep (repeatable, e.g., --work-type article)
        #[arg(long = "work-type")]
        work_types: Vec<String>,

        /// Don't fall back to PubMed for missing abstracts
        #[arg(long)]
        skip_pubmed: bool,

        /// Candidate indices to merge after an ambiguous query (e.g., "0,2")
        #[arg(long)]
        pick: Option<String>,

        /// Ceiling on records collected per identity
        #[arg(long)]
        max_records: Option<usize>,

        /// Output file; .csv gets CSV, anything else JSONL
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List candidate identities for a name (disambiguation preview)
    Candidates {
        /// Author name to search
        name: String,

        /// Contact email for polite-pool API access
        #[arg(long)]
        email: String,

        /// Affiliation hint used for ranking
        #[arg(long)]
        affiliation: Option<String>,
    },

    /// Run as HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Contact email for polite-pool API access
        #[arg(long)]
        email: String,

        /// Don't fall back to PubMed for missing abstracts
        #[arg(long)]
        skip_pubmed: bool,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    match cli.command {
        Commands::Fetch {
            query,
            email,
            affiliation,
            year_from,
            year_to,
            work_types,
            skip_pubmed,
            pick,
            max_records,
            output,
        } => {
            run_fetch(
                query,
                email,
                affiliation,
                year_from,
                year_to,
                work_types,
                skip_pubmed,
                pick,
                max_records,
                output,
            )
            .await
        }
        Commands::Candidates {
            name,
            email,
            affiliation,
        } => run_candidates(name, email, affiliation).await,
        Commands::Serve {
            port,
            host,
            email,
            skip_pubmed,
        } => run_server(host, port, email, skip_pubmed).await,
    }
}

// ============================================================================
// Fetch Pipeline
// ============================================================================

#[allow(clippy::too_many_arguments)]
async fn run_fetch(
    query: String,
    email: String,
    affiliation: Option<String>,
    year_from: Option<i32>,
    year_to: Option<i32>,
    work_types: Vec<String>,
    skip_pubmed: bool,
    pick: Option<String>,
    max_records: Option<usize>,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = DiggerConfig {
        pubmed_fallback: !skip_pubmed,
        max_records,
        ..DiggerConfig::new(email)
    };
    let service = WorksService::new(config).context("Failed to build pipeline")?;

    let filters = WorkFilters {
        year_from,
        year_to,
        work_types,
    };

    let corpus = if let Some(pick) = pick {
        // Post-disambiguation multi-select: re-run the candidate search and
        // merge the picked identities into one corpus.
        let indices = parse_pick(&pick).context("Invalid --pick format")?;
        let set = service
            .candidates(&query, affiliation.as_deref())
            .await
            .context("Candidate search failed")?;

        let mut ids = Vec::new();
        for idx in indices {
            let candidate = set
                .candidates
                .get(idx)
                .with_context(|| format!("--pick index {} out of range (0..{})", idx, set.candidates.len()))?;
            ids.push(candidate.id.clone());
        }

        let identities = service.resolve_selected(&ids).await?;
        println!(
            "Merging {} identities: {}",
            identities.len(),
            identities
                .iter()
                .map(|i| i.display_name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        service.build_corpus(None, identities, &filters).await?
    } else {
        match service.run(None, &query, affiliation.as_deref(), &filters).await {
            Ok(corpus) => corpus,
            Err(DiggerError::Ambiguous(set)) => {
                print_candidates(&set);
                println!("\nRe-run with --pick <indices> to select one or more candidates.");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    };

    // Summary
    println!("\nAuthor:   {} ({})", corpus.identity.display_name, corpus.identity.id);
    println!("Works:    {}{}", corpus.records.len(), if corpus.partial { " (incomplete)" } else { "" });
    println!(
        "Abstracts: {} primary, {} secondary, {} missing",
        corpus.stats.primary, corpus.stats.secondary, corpus.stats.none
    );
    if !corpus.funding.funders.is_empty() {
        println!(
            "Funding:  {} funders, {} grant mentions",
            corpus.funding.funders.len(),
            corpus.funding.total_mentions
        );
        for funder in corpus.funding.funders.iter().take(5) {
            println!(
                "  - {}: {} mentions, {} unique awards",
                funder.name,
                funder.mention_count,
                funder.awards.len()
            );
        }
    }

    // Export
    let path = output.unwrap_or_else(|| default_output_path(&query));
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create output directory")?;
        }
    }
    export::save(&corpus, &path)?;
    println!("\nSaved: {}", path.display());

    Ok(())
}

async fn run_candidates(name: String, email: String, affiliation: Option<String>) -> Result<()> {
    let service =
        WorksService::new(DiggerConfig::new(email)).context("Failed to build pipeline")?;

    let set = service.candidates(&name, affiliation.as_deref()).await?;
    if set.candidates.is_empty() {
        println!("No authors found matching: {}", name);
    } else {
        print_candidates(&set);
    }
    Ok(())
}

fn print_candidates(set: &CandidateSet) {
    println!("Found {} candidates for '{}':", set.candidates.len(), set.query);
    for (idx, candidate) in set.candidates.iter().enumerate() {
        println!(
            "  [{}] {} ({})  works: {}, citations: {}{}",
            idx,
            candidate.display_name,
            candidate.id,
            candidate.works_count,
            candidate.cited_by_count,
            candidate
                .orcid
                .as_deref()
                .map(|o| format!(", orcid: {o}"))
                .unwrap_or_default()
        );
        if !candidate.affiliations.is_empty() {
            println!("      {}", candidate.affiliations.join("; "));
        }
    }
}

/// Parse a pick list like "0,2,3" into indices.
fn parse_pick(pick: &str) -> Result<Vec<usize>> {
    pick.split(',')
        .map(|p| p.trim().parse::<usize>().context("Invalid candidate index"))
        .collect()
}

/// Default output path: ./output/{timestamp}_{query}.jsonl
fn default_output_path(query: &str) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let safe_query: String = query
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-' || *c == '_')
        .collect::<String>()
        .trim()
        .replace(' ', "_");
    PathBuf::from("output").join(format!("{}_{}.jsonl", timestamp, safe_query))
}

// ============================================================================
// HTTP Server
// ============================================================================

struct AppState {
    service: WorksService,
}

async fn run_server(host: String, port: u16, email: String, skip_pubmed: bool) -> Result<()> {
    info!(host = %host, port = port, "Starting HTTP server");

    let config = DiggerConfig {
        pubmed_fallback: !skip_pubmed,
        ..DiggerConfig::new(email)
    };
    let service = WorksService::new(config).context("Failed to build pipeline")?;
    let app_state = Arc::new(AppState { service });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/api/search", post(search_handler))
        .route("/api/candidates", post(candidates_handler))
        .route("/api/progress/{session_id}", get(progress_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Invalid host:port")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Listening on http://{}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Search request body
#[derive(Debug, Deserialize)]
struct SearchRequest {
    /// Author query; ignored when `selections` is present
    #[serde(default)]
    query: String,
    affiliation: Option<String>,
    /// Session ID for the progress event stream
    session_id: Option<String>,
    year_from: Option<i32>,
    year_to: Option<i32>,
    #[serde(default)]
    work_types: Vec<String>,
    /// Canonical author IDs picked from an earlier candidate set
    selections: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct CandidatesResponse {
    status: &'static str,
    candidates: CandidateSet,
}

/// Search endpoint: runs the full pipeline within the request, so a client
/// disconnect cancels collection for that session.
async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Response {
    info!(query = %req.query, session = ?req.session_id, "Search request");

    let filters = WorkFilters {
        year_from: req.year_from,
        year_to: req.year_to,
        work_types: req.work_types,
    };
    let session_id = req.session_id.as_deref();

    let result = match &req.selections {
        Some(selections) => match state.service.resolve_selected(selections).await {
            Ok(identities) => {
                state
                    .service
                    .build_corpus(session_id, identities, &filters)
                    .await
            }
            Err(e) => Err(e),
        },
        None => {
            state
                .service
                .run(session_id, &req.query, req.affiliation.as_deref(), &filters)
                .await
        }
    };

    match result {
        Ok(corpus) => Json(serde_json::json!({
            "status": "ok",
            "corpus": corpus,
        }))
        .into_response(),
        Err(DiggerError::Ambiguous(set)) => Json(CandidatesResponse {
            status: "needs_disambiguation",
            candidates: set,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// Candidates request body
#[derive(Debug, Deserialize)]
struct CandidatesRequest {
    name: String,
    affiliation: Option<String>,
}

/// Candidate listing endpoint for disambiguation UIs
async fn candidates_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CandidatesRequest>,
) -> Response {
    match state
        .service
        .candidates(&req.name, req.affiliation.as_deref())
        .await
    {
        Ok(set) => Json(CandidatesResponse {
            status: "ok",
            candidates: set,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// SSE endpoint for streaming progress updates.
///
/// Replays the buffered snapshot first (so subscribers that race the
/// pipeline start still see where it stands), then forwards live events
/// until a terminal phase arrives.
async fn progress_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(session_id): AxumPath<String>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    info!(session = %session_id, "New SSE progress subscriber");
    let (snapshot, mut rx) = state.service.emitter().subscribe(&session_id);

    let stream = async_stream::stream! {
        let mut terminal_seen = false;

        for event in snapshot {
            let is_terminal = event.phase.is_terminal();
            if let Ok(json) = serde_json::to_string(&event) {
                yield Ok(Event::default().event("progress").data(json));
            }
            terminal_seen = terminal_seen || is_terminal;
        }

        while !terminal_seen {
            match rx.recv().await {
                Ok(event) => {
                    let is_terminal = event.phase.is_terminal();
                    if let Ok(json) = serde_json::to_string(&event) {
                        yield Ok(Event::default().event("progress").data(json));
                    }
                    if is_terminal {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    error!(skipped = skipped, "SSE receiver lagged");
                    continue;
                }
                Err(_) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

/// Map pipeline errors onto HTTP statuses with a JSON body.
fn error_response(e: DiggerError) -> Response {
    let status = match &e {
        DiggerError::NotFound(_) => StatusCode::NOT_FOUND,
        DiggerError::Validation(_) => StatusCode::BAD_REQUEST,
        DiggerError::UpstreamUnavailable { .. } | DiggerError::RateLimited(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error!(status = status.as_u16(), error = %e, "Request failed");
    (
        status,
        Json(serde_json::json!({
            "status": "error",
            "error": e.to_string(),
        })),
    )
        .into_response()
}

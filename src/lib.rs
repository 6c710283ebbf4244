//! # abstractdigger
//!
//! Author Abstract Corpus Pipeline - Rust Microservice
//!
//! Resolves an author query against OpenAlex, collects the author's
//! complete work set via cursor pagination, fills missing abstracts through
//! an ordered PubMed fallback chain, and aggregates everything into a
//! single corpus with provenance statistics — streaming progress events to
//! the caller throughout.
//!
//! ## Modules
//!
//! - [`resolver`] - Author identity resolution and disambiguation
//! - [`collector`] - Cursor-paginated works collection
//! - [`chain`] - Per-record abstract resolution fallback chain
//! - [`inverted`] - Inverted-index abstract decoding
//! - [`progress`] - Session-scoped progress broadcasting
//! - [`corpus`] - Data model, statistics, and multi-identity merge
//! - [`openalex`] / [`pubmed`] - Upstream API clients
//! - [`service`] - Pipeline orchestration
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use abstractdigger::{config::DiggerConfig, openalex::WorkFilters, service::WorksService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let service = WorksService::new(DiggerConfig::new("you@example.com"))?;
//!     let corpus = service
//!         .run(None, "A5023888391", None, &WorkFilters::default())
//!         .await?;
//!     println!("Collected {} works", corpus.records.len());
//!     Ok(())
//! }
//! ```

pub mod chain;
pub mod collector;
pub mod config;
pub mod corpus;
pub mod error;
pub mod export;
pub mod inverted;
pub mod openalex;
pub mod progress;
pub mod pubmed;
pub mod ratelimit;
pub mod resolver;
pub mod service;

pub use error::{DiggerError, Result};

//! IIIF Ingest Library
//!
//! Loads IIIF Presentation API documents (collections, manifests,
//! sequences, ranges, canvases, image annotations) into a relational
//! schema, resolving cross-document references into stable surrogate ids.
//!
//! # Pipeline
//!
//! - **schema**: strict per-type shape validation over decoded JSON
//! - **resolver**: external URI to surrogate id, concurrency-safe via
//!   storage conflict resolution
//! - **rows**: idempotent upsert statements, with label normalization
//! - **traverse**: recursive type-dispatching walk with ordered
//!   association writes and a per-run visited ledger
//! - **stats**: per-type and per-dimension counts for the final report
//!
//! # Example
//!
//! ```no_run
//! use iiif_ingest::db::{create_pool, DbConfig, PgExecutor};
//! use iiif_ingest::rows::LabelRule;
//! use iiif_ingest::traverse::Traversal;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = create_pool(&DbConfig::from_env()?).await?;
//!     let traversal = Traversal::new(Arc::new(PgExecutor::new(pool)), LabelRule::default());
//!     let stats = iiif_ingest::loader::run(&traversal, &["top.json".into()]).await?;
//!     for line in stats.report_lines() {
//!         println!("{}", line);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod loader;
pub mod reader;
pub mod resolver;
pub mod rows;
pub mod schema;
pub mod stats;
pub mod testing;
pub mod traverse;

pub use error::{LoaderError, Result};

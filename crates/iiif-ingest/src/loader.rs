//! Run orchestration
//!
//! Loads every supplied document and traverses them with concurrent
//! fan-out, joining all of them before the stats snapshot is taken. A
//! failure in any document aborts the whole run; rows already persisted
//! stay, and re-running after fixing the input converges because every
//! write is an idempotent upsert.

use crate::error::Result;
use crate::reader;
use crate::stats::StatsSnapshot;
use crate::traverse::Traversal;
use futures::future::try_join_all;
use std::path::PathBuf;
use tracing::info;

/// Ingest the given document files and return the final statistics.
pub async fn run(traversal: &Traversal, files: &[PathBuf]) -> Result<StatsSnapshot> {
    let preloaded = traversal.resolver().preload().await?;
    info!(mappings = preloaded, files = files.len(), "Starting ingestion");

    try_join_all(files.iter().map(|path| async move {
        let document = reader::load_document(path).await?;
        traversal.traverse(&document, None).await?;
        info!(path = %path.display(), "Document ingested");
        Ok::<_, crate::error::LoaderError>(())
    }))
    .await?;

    Ok(traversal.stats().snapshot())
}

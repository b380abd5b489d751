//! External URI to surrogate id resolution
//!
//! Every external id maps to exactly one `iiif_id`, assigned once and reused
//! for the lifetime of the store. Identity assignment is delegated to
//! storage conflict resolution (`ON CONFLICT DO NOTHING RETURNING`) rather
//! than an in-process lock, so concurrent resolvers — including future
//! multi-process runs — cannot assign two ids to one external id.

use crate::db::{SqlValue, Statement, StatementExecutor};
use crate::error::{LoaderError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

const FIND_SQL: &str = "SELECT iiif_id FROM iiif WHERE external_id = $1";
const INSERT_SQL: &str =
    "INSERT INTO iiif (external_id) VALUES ($1) ON CONFLICT (external_id) DO NOTHING RETURNING iiif_id";
const PRELOAD_SQL: &str =
    "SELECT external_id, iiif_id FROM iiif WHERE external_id IS NOT NULL";

/// Maps external URIs to stable internal surrogate ids.
///
/// The cache is monotonic: entries are only ever added, so concurrent reads
/// and writes during fan-out cannot observe a mapping change.
pub struct IdResolver {
    executor: Arc<dyn StatementExecutor>,
    cache: RwLock<HashMap<String, i64>>,
}

impl IdResolver {
    pub fn new(executor: Arc<dyn StatementExecutor>) -> Self {
        Self {
            executor,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Bulk-load every existing mapping into the cache, so re-runs over an
    /// already-populated store skip per-id round trips.
    pub async fn preload(&self) -> Result<usize> {
        let statement = Statement::new(PRELOAD_SQL, vec![]);
        let rows = self
            .executor
            .query(&statement)
            .await
            .map_err(|source| LoaderError::Persistence {
                statement: statement.to_string(),
                source,
            })?;

        let mut cache = self.cache.write().await;
        for row in &rows {
            if let [SqlValue::Text(external_id), SqlValue::Integer(id)] = row.as_slice() {
                cache.insert(external_id.clone(), *id);
            }
        }
        debug!(mappings = cache.len(), "Preloaded identifier cache");
        Ok(cache.len())
    }

    /// Resolve an external URI to its surrogate id.
    ///
    /// Protocol, first success wins: cached mapping; existing row in
    /// storage; fresh insert returning the assigned id; re-query after an
    /// insert conflict (a concurrent resolver won the race).
    pub async fn resolve(&self, external_id: &str) -> Result<i64> {
        let cached = self.cache.read().await.get(external_id).copied();
        if let Some(id) = cached {
            return Ok(id);
        }

        if let Some(id) = self.find(external_id).await? {
            return Ok(self.remember(external_id, id).await);
        }

        let insert = Statement::new(INSERT_SQL, vec![SqlValue::from(external_id)]);
        let rows = self
            .executor
            .query(&insert)
            .await
            .map_err(|source| self.unavailable(external_id, source))?;
        if let Some(id) = first_id(&rows) {
            debug!(external_id, iiif_id = id, "Assigned surrogate id");
            return Ok(self.remember(external_id, id).await);
        }

        // Insert reported a conflict: the winning row is visible now.
        match self.find(external_id).await? {
            Some(id) => Ok(self.remember(external_id, id).await),
            None => Err(self.unavailable(
                external_id,
                crate::db::ExecutorError::backend("mapping absent after insert conflict"),
            )),
        }
    }

    async fn find(&self, external_id: &str) -> Result<Option<i64>> {
        let statement = Statement::new(FIND_SQL, vec![SqlValue::from(external_id)]);
        let rows = self
            .executor
            .query(&statement)
            .await
            .map_err(|source| self.unavailable(external_id, source))?;
        Ok(first_id(&rows))
    }

    async fn remember(&self, external_id: &str, id: i64) -> i64 {
        self.cache.write().await.insert(external_id.to_string(), id);
        id
    }

    fn unavailable(&self, external_id: &str, source: crate::db::ExecutorError) -> LoaderError {
        LoaderError::IdentifierResolution {
            external_id: external_id.to_string(),
            source,
        }
    }
}

fn first_id(rows: &[Vec<SqlValue>]) -> Option<i64> {
    rows.first()
        .and_then(|row| row.first())
        .and_then(SqlValue::as_integer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryExecutor;

    fn resolver() -> (Arc<MemoryExecutor>, IdResolver) {
        let executor = Arc::new(MemoryExecutor::new());
        let resolver = IdResolver::new(executor.clone());
        (executor, resolver)
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let (_executor, resolver) = resolver();
        let first = resolver.resolve("https://example.org/m1").await.unwrap();
        let second = resolver.resolve("https://example.org/m1").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_second_resolve_hits_cache() {
        let (executor, resolver) = resolver();
        resolver.resolve("https://example.org/m1").await.unwrap();
        let statements_before = executor.statements().len();
        resolver.resolve("https://example.org/m1").await.unwrap();
        assert_eq!(executor.statements().len(), statements_before);
    }

    #[tokio::test]
    async fn test_distinct_ids_for_distinct_uris() {
        let (_executor, resolver) = resolver();
        let a = resolver.resolve("https://example.org/a").await.unwrap();
        let b = resolver.resolve("https://example.org/b").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_existing_mapping_found_without_insert() {
        let (executor, resolver) = resolver();
        executor.seed_id("https://example.org/m1", 7);
        let id = resolver.resolve("https://example.org/m1").await.unwrap();
        assert_eq!(id, 7);
        assert!(executor
            .statements()
            .iter()
            .all(|s| !s.sql.starts_with("INSERT")));
    }

    #[tokio::test]
    async fn test_lost_insert_race_requeries() {
        let (executor, resolver) = resolver();
        executor.conflict_on_insert("https://example.org/m1");
        let id = resolver.resolve("https://example.org/m1").await.unwrap();
        assert_eq!(Some(id), executor.id_of("https://example.org/m1"));
        // find, insert (conflict), find again
        let sqls: Vec<_> = executor.statements().iter().map(|s| s.sql.clone()).collect();
        assert_eq!(sqls.iter().filter(|s| s.starts_with("SELECT")).count(), 2);
        assert_eq!(sqls.iter().filter(|s| s.starts_with("INSERT")).count(), 1);
    }

    #[tokio::test]
    async fn test_preload_serves_hits_without_statements() {
        let (executor, resolver) = resolver();
        executor.seed_id("https://example.org/m1", 3);
        let loaded = resolver.preload().await.unwrap();
        assert_eq!(loaded, 1);
        let statements_before = executor.statements().len();
        let id = resolver.resolve("https://example.org/m1").await.unwrap();
        assert_eq!(id, 3);
        assert_eq!(executor.statements().len(), statements_before);
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces_as_resolution_error() {
        let (executor, resolver) = resolver();
        executor.fail_when("SELECT iiif_id");
        let err = resolver.resolve("https://example.org/m1").await.unwrap_err();
        assert!(matches!(err, LoaderError::IdentifierResolution { .. }));
    }
}

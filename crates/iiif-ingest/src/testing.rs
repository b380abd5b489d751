//! In-memory statement executor for tests
//!
//! Implements the loader's storage contract over hash maps so resolution,
//! persistence, and traversal can be exercised without a database. The
//! executor recognizes the closed set of statement shapes the loader
//! issues — identifier lookups, identifier inserts, and table upserts — and
//! rejects anything else. It records every statement in arrival order and
//! supports injected failures, injected insert races, and per-statement
//! delays for concurrency tests.

use crate::db::{ExecutorError, SqlRow, SqlValue, Statement, StatementExecutor};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct MemoryState {
    ids: BTreeMap<String, i64>,
    next_id: i64,
    rows: HashMap<(String, Vec<String>), Vec<(String, SqlValue)>>,
    statements: Vec<Statement>,
    insert_conflicts: HashSet<String>,
    fail_contains: Option<String>,
    delays: Vec<(String, Duration)>,
}

/// Hash-map-backed stand-in for the Postgres executor
#[derive(Debug, Default)]
pub struct MemoryExecutor {
    state: Mutex<MemoryState>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate an external-id mapping, as if a prior run created it
    pub fn seed_id(&self, external_id: &str, id: i64) {
        let mut state = self.lock();
        state.ids.insert(external_id.to_string(), id);
        state.next_id = state.next_id.max(id);
    }

    /// Make every statement whose SQL or text parameters contain `needle`
    /// fail, simulating storage rejecting it
    pub fn fail_when(&self, needle: &str) {
        self.lock().fail_contains = Some(needle.to_string());
    }

    /// Simulate losing the insert race for one external id: the insert
    /// lands (a concurrent resolver's write) but reports a conflict
    pub fn conflict_on_insert(&self, external_id: &str) {
        self.lock().insert_conflicts.insert(external_id.to_string());
    }

    /// Delay any statement whose SQL or text parameters contain `needle`
    pub fn delay_when(&self, needle: &str, delay: Duration) {
        self.lock().delays.push((needle.to_string(), delay));
    }

    /// Every statement issued so far, in arrival order
    pub fn statements(&self) -> Vec<Statement> {
        self.lock().statements.clone()
    }

    /// The surrogate id assigned to an external id, if any
    pub fn id_of(&self, external_id: &str) -> Option<i64> {
        self.lock().ids.get(external_id).copied()
    }

    /// All rows upserted into a table, as (primary key, value columns)
    /// pairs sorted by primary key
    pub fn table_rows(&self, table: &str) -> Vec<(Vec<String>, Vec<(String, SqlValue)>)> {
        let state = self.lock();
        let mut rows: Vec<_> = state
            .rows
            .iter()
            .filter(|((t, _), _)| t == table)
            .map(|((_, pk), values)| (pk.clone(), values.clone()))
            .collect();
        rows.sort();
        rows
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn admit(&self, statement: &Statement) -> Result<(), ExecutorError> {
        let (fail, delay) = {
            let mut state = self.lock();
            state.statements.push(statement.clone());
            let fail = state
                .fail_contains
                .as_ref()
                .map(|needle| matches(statement, needle))
                .unwrap_or(false);
            let delay = state
                .delays
                .iter()
                .find(|(needle, _)| matches(statement, needle))
                .map(|(_, delay)| *delay);
            (fail, delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(ExecutorError::backend("injected failure"));
        }
        Ok(())
    }
}

fn matches(statement: &Statement, needle: &str) -> bool {
    statement.sql.contains(needle)
        || statement
            .params
            .iter()
            .any(|param| param.as_text().is_some_and(|text| text.contains(needle)))
}

fn text_param(statement: &Statement, index: usize) -> Result<String, ExecutorError> {
    statement
        .params
        .get(index)
        .and_then(SqlValue::as_text)
        .map(str::to_string)
        .ok_or_else(|| ExecutorError::backend(format!("expected text parameter ${}", index + 1)))
}

/// Extract the text between `open` (exclusive) and the next `close`
fn between<'a>(sql: &'a str, open: &str, close: char) -> Option<&'a str> {
    let start = sql.find(open)? + open.len();
    let end = sql[start..].find(close)? + start;
    Some(&sql[start..end])
}

#[async_trait]
impl StatementExecutor for MemoryExecutor {
    async fn query(&self, statement: &Statement) -> Result<Vec<SqlRow>, ExecutorError> {
        self.admit(statement).await?;
        let sql = statement.sql.as_str();

        if sql.starts_with("SELECT external_id, iiif_id") {
            let state = self.lock();
            return Ok(state
                .ids
                .iter()
                .map(|(external_id, id)| {
                    vec![SqlValue::Text(external_id.clone()), SqlValue::Integer(*id)]
                })
                .collect());
        }

        if sql.starts_with("SELECT iiif_id FROM iiif WHERE external_id") {
            let external_id = text_param(statement, 0)?;
            let state = self.lock();
            return Ok(state
                .ids
                .get(&external_id)
                .map(|id| vec![vec![SqlValue::Integer(*id)]])
                .unwrap_or_default());
        }

        if sql.starts_with("INSERT INTO iiif (external_id)") {
            let external_id = text_param(statement, 0)?;
            let mut state = self.lock();
            if state.ids.contains_key(&external_id) {
                // ON CONFLICT DO NOTHING: no row returned
                return Ok(vec![]);
            }
            state.next_id += 1;
            let id = state.next_id;
            state.ids.insert(external_id.clone(), id);
            if state.insert_conflicts.remove(&external_id) {
                // A concurrent resolver won; the caller sees a conflict.
                return Ok(vec![]);
            }
            return Ok(vec![vec![SqlValue::Integer(id)]]);
        }

        Err(ExecutorError::backend(format!(
            "unrecognized query: {}",
            sql
        )))
    }

    async fn execute(&self, statement: &Statement) -> Result<u64, ExecutorError> {
        self.admit(statement).await?;
        let sql = statement.sql.as_str();

        if !sql.starts_with("INSERT INTO ") {
            return Err(ExecutorError::backend(format!(
                "unrecognized statement: {}",
                sql
            )));
        }

        let table = sql["INSERT INTO ".len()..]
            .split_whitespace()
            .next()
            .ok_or_else(|| ExecutorError::backend("missing table name"))?
            .to_string();
        let columns: Vec<String> = between(sql, "(", ')')
            .ok_or_else(|| ExecutorError::backend("missing column list"))?
            .split(',')
            .map(|c| c.trim().to_string())
            .collect();
        let key_count = between(sql, "ON CONFLICT (", ')')
            .ok_or_else(|| ExecutorError::backend("missing conflict target"))?
            .split(',')
            .count();

        if columns.len() != statement.params.len() {
            return Err(ExecutorError::backend(format!(
                "column/parameter mismatch in: {}",
                sql
            )));
        }

        let key: Vec<String> = statement.params[..key_count]
            .iter()
            .map(|value| value.to_string())
            .collect();
        let values: Vec<(String, SqlValue)> = columns[key_count..]
            .iter()
            .cloned()
            .zip(statement.params[key_count..].iter().cloned())
            .collect();

        self.lock().rows.insert((table, key), values);
        Ok(1)
    }
}

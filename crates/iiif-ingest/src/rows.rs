//! Idempotent row persistence
//!
//! A [`Row`] is a logical persistence unit: target table, ordered
//! primary-key columns, ordered value columns. The writer renders it as a
//! parameterized `INSERT ... ON CONFLICT (pk) DO UPDATE SET` statement, so
//! replaying a write leaves exactly one row with the latest values.

use crate::db::{SqlValue, Statement, StatementExecutor};
use crate::error::{LoaderError, Result};
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

/// A logical row bound for one table
#[derive(Debug, Clone)]
pub struct Row {
    pub table: &'static str,
    pub key: Vec<(&'static str, SqlValue)>,
    pub values: Vec<(&'static str, SqlValue)>,
}

impl Row {
    pub fn new(
        table: &'static str,
        key: Vec<(&'static str, SqlValue)>,
        values: Vec<(&'static str, SqlValue)>,
    ) -> Self {
        Self { table, key, values }
    }
}

/// Strips a configured prefix pattern from `label` columns before storage.
///
/// The pattern is a deployment concern: the default targets one known
/// collection's naming convention and can be overridden or disabled.
#[derive(Debug, Clone, Default)]
pub struct LabelRule {
    pattern: Option<Regex>,
}

impl LabelRule {
    pub fn new(pattern: Option<Regex>) -> Self {
        Self { pattern }
    }

    /// Apply the rule to one label value
    pub fn apply(&self, label: &str) -> String {
        match &self.pattern {
            Some(regex) => regex.replace(label, "").into_owned(),
            None => label.to_string(),
        }
    }
}

/// Builds and issues upsert statements through a statement executor
pub struct RowWriter {
    executor: Arc<dyn StatementExecutor>,
    label_rule: LabelRule,
}

impl RowWriter {
    pub fn new(executor: Arc<dyn StatementExecutor>, label_rule: LabelRule) -> Self {
        Self {
            executor,
            label_rule,
        }
    }

    /// Persist one row; a primary-key conflict replaces the value columns.
    pub async fn write(&self, row: Row) -> Result<()> {
        let statement = self.build_statement(&row);
        debug!(table = row.table, %statement, "Upsert");
        self.executor
            .execute(&statement)
            .await
            .map_err(|source| LoaderError::Persistence {
                statement: statement.to_string(),
                source,
            })?;
        Ok(())
    }

    fn build_statement(&self, row: &Row) -> Statement {
        let mut columns = Vec::with_capacity(row.key.len() + row.values.len());
        let mut placeholders = Vec::with_capacity(columns.capacity());
        let mut params = Vec::with_capacity(columns.capacity());

        for (name, value) in &row.key {
            columns.push(*name);
            placeholders.push(format!("${}", params.len() + 1));
            params.push(value.clone());
        }
        for (name, value) in &row.values {
            columns.push(*name);
            placeholders.push(format!("${}", params.len() + 1));
            params.push(self.normalize(name, value));
        }

        let key_columns: Vec<&str> = row.key.iter().map(|(name, _)| *name).collect();
        let action = if row.values.is_empty() {
            "DO NOTHING".to_string()
        } else {
            let updates: Vec<String> = row
                .values
                .iter()
                .map(|(name, _)| format!("{} = EXCLUDED.{}", name, name))
                .collect();
            format!("DO UPDATE SET {}", updates.join(", "))
        };

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
            row.table,
            columns.join(", "),
            placeholders.join(", "),
            key_columns.join(", "),
            action,
        );
        Statement::new(sql, params)
    }

    fn normalize(&self, column: &str, value: &SqlValue) -> SqlValue {
        match value {
            SqlValue::Text(text) if column == "label" => {
                SqlValue::Text(self.label_rule.apply(text))
            }
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryExecutor;

    fn writer_with(rule: LabelRule) -> (Arc<MemoryExecutor>, RowWriter) {
        let executor = Arc::new(MemoryExecutor::new());
        let writer = RowWriter::new(executor.clone(), rule);
        (executor, writer)
    }

    fn sample_row(label: &str) -> Row {
        Row::new(
            "iiif",
            vec![("iiif_id", SqlValue::Integer(1))],
            vec![
                ("iiif_type_id", SqlValue::from("sc:Manifest")),
                ("label", SqlValue::from(label)),
            ],
        )
    }

    #[tokio::test]
    async fn test_upsert_statement_shape() {
        let (executor, writer) = writer_with(LabelRule::default());
        writer.write(sample_row("A label")).await.unwrap();

        let statements = executor.statements();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0].sql,
            "INSERT INTO iiif (iiif_id, iiif_type_id, label) VALUES ($1, $2, $3) \
             ON CONFLICT (iiif_id) DO UPDATE SET iiif_type_id = EXCLUDED.iiif_type_id, \
             label = EXCLUDED.label"
        );
        assert_eq!(
            statements[0].params,
            vec![
                SqlValue::Integer(1),
                SqlValue::from("sc:Manifest"),
                SqlValue::from("A label"),
            ]
        );
    }

    #[tokio::test]
    async fn test_rewrite_replaces_values() {
        let (executor, writer) = writer_with(LabelRule::default());
        writer.write(sample_row("first")).await.unwrap();
        writer.write(sample_row("second")).await.unwrap();

        let rows = executor.table_rows("iiif");
        assert_eq!(rows.len(), 1);
        let (_, values) = &rows[0];
        assert!(values.contains(&("label".to_string(), SqlValue::from("second"))));
    }

    #[tokio::test]
    async fn test_label_prefix_stripped() {
        let rule = LabelRule::new(Some(
            Regex::new(r"^Edward Ruscha photographs of ((Los Angeles streets|Sunset Boulevard): )?")
                .unwrap(),
        ));
        let (executor, writer) = writer_with(rule);
        writer
            .write(sample_row(
                "Edward Ruscha photographs of Sunset Boulevard: Roll 1",
            ))
            .await
            .unwrap();

        let statements = executor.statements();
        assert_eq!(statements[0].params[2], SqlValue::from("Roll 1"));
    }

    #[tokio::test]
    async fn test_label_without_prefix_unchanged() {
        let rule = LabelRule::new(Some(Regex::new(r"^Archive: ").unwrap()));
        let (executor, writer) = writer_with(rule);
        writer.write(sample_row("Sunset Boulevard")).await.unwrap();

        let statements = executor.statements();
        assert_eq!(statements[0].params[2], SqlValue::from("Sunset Boulevard"));
    }

    #[tokio::test]
    async fn test_non_label_columns_untouched() {
        let rule = LabelRule::new(Some(Regex::new(r"^sc:").unwrap()));
        let (executor, writer) = writer_with(rule);
        writer.write(sample_row("x")).await.unwrap();

        let statements = executor.statements();
        assert_eq!(statements[0].params[1], SqlValue::from("sc:Manifest"));
    }

    #[tokio::test]
    async fn test_write_failure_carries_statement() {
        let (executor, writer) = writer_with(LabelRule::default());
        executor.fail_when("INSERT INTO iiif ");
        let err = writer.write(sample_row("x")).await.unwrap_err();
        match err {
            LoaderError::Persistence { statement, .. } => {
                assert!(statement.contains("INSERT INTO iiif "));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

//! Parsed-node statistics
//!
//! An explicit collector threaded through the traversal, so runs are
//! re-runnable and testable without global counter state. Purely
//! observational: recording never fails.

use crate::schema::NodeKind;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Tallies parsed nodes by type tag and image dimension bucket
#[derive(Debug, Default)]
pub struct StatsCollector {
    node_counts: Mutex<BTreeMap<String, u64>>,
    image_sizes: Mutex<BTreeMap<String, u64>>,
}

/// Sorted snapshot of both counter families
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub node_counts: BTreeMap<String, u64>,
    pub image_sizes: BTreeMap<String, u64>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one parsed node of the given kind
    pub fn record_node(&self, kind: NodeKind) {
        let mut counts = self
            .node_counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *counts.entry(kind.tag().to_string()).or_insert(0) += 1;
    }

    /// Count one observed width:height bucket
    pub fn record_image_size(&self, width: i64, height: i64) {
        let mut sizes = self
            .image_sizes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *sizes.entry(format!("{}:{}", width, height)).or_insert(0) += 1;
    }

    /// Snapshot both counter families, sorted by key
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            node_counts: self
                .node_counts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            image_sizes: self
                .image_sizes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

impl StatsSnapshot {
    /// Render the final report: one line per node type, then one line per
    /// dimension bucket, each sorted by key.
    pub fn report_lines(&self) -> Vec<String> {
        self.node_counts
            .iter()
            .map(|(tag, count)| format!("{}: {}", tag, count))
            .chain(
                self.image_sizes
                    .iter()
                    .map(|(bucket, count)| format!("{}: {}", bucket, count)),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_accumulate() {
        let stats = StatsCollector::new();
        stats.record_node(NodeKind::Canvas);
        stats.record_node(NodeKind::Canvas);
        stats.record_node(NodeKind::Manifest);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.node_counts.get("sc:Canvas"), Some(&2));
        assert_eq!(snapshot.node_counts.get("sc:Manifest"), Some(&1));
    }

    #[test]
    fn test_report_lines_sorted() {
        let stats = StatsCollector::new();
        stats.record_node(NodeKind::Sequence);
        stats.record_node(NodeKind::Canvas);
        stats.record_image_size(600, 400);
        stats.record_image_size(600, 400);
        stats.record_image_size(100, 80);

        let lines = stats.snapshot().report_lines();
        assert_eq!(
            lines,
            vec![
                "sc:Canvas: 1",
                "sc:Sequence: 1",
                "100:80: 1",
                "600:400: 2",
            ]
        );
    }
}

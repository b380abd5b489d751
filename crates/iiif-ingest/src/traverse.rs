//! Recursive, type-dispatching traversal of IIIF document graphs
//!
//! The engine walks a decoded document, validating each node before any
//! side effect, resolving external ids to surrogates, fanning out over
//! children, and persisting base, extension, and association rows. Children
//! of one parent are processed concurrently, but association sequence
//! numbers are captured from each child's position in the originating list
//! at fan-out time, and a parent's association and extension rows are only
//! written after every child has completed.

use crate::db::StatementExecutor;
use crate::error::{LoaderError, Result, SchemaIssue};
use crate::resolver::IdResolver;
use crate::rows::{LabelRule, Row, RowWriter};
use crate::schema::{self, NodeKind};
use crate::stats::StatsCollector;
use futures::future::{try_join_all, BoxFuture};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Canonical projection of a processed node, consumed by its parent
#[derive(Debug, Clone)]
pub enum Projection {
    Annotation {
        id: String,
        format: String,
        width: i64,
        height: i64,
        service_id: String,
    },
    Canvas {
        id: String,
        label: String,
        width: i64,
        height: i64,
        format: String,
        image: String,
        thumbnail: String,
    },
    Collection {
        id: String,
        label: String,
    },
    Manifest {
        id: String,
        label: String,
        description: String,
        attribution: String,
        license: String,
        logo: String,
        viewing_hint: Option<String>,
    },
    Range {
        id: String,
        label: String,
        viewing_hint: Option<String>,
    },
    Sequence {
        id: String,
        label: String,
    },
}

impl Projection {
    /// The node's external id
    pub fn external_id(&self) -> &str {
        match self {
            Projection::Annotation { id, .. }
            | Projection::Canvas { id, .. }
            | Projection::Collection { id, .. }
            | Projection::Manifest { id, .. }
            | Projection::Range { id, .. }
            | Projection::Sequence { id, .. } => id,
        }
    }

    /// The node's kind
    pub fn kind(&self) -> NodeKind {
        match self {
            Projection::Annotation { .. } => NodeKind::Annotation,
            Projection::Canvas { .. } => NodeKind::Canvas,
            Projection::Collection { .. } => NodeKind::Collection,
            Projection::Manifest { .. } => NodeKind::Manifest,
            Projection::Range { .. } => NodeKind::Range,
            Projection::Sequence { .. } => NodeKind::Sequence,
        }
    }
}

/// Recursive document-graph walker
pub struct Traversal {
    resolver: IdResolver,
    writer: RowWriter,
    stats: StatsCollector,
    visited: Mutex<HashSet<(NodeKind, String)>>,
}

impl Traversal {
    pub fn new(executor: Arc<dyn StatementExecutor>, label_rule: LabelRule) -> Self {
        Self {
            resolver: IdResolver::new(executor.clone()),
            writer: RowWriter::new(executor, label_rule),
            stats: StatsCollector::new(),
            visited: Mutex::new(HashSet::new()),
        }
    }

    pub fn resolver(&self) -> &IdResolver {
        &self.resolver
    }

    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    /// Walk one node graph; `owner` is the embedding node, if any.
    ///
    /// Dispatch is exhaustive over the closed set of node kinds. The visited
    /// ledger is checked before the handler runs and recorded once the
    /// handler produces its projection, so a (type, id) pair occurring twice
    /// in one run fails rather than being silently absorbed.
    pub fn traverse<'a>(
        &'a self,
        node: &'a Value,
        owner: Option<&'a Value>,
    ) -> BoxFuture<'a, Result<Projection>> {
        Box::pin(async move {
            let kind = schema::node_kind(node)?;
            if let Some(id) = node.get("@id").and_then(Value::as_str) {
                self.check_unvisited(kind, id)?;
            }
            debug!(kind = %kind, "Traversing node");

            let projection = match kind {
                NodeKind::Annotation => self.annotation(node, owner).await?,
                NodeKind::Canvas => self.canvas(node).await?,
                NodeKind::Collection => self.collection(node).await?,
                NodeKind::Manifest => self.manifest(node).await?,
                NodeKind::Range => self.range(node).await?,
                NodeKind::Sequence => self.sequence(node).await?,
            };

            self.mark_visited(kind, projection.external_id())?;
            self.stats.record_node(kind);
            Ok(projection)
        })
    }

    /// No persistence of its own: the annotation's fields fold into the
    /// owning canvas's rows.
    async fn annotation(&self, node: &Value, owner: Option<&Value>) -> Result<Projection> {
        let owner_id = owner
            .and_then(|value| value.get("@id"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                LoaderError::schema(
                    NodeKind::Annotation.tag(),
                    None,
                    SchemaIssue::Invalid {
                        field: "on".to_string(),
                        detail: "annotation has no owning canvas".to_string(),
                    },
                )
            })?;
        let annotation = schema::validate_annotation(node, owner_id)?;
        self.stats
            .record_image_size(annotation.width, annotation.height);
        Ok(Projection::Annotation {
            id: annotation.resource_id,
            format: annotation.format,
            width: annotation.width,
            height: annotation.height,
            service_id: annotation.service_id,
        })
    }

    async fn canvas(&self, node: &Value) -> Result<Projection> {
        let canvas = schema::validate_canvas(node)?;
        self.stats.record_image_size(canvas.width, canvas.height);
        let iiif_id = self.resolver.resolve(&canvas.id).await?;

        let image = self.traverse(&canvas.image, Some(node)).await?;
        let Projection::Annotation {
            format,
            width,
            height,
            service_id,
            ..
        } = image
        else {
            return Err(LoaderError::schema(
                NodeKind::Canvas.tag(),
                Some(canvas.id),
                SchemaIssue::Invalid {
                    field: "images[0]".to_string(),
                    detail: "canvas image must be a painting annotation".to_string(),
                },
            ));
        };

        // The canvas's declared dimensions must agree with its image's.
        if width != canvas.width || height != canvas.height {
            return Err(LoaderError::schema(
                NodeKind::Canvas.tag(),
                Some(canvas.id),
                SchemaIssue::DimensionMismatch {
                    canvas_width: canvas.width,
                    canvas_height: canvas.height,
                    image_width: width,
                    image_height: height,
                },
            ));
        }

        self.write_base(iiif_id, NodeKind::Canvas, &canvas.label).await?;
        self.writer
            .write(Row::new(
                "iiif_canvas",
                vec![("iiif_id", iiif_id.into())],
                vec![
                    ("format", format.clone().into()),
                    ("height", canvas.height.into()),
                    ("image", service_id.clone().into()),
                    ("thumbnail", canvas.thumbnail_service.clone().into()),
                    ("width", canvas.width.into()),
                ],
            ))
            .await?;

        Ok(Projection::Canvas {
            id: canvas.id,
            label: canvas.label,
            width: canvas.width,
            height: canvas.height,
            format,
            image: service_id,
            thumbnail: canvas.thumbnail_service,
        })
    }

    /// Members are reference stubs: resolved and associated, not traversed.
    async fn collection(&self, node: &Value) -> Result<Projection> {
        let collection = schema::validate_collection(node)?;
        let iiif_id = self.resolver.resolve(&collection.id).await?;
        self.write_base(iiif_id, NodeKind::Collection, &collection.label)
            .await?;

        try_join_all(
            collection
                .members
                .iter()
                .enumerate()
                .map(|(index, member)| async move {
                    let member_id = self.resolver.resolve(&member.id).await?;
                    self.write_assoc(iiif_id, member_id, &member.kind_tag, index)
                        .await
                }),
        )
        .await?;

        Ok(Projection::Collection {
            id: collection.id,
            label: collection.label,
        })
    }

    async fn manifest(&self, node: &Value) -> Result<Projection> {
        let manifest = schema::validate_manifest(node)?;
        let iiif_id = self.resolver.resolve(&manifest.id).await?;
        self.write_base(iiif_id, NodeKind::Manifest, &manifest.label)
            .await?;

        let sequences = try_join_all(
            manifest
                .sequences
                .iter()
                .map(|child| self.traverse(child, Some(node))),
        )
        .await?;
        self.write_child_assocs(iiif_id, &sequences).await?;

        let structures = try_join_all(
            manifest
                .structures
                .iter()
                .map(|child| self.traverse(child, Some(node))),
        )
        .await?;
        self.write_child_assocs(iiif_id, &structures).await?;

        self.writer
            .write(Row::new(
                "iiif_manifest",
                vec![("iiif_id", iiif_id.into())],
                vec![
                    ("description", manifest.description.clone().into()),
                    ("attribution", manifest.attribution.clone().into()),
                    ("license", manifest.license.clone().into()),
                    ("logo", manifest.logo.clone().into()),
                    ("viewing_hint", manifest.viewing_hint.clone().into()),
                ],
            ))
            .await?;

        Ok(Projection::Manifest {
            id: manifest.id,
            label: manifest.label,
            description: manifest.description,
            attribution: manifest.attribution,
            license: manifest.license,
            logo: manifest.logo,
            viewing_hint: manifest.viewing_hint,
        })
    }

    /// Nested ranges and canvases arrive as bare URIs: resolved and
    /// associated without recursive traversal.
    async fn range(&self, node: &Value) -> Result<Projection> {
        let range = schema::validate_range(node)?;
        let iiif_id = self.resolver.resolve(&range.id).await?;
        self.write_base(iiif_id, NodeKind::Range, &range.label).await?;
        self.writer
            .write(Row::new(
                "iiif_range",
                vec![("iiif_id", iiif_id.into())],
                vec![("viewing_hint", range.viewing_hint.clone().into())],
            ))
            .await?;

        self.write_uri_assocs(iiif_id, &range.ranges, NodeKind::Range)
            .await?;
        self.write_uri_assocs(iiif_id, &range.canvases, NodeKind::Canvas)
            .await?;

        Ok(Projection::Range {
            id: range.id,
            label: range.label,
            viewing_hint: range.viewing_hint,
        })
    }

    async fn sequence(&self, node: &Value) -> Result<Projection> {
        let sequence = schema::validate_sequence(node)?;
        let iiif_id = self.resolver.resolve(&sequence.id).await?;
        self.write_base(iiif_id, NodeKind::Sequence, &sequence.label)
            .await?;

        let canvases = try_join_all(
            sequence
                .canvases
                .iter()
                .map(|child| self.traverse(child, Some(node))),
        )
        .await?;
        self.write_child_assocs(iiif_id, &canvases).await?;

        Ok(Projection::Sequence {
            id: sequence.id,
            label: sequence.label,
        })
    }

    async fn write_base(&self, iiif_id: i64, kind: NodeKind, label: &str) -> Result<()> {
        self.writer
            .write(Row::new(
                "iiif",
                vec![("iiif_id", iiif_id.into())],
                vec![
                    ("iiif_type_id", kind.tag().into()),
                    ("label", label.into()),
                ],
            ))
            .await
    }

    async fn write_assoc(
        &self,
        from: i64,
        to: i64,
        assoc_type: &str,
        sequence: usize,
    ) -> Result<()> {
        self.writer
            .write(Row::new(
                "iiif_assoc",
                vec![
                    ("iiif_id_from", from.into()),
                    ("iiif_id_to", to.into()),
                    ("iiif_assoc_type_id", assoc_type.into()),
                ],
                vec![("sequence_num", (sequence as i64).into())],
            ))
            .await
    }

    /// One association per completed child, numbered by its position in the
    /// originating list.
    async fn write_child_assocs(&self, from: i64, children: &[Projection]) -> Result<()> {
        try_join_all(children.iter().enumerate().map(|(index, child)| async move {
            let to = self.resolver.resolve(child.external_id()).await?;
            self.write_assoc(from, to, child.kind().tag(), index).await
        }))
        .await?;
        Ok(())
    }

    async fn write_uri_assocs(
        &self,
        from: i64,
        targets: &[String],
        kind: NodeKind,
    ) -> Result<()> {
        try_join_all(targets.iter().enumerate().map(|(index, target)| async move {
            let to = self.resolver.resolve(target).await?;
            self.write_assoc(from, to, kind.tag(), index).await
        }))
        .await?;
        Ok(())
    }

    fn check_unvisited(&self, kind: NodeKind, id: &str) -> Result<()> {
        let visited = self.visited.lock().unwrap_or_else(PoisonError::into_inner);
        if visited.contains(&(kind, id.to_string())) {
            Err(LoaderError::duplicate(kind.tag(), id))
        } else {
            Ok(())
        }
    }

    fn mark_visited(&self, kind: NodeKind, id: &str) -> Result<()> {
        let mut visited = self.visited.lock().unwrap_or_else(PoisonError::into_inner);
        if visited.insert((kind, id.to_string())) {
            Ok(())
        } else {
            Err(LoaderError::duplicate(kind.tag(), id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlValue;
    use crate::testing::MemoryExecutor;
    use serde_json::json;

    fn traversal() -> (Arc<MemoryExecutor>, Traversal) {
        let executor = Arc::new(MemoryExecutor::new());
        let traversal = Traversal::new(executor.clone(), LabelRule::default());
        (executor, traversal)
    }

    fn collection(id: &str, members: Vec<Value>) -> Value {
        json!({
            "@id": id,
            "@type": "sc:Collection",
            "label": "Photographs",
            "members": members,
        })
    }

    fn member(id: &str) -> Value {
        json!({"@id": id, "@type": "sc:Manifest"})
    }

    #[tokio::test]
    async fn test_collection_writes_base_row_and_assocs() {
        let (executor, traversal) = traversal();
        let doc = collection("c1", vec![member("m1"), member("m2")]);
        traversal.traverse(&doc, None).await.unwrap();

        let c1 = executor.id_of("c1").unwrap();
        let m1 = executor.id_of("m1").unwrap();
        let m2 = executor.id_of("m2").unwrap();

        let base = executor.table_rows("iiif");
        assert_eq!(base.len(), 1);
        assert_eq!(base[0].0, vec![c1.to_string()]);

        let assocs = executor.table_rows("iiif_assoc");
        assert_eq!(assocs.len(), 2);
        let m1_assoc = assocs
            .iter()
            .find(|(pk, _)| pk[1] == m1.to_string())
            .unwrap();
        assert_eq!(m1_assoc.1, vec![("sequence_num".to_string(), SqlValue::Integer(0))]);
        let m2_assoc = assocs
            .iter()
            .find(|(pk, _)| pk[1] == m2.to_string())
            .unwrap();
        assert_eq!(m2_assoc.1, vec![("sequence_num".to_string(), SqlValue::Integer(1))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_assoc_order_survives_completion_order() {
        let (executor, traversal) = traversal();
        // The first member's resolution is slowest; its association must
        // still carry sequence number zero.
        executor.delay_when("slow-a", std::time::Duration::from_millis(500));
        executor.delay_when("slow-b", std::time::Duration::from_millis(100));
        let doc = collection(
            "c1",
            vec![member("slow-a"), member("slow-b"), member("fast-c")],
        );
        traversal.traverse(&doc, None).await.unwrap();

        let a = executor.id_of("slow-a").unwrap();
        let b = executor.id_of("slow-b").unwrap();
        let c = executor.id_of("fast-c").unwrap();
        let assocs = executor.table_rows("iiif_assoc");
        let sequence_of = |to: i64| {
            assocs
                .iter()
                .find(|(pk, _)| pk[1] == to.to_string())
                .and_then(|(_, values)| values[0].1.as_integer())
                .unwrap()
        };
        assert_eq!(sequence_of(a), 0);
        assert_eq!(sequence_of(b), 1);
        assert_eq!(sequence_of(c), 2);
    }

    #[tokio::test]
    async fn test_duplicate_node_rejected() {
        let (_executor, traversal) = traversal();
        let doc = collection("c1", vec![]);
        traversal.traverse(&doc, None).await.unwrap();
        let err = traversal.traverse(&doc, None).await.unwrap_err();
        match err {
            LoaderError::DuplicateNode { kind, id } => {
                assert_eq!(kind, "sc:Collection");
                assert_eq!(id, "c1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_type_rejected() {
        let (_executor, traversal) = traversal();
        let doc = json!({"@id": "x", "@type": "sc:Layer"});
        let err = traversal.traverse(&doc, None).await.unwrap_err();
        assert!(matches!(err, LoaderError::UnknownType(_)));
    }

    #[tokio::test]
    async fn test_validation_failure_writes_nothing() {
        let (executor, traversal) = traversal();
        let doc = json!({
            "@id": "c1",
            "@type": "sc:Collection",
            "label": "L",
            "members": [],
            "surprise": true,
        });
        let err = traversal.traverse(&doc, None).await.unwrap_err();
        assert!(matches!(err, LoaderError::SchemaViolation { .. }));
        assert!(executor.statements().is_empty());
        assert!(executor.table_rows("iiif").is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_run() {
        let (executor, traversal) = traversal();
        executor.fail_when("INSERT INTO iiif_assoc");
        let doc = collection("c1", vec![member("m1")]);
        let err = traversal.traverse(&doc, None).await.unwrap_err();
        match err {
            LoaderError::Persistence { statement, .. } => {
                assert!(statement.contains("INSERT INTO iiif_assoc"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

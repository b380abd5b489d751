//! Per-type shape validation for decoded IIIF nodes
//!
//! Each of the six recognized node types has an exact shape: mandatory
//! fields, pinned constants (motivation, image-service context and profile
//! URIs), and a closed set of recognized keys. Validation lists the
//! recognized keys and flags anything outside that list, so malformed input
//! fails with a structured [`SchemaIssue`] before any side effect occurs for
//! the node.

use crate::error::{LoaderError, Result, SchemaIssue};
use serde_json::{Map, Value};
use std::fmt;

/// IIIF Image API context every image service must declare
pub const IMAGE_SERVICE_CONTEXT: &str = "http://iiif.io/api/image/2/context.json";

/// Profile required of full image services
pub const IMAGE_SERVICE_PROFILE_LEVEL2: &str = "http://iiif.io/api/image/2/level2.json";

/// Profile required of thumbnail services
pub const IMAGE_SERVICE_PROFILE_LEVEL1: &str = "http://iiif.io/api/image/2/level1.json";

/// Motivation constant for painting annotations
pub const MOTIVATION_PAINTING: &str = "sc:painting";

/// Resource type constant for image resources
pub const RESOURCE_TYPE_IMAGE: &str = "dctypes:Image";

/// The closed set of node types this loader understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Annotation,
    Canvas,
    Collection,
    Manifest,
    Range,
    Sequence,
}

impl NodeKind {
    /// Map a document type tag to a node kind
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "oa:Annotation" => Some(NodeKind::Annotation),
            "sc:Canvas" => Some(NodeKind::Canvas),
            "sc:Collection" => Some(NodeKind::Collection),
            "sc:Manifest" => Some(NodeKind::Manifest),
            "sc:Range" => Some(NodeKind::Range),
            "sc:Sequence" => Some(NodeKind::Sequence),
            _ => None,
        }
    }

    /// The document type tag for this kind
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::Annotation => "oa:Annotation",
            NodeKind::Canvas => "sc:Canvas",
            NodeKind::Collection => "sc:Collection",
            NodeKind::Manifest => "sc:Manifest",
            NodeKind::Range => "sc:Range",
            NodeKind::Sequence => "sc:Sequence",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Read the `@type` tag of a raw node and map it to a kind.
///
/// A missing tag or a tag outside the closed set is an `UnknownType`
/// failure; dispatch over the result is exhaustive.
pub fn node_kind(value: &Value) -> Result<NodeKind> {
    let tag = value
        .get("@type")
        .and_then(Value::as_str)
        .ok_or_else(|| LoaderError::UnknownType("(missing @type)".to_string()))?;
    NodeKind::from_tag(tag).ok_or_else(|| LoaderError::UnknownType(tag.to_string()))
}

/// Validated image annotation
#[derive(Debug, Clone)]
pub struct AnnotationNode {
    pub resource_id: String,
    pub format: String,
    pub width: i64,
    pub height: i64,
    pub service_id: String,
}

/// Validated canvas, carrying its single embedded image annotation
#[derive(Debug, Clone)]
pub struct CanvasNode {
    pub id: String,
    pub label: String,
    pub width: i64,
    pub height: i64,
    pub thumbnail_id: String,
    pub thumbnail_service: String,
    pub image: Value,
}

/// A collection member reference (not traversed, only associated)
#[derive(Debug, Clone)]
pub struct CollectionMember {
    pub id: String,
    pub kind_tag: String,
}

/// Validated collection
#[derive(Debug, Clone)]
pub struct CollectionNode {
    pub id: String,
    pub label: String,
    pub members: Vec<CollectionMember>,
}

/// Validated manifest, carrying its embedded sequences and structures
#[derive(Debug, Clone)]
pub struct ManifestNode {
    pub id: String,
    pub label: String,
    pub description: String,
    pub attribution: String,
    pub license: String,
    pub logo: String,
    pub viewing_hint: Option<String>,
    pub sequences: Vec<Value>,
    pub structures: Vec<Value>,
}

/// Validated range; children are bare URI references
#[derive(Debug, Clone)]
pub struct RangeNode {
    pub id: String,
    pub label: String,
    pub viewing_hint: Option<String>,
    pub ranges: Vec<String>,
    pub canvases: Vec<String>,
}

/// Validated sequence, carrying its embedded canvases
#[derive(Debug, Clone)]
pub struct SequenceNode {
    pub id: String,
    pub label: String,
    pub canvases: Vec<Value>,
}

/// View over a raw node object that reports violations with the node's
/// kind, external id, and the dotted path of the offending field.
struct Shape<'a> {
    kind: NodeKind,
    id: Option<String>,
    path: String,
    map: &'a Map<String, Value>,
}

impl<'a> Shape<'a> {
    fn new(kind: NodeKind, value: &'a Value) -> Result<Self> {
        let map = value.as_object().ok_or_else(|| {
            LoaderError::schema(
                kind.tag(),
                None,
                SchemaIssue::Invalid {
                    field: "(node)".to_string(),
                    detail: "expected a JSON object".to_string(),
                },
            )
        })?;
        let id = map.get("@id").and_then(Value::as_str).map(str::to_string);
        Ok(Self {
            kind,
            id,
            path: String::new(),
            map,
        })
    }

    fn field_path(&self, field: &str) -> String {
        if self.path.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", self.path, field)
        }
    }

    fn violation(&self, issue: SchemaIssue) -> LoaderError {
        LoaderError::schema(self.kind.tag(), self.id.clone(), issue)
    }

    fn missing(&self, field: &str) -> LoaderError {
        self.violation(SchemaIssue::Missing {
            field: self.field_path(field),
        })
    }

    fn invalid(&self, field: &str, detail: impl Into<String>) -> LoaderError {
        self.violation(SchemaIssue::Invalid {
            field: self.field_path(field),
            detail: detail.into(),
        })
    }

    /// Fail if the object carries any key outside the recognized set
    fn check_recognized(&self, recognized: &[&str]) -> Result<()> {
        let mut unexpected: Vec<String> = self
            .map
            .keys()
            .filter(|key| !recognized.contains(&key.as_str()))
            .map(|key| self.field_path(key))
            .collect();
        if unexpected.is_empty() {
            Ok(())
        } else {
            unexpected.sort();
            Err(self.violation(SchemaIssue::Unexpected { fields: unexpected }))
        }
    }

    fn require_str(&self, field: &str) -> Result<String> {
        match self.map.get(field) {
            None => Err(self.missing(field)),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(self.invalid(field, format!("expected a string, got {}", other))),
        }
    }

    fn optional_str(&self, field: &str) -> Result<Option<String>> {
        match self.map.get(field) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(self.invalid(field, format!("expected a string, got {}", other))),
        }
    }

    fn require_int(&self, field: &str) -> Result<i64> {
        match self.map.get(field) {
            None => Err(self.missing(field)),
            Some(value) => value
                .as_i64()
                .ok_or_else(|| self.invalid(field, format!("expected an integer, got {}", value))),
        }
    }

    fn require_array(&self, field: &str) -> Result<&'a [Value]> {
        match self.map.get(field) {
            None => Err(self.missing(field)),
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(self.invalid(field, format!("expected an array, got {}", other))),
        }
    }

    fn optional_array(&self, field: &str) -> Result<&'a [Value]> {
        match self.map.get(field) {
            None => Ok(&[]),
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(self.invalid(field, format!("expected an array, got {}", other))),
        }
    }

    fn require_present(&self, field: &str) -> Result<&'a Value> {
        self.map.get(field).ok_or_else(|| self.missing(field))
    }

    fn require_const(&self, field: &str, expected: &str) -> Result<()> {
        let actual = self.require_str(field)?;
        if actual == expected {
            Ok(())
        } else {
            Err(self.violation(SchemaIssue::Constant {
                field: self.field_path(field),
                expected: expected.to_string(),
                actual,
            }))
        }
    }

    /// Descend into a required nested object, extending the field path
    fn sub_object(&self, field: &str) -> Result<Shape<'a>> {
        let value = self.require_present(field)?;
        let map = value
            .as_object()
            .ok_or_else(|| self.invalid(field, format!("expected an object, got {}", value)))?;
        Ok(Shape {
            kind: self.kind,
            id: self.id.clone(),
            path: self.field_path(field),
            map,
        })
    }
}

/// Validate an image annotation embedded in the canvas identified by
/// `owner_id`; the `on` field must point back at that canvas.
pub fn validate_annotation(value: &Value, owner_id: &str) -> Result<AnnotationNode> {
    let shape = Shape::new(NodeKind::Annotation, value)?;
    shape.check_recognized(&["@type", "motivation", "resource", "on"])?;
    shape.require_const("motivation", MOTIVATION_PAINTING)?;
    shape.require_const("on", owner_id)?;

    let resource = shape.sub_object("resource")?;
    resource.check_recognized(&["@id", "@type", "format", "height", "width", "service"])?;
    resource.require_const("@type", RESOURCE_TYPE_IMAGE)?;
    let resource_id = resource.require_str("@id")?;
    let format = resource.require_str("format")?;
    let width = resource.require_int("width")?;
    let height = resource.require_int("height")?;

    let service = resource.sub_object("service")?;
    service.check_recognized(&["@context", "@id", "profile"])?;
    service.require_const("@context", IMAGE_SERVICE_CONTEXT)?;
    service.require_const("profile", IMAGE_SERVICE_PROFILE_LEVEL2)?;
    let service_id = service.require_str("@id")?;

    Ok(AnnotationNode {
        resource_id,
        format,
        width,
        height,
        service_id,
    })
}

/// Validate a canvas; `viewingHint` and `thumbnail.@type` are accepted and
/// ignored, and `images` must hold exactly one element.
pub fn validate_canvas(value: &Value) -> Result<CanvasNode> {
    let shape = Shape::new(NodeKind::Canvas, value)?;
    shape.check_recognized(&[
        "@id",
        "@type",
        "label",
        "viewingHint",
        "thumbnail",
        "height",
        "width",
        "images",
    ])?;
    let id = shape.require_str("@id")?;
    let label = shape.require_str("label")?;
    let width = shape.require_int("width")?;
    let height = shape.require_int("height")?;

    let thumbnail = shape.sub_object("thumbnail")?;
    thumbnail.check_recognized(&["@id", "@type", "service"])?;
    let thumbnail_id = thumbnail.require_str("@id")?;

    let thumbnail_svc = thumbnail.sub_object("service")?;
    thumbnail_svc.check_recognized(&["@context", "@id", "profile"])?;
    thumbnail_svc.require_const("@context", IMAGE_SERVICE_CONTEXT)?;
    thumbnail_svc.require_const("profile", IMAGE_SERVICE_PROFILE_LEVEL1)?;
    let thumbnail_service = thumbnail_svc.require_str("@id")?;

    let images = shape.require_array("images")?;
    if images.len() != 1 {
        return Err(shape.invalid(
            "images",
            format!("expected exactly one image annotation, got {}", images.len()),
        ));
    }

    Ok(CanvasNode {
        id,
        label,
        width,
        height,
        thumbnail_id,
        thumbnail_service,
        image: images[0].clone(),
    })
}

/// Validate a collection; members are reference stubs and must each carry
/// `@id` and `@type`.
pub fn validate_collection(value: &Value) -> Result<CollectionNode> {
    let shape = Shape::new(NodeKind::Collection, value)?;
    shape.check_recognized(&["@context", "@id", "@type", "label", "members"])?;
    let id = shape.require_str("@id")?;
    let label = shape.require_str("label")?;

    let raw_members = shape.require_array("members")?;
    let mut members = Vec::with_capacity(raw_members.len());
    for (index, member) in raw_members.iter().enumerate() {
        let field = format!("members[{}]", index);
        let map = member
            .as_object()
            .ok_or_else(|| shape.invalid(&field, "expected an object"))?;
        let member_id = map
            .get("@id")
            .and_then(Value::as_str)
            .ok_or_else(|| shape.invalid(&field, "missing '@id'"))?;
        let kind_tag = map
            .get("@type")
            .and_then(Value::as_str)
            .ok_or_else(|| shape.invalid(&field, "missing '@type'"))?;
        members.push(CollectionMember {
            id: member_id.to_string(),
            kind_tag: kind_tag.to_string(),
        });
    }

    Ok(CollectionNode { id, label, members })
}

/// Validate a manifest; `metadata` may be any JSON value and is not
/// persisted.
pub fn validate_manifest(value: &Value) -> Result<ManifestNode> {
    let shape = Shape::new(NodeKind::Manifest, value)?;
    shape.check_recognized(&[
        "@context",
        "@id",
        "@type",
        "label",
        "metadata",
        "description",
        "attribution",
        "license",
        "logo",
        "viewingHint",
        "sequences",
        "structures",
    ])?;
    let id = shape.require_str("@id")?;
    let label = shape.require_str("label")?;
    shape.require_present("metadata")?;
    let description = shape.require_str("description")?;
    let attribution = shape.require_str("attribution")?;
    let license = shape.require_str("license")?;
    let logo = shape.require_str("logo")?;
    let viewing_hint = shape.optional_str("viewingHint")?;
    let sequences = shape.require_array("sequences")?.to_vec();
    let structures = shape.require_array("structures")?.to_vec();

    Ok(ManifestNode {
        id,
        label,
        description,
        attribution,
        license,
        logo,
        viewing_hint,
        sequences,
        structures,
    })
}

/// Validate a range; nested ranges and canvases are bare URI strings.
pub fn validate_range(value: &Value) -> Result<RangeNode> {
    let shape = Shape::new(NodeKind::Range, value)?;
    shape.check_recognized(&["@id", "@type", "label", "viewingHint", "ranges", "canvases"])?;
    let id = shape.require_str("@id")?;
    let label = shape.require_str("label")?;
    let viewing_hint = shape.optional_str("viewingHint")?;
    let ranges = uri_list(&shape, "ranges")?;
    let canvases = uri_list(&shape, "canvases")?;

    Ok(RangeNode {
        id,
        label,
        viewing_hint,
        ranges,
        canvases,
    })
}

/// Validate a sequence
pub fn validate_sequence(value: &Value) -> Result<SequenceNode> {
    let shape = Shape::new(NodeKind::Sequence, value)?;
    shape.check_recognized(&["@id", "@type", "label", "canvases"])?;
    let id = shape.require_str("@id")?;
    let label = shape.require_str("label")?;
    let canvases = shape.require_array("canvases")?.to_vec();

    Ok(SequenceNode { id, label, canvases })
}

fn uri_list(shape: &Shape<'_>, field: &str) -> Result<Vec<String>> {
    let items = shape.optional_array(field)?;
    let mut uris = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let uri = item.as_str().ok_or_else(|| {
            shape.invalid(
                &format!("{}[{}]", field, index),
                format!("expected a URI string, got {}", item),
            )
        })?;
        uris.push(uri.to_string());
    }
    Ok(uris)
}

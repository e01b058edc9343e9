//! Schema to relational view compiler.
//!
//! [`compile`] turns a [`RootSchema`] into a [`ViewPlan`]: one tree of
//! [`ViewPlanNode`]s per document type. The plan does not assume any SQL
//! dialect; a warehouse adapter renders and executes it.
//!
//! Every view reads the `LATEST` projection filtered by document type. Nested
//! RECORD fields become child views named `<parent>_<field>`. RECORD LIST
//! fields become child views that expand the list into one row per item.
//! Lists inside lists are not supported and are compiled out.

use crate::document::FIELD_DOCUMENT_ID;
use crate::schema::{DocumentSchema, FieldMetadata, FieldType, RootSchema};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Name of the synthetic per-item identifier column of list views.
pub const LISTITEM_ID: &str = "LISTITEM_ID";

/// Where a JSON path starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PathRoot {
    /// The document payload
    Data,
    /// The current item of a list expansion
    Item,
}

/// A path of field names into a JSON payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct JsonPath {
    root: PathRoot,
    segments: Vec<String>,
}

impl JsonPath {
    /// Path to the document payload itself.
    pub fn data() -> Self {
        Self {
            root: PathRoot::Data,
            segments: Vec::new(),
        }
    }

    /// Path to the current list item itself.
    pub fn item() -> Self {
        Self {
            root: PathRoot::Item,
            segments: Vec::new(),
        }
    }

    /// Path one field deeper.
    pub fn child(&self, field: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(field.into());
        Self {
            root: self.root,
            segments,
        }
    }

    /// Starting point of the path.
    pub fn root(&self) -> PathRoot {
        self.root
    }

    /// Field names, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self.root {
            PathRoot::Data => "data",
            PathRoot::Item => "item",
        })?;
        for segment in &self.segments {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

/// Target type of a projected column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Coercion {
    /// Text
    Text,
    /// Integer
    Integer,
    /// Decimal
    Decimal,
    /// Boolean; the physical representation is up to the adapter
    Boolean,
    /// Date/time
    DateTime,
}

impl Coercion {
    /// Coercion for a scalar field type, `None` for everything else.
    pub fn for_field_type(field_type: &FieldType) -> Option<Self> {
        match field_type {
            FieldType::Text | FieldType::Guid | FieldType::Uwi => Some(Coercion::Text),
            FieldType::Integer => Some(Coercion::Integer),
            FieldType::Decimal => Some(Coercion::Decimal),
            FieldType::Boolean => Some(Coercion::Boolean),
            FieldType::DateTime => Some(Coercion::DateTime),
            FieldType::Document
            | FieldType::Record
            | FieldType::RecordList
            | FieldType::Unknown(_) => None,
        }
    }
}

/// Envelope columns exposed by root views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EnvelopeColumn {
    /// Deleted flag
    Deleted,
    /// Author id
    Author,
    /// Document version
    Version,
    /// Document date
    Date,
}

impl EnvelopeColumn {
    /// All envelope columns in output order.
    pub const ALL: [EnvelopeColumn; 4] = [
        EnvelopeColumn::Deleted,
        EnvelopeColumn::Author,
        EnvelopeColumn::Version,
        EnvelopeColumn::Date,
    ];

    /// Output column name.
    pub fn column_name(&self) -> &'static str {
        match self {
            EnvelopeColumn::Deleted => "_DELETED",
            EnvelopeColumn::Author => "_AUTHOR",
            EnvelopeColumn::Version => "_VERSION",
            EnvelopeColumn::Date => "_DATE",
        }
    }
}

/// Where a projected column reads its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ColumnSource {
    /// Id of the owning document, from the stored row
    DocumentId,
    /// Envelope attribute, from the stored row
    Envelope(EnvelopeColumn),
    /// Value inside the payload or the current list item
    Payload(JsonPath),
}

/// One output column of a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectionColumn {
    /// Output column name
    pub name: String,
    /// Where the value comes from
    pub source: ColumnSource,
    /// Target type
    pub coercion: Coercion,
    /// Referenced document type, for DOCUMENT fields
    pub references: Option<String>,
}

impl ProjectionColumn {
    fn new(name: impl Into<String>, source: ColumnSource, coercion: Coercion) -> Self {
        Self {
            name: name.into(),
            source,
            coercion,
            references: None,
        }
    }
}

/// Marks a view that produces one row per element of a payload list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListExpansion {
    /// Path of the list being flattened
    pub path: JsonPath,
    /// Column identifying each item
    pub item_id_column: String,
}

/// Which stored chunks a view reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChunkFilter {
    /// Only chunk 0, the base record
    BaseOnly,
    /// Every chunk; used by list views so chunked lists reassemble
    All,
}

/// One relational view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewPlanNode {
    /// View name
    pub name: String,
    /// Document type the view selects
    pub doc_type: String,
    /// Enclosing view, `None` for root views
    pub parent: Option<String>,
    /// Output columns in order
    pub columns: Vec<ProjectionColumn>,
    /// Set when the view expands a list
    pub list_expansion: Option<ListExpansion>,
    /// Chunks the view reads
    pub chunk_filter: ChunkFilter,
    /// Views for nested RECORD / RECORD LIST fields
    pub children: Vec<ViewPlanNode>,
}

impl ViewPlanNode {
    /// Whether this is the view of a whole document type.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Look up an output column by name.
    pub fn column(&self, name: &str) -> Option<&ProjectionColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up a direct child view by name.
    pub fn child(&self, name: &str) -> Option<&ViewPlanNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// This node and all of its descendants, parents before children.
    pub fn walk(&self) -> Vec<&ViewPlanNode> {
        let mut nodes = vec![self];
        for child in &self.children {
            nodes.extend(child.walk());
        }
        nodes
    }
}

/// Non-fatal problem found while compiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Diagnostic {
    /// Field of a type the compiler cannot project
    UnknownFieldType {
        /// View being compiled
        view: String,
        /// Offending field
        field: String,
        /// Declared type name
        field_type: String,
    },
    /// RECORD LIST inside a list expansion
    NestedList {
        /// View being compiled
        view: String,
        /// Offending field
        field: String,
    },
    /// RECORD / RECORD LIST without a nested schema
    MissingRecordType {
        /// View being compiled
        view: String,
        /// Offending field
        field: String,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UnknownFieldType {
                view,
                field,
                field_type,
            } => write!(f, "skipping {view}:{field} of unknown type {field_type}"),
            Diagnostic::NestedList { view, field } => {
                write!(f, "skipping {view}:{field}, lists inside lists are not supported")
            }
            Diagnostic::MissingRecordType { view, field } => {
                write!(f, "skipping {view}:{field}, no nested schema")
            }
        }
    }
}

/// Compiler output: view trees per document type plus diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViewPlan {
    /// Root views, one per document type, ordered by type name
    pub roots: Vec<ViewPlanNode>,
    /// Fields that were compiled out
    pub diagnostics: Vec<Diagnostic>,
}

impl ViewPlan {
    /// Every view, parents before children.
    pub fn nodes(&self) -> Vec<&ViewPlanNode> {
        self.roots.iter().flat_map(ViewPlanNode::walk).collect()
    }

    /// Look up any view by name.
    pub fn find(&self, name: &str) -> Option<&ViewPlanNode> {
        self.nodes().into_iter().find(|n| n.name == name)
    }

    /// Total number of views.
    pub fn view_count(&self) -> usize {
        self.nodes().len()
    }
}

/// Compile a root schema into a view plan.
pub fn compile(root: &RootSchema) -> ViewPlan {
    let mut diagnostics = Vec::new();
    let mut roots = Vec::with_capacity(root.len());

    for (doc_type, schema) in root.types() {
        info!(doc_type = %doc_type, "Compiling helper view");
        let scope = Scope {
            doc_type,
            view: doc_type.clone(),
            parent: None,
            path: JsonPath::data(),
            list: None,
        };
        roots.push(compile_node(scope, schema, &mut diagnostics));
    }

    for diagnostic in &diagnostics {
        warn!(%diagnostic, "View field compiled out");
    }

    ViewPlan { roots, diagnostics }
}

/// Recursion state for one view.
struct Scope<'a> {
    doc_type: &'a str,
    view: String,
    parent: Option<String>,
    path: JsonPath,
    list: Option<ListExpansion>,
}

fn compile_node(scope: Scope<'_>, schema: &DocumentSchema, diagnostics: &mut Vec<Diagnostic>) -> ViewPlanNode {
    let mut columns = vec![ProjectionColumn::new(
        FIELD_DOCUMENT_ID,
        ColumnSource::DocumentId,
        Coercion::Text,
    )];

    if scope.list.is_some() {
        columns.push(ProjectionColumn::new(
            LISTITEM_ID,
            ColumnSource::Payload(JsonPath::item().child(LISTITEM_ID)),
            Coercion::Text,
        ));
    }

    if scope.parent.is_none() {
        columns.extend(EnvelopeColumn::ALL.iter().map(|&col| {
            let coercion = match col {
                EnvelopeColumn::Deleted => Coercion::Boolean,
                EnvelopeColumn::Version => Coercion::Integer,
                EnvelopeColumn::Author | EnvelopeColumn::Date => Coercion::Text,
            };
            ProjectionColumn::new(col.column_name(), ColumnSource::Envelope(col), coercion)
        }));
    }

    let mut children = Vec::new();

    for (field, meta) in schema.fields() {
        if !meta.active || field == FIELD_DOCUMENT_ID || field == LISTITEM_ID {
            continue;
        }

        match &meta.field_type {
            FieldType::Text
            | FieldType::Guid
            | FieldType::Uwi
            | FieldType::Integer
            | FieldType::Decimal
            | FieldType::Boolean
            | FieldType::DateTime => {
                if let Some(coercion) = Coercion::for_field_type(&meta.field_type) {
                    columns.push(ProjectionColumn::new(
                        field.as_str(),
                        ColumnSource::Payload(scope.path.child(field.as_str())),
                        coercion,
                    ));
                }
            }
            FieldType::Document => {
                let mut column = ProjectionColumn::new(
                    field.as_str(),
                    ColumnSource::Payload(scope.path.child(field.as_str()).child(FIELD_DOCUMENT_ID)),
                    Coercion::Text,
                );
                column.references = meta.document_type.clone();
                columns.push(column);
            }
            FieldType::Record => {
                let Some(nested) = nested_schema(&scope, field, meta, diagnostics) else {
                    continue;
                };
                let child = Scope {
                    doc_type: scope.doc_type,
                    view: format!("{}_{}", scope.view, field),
                    parent: Some(scope.view.clone()),
                    path: scope.path.child(field.as_str()),
                    list: scope.list.clone(),
                };
                children.push(compile_node(child, nested, diagnostics));
            }
            FieldType::RecordList => {
                if scope.list.is_some() {
                    diagnostics.push(Diagnostic::NestedList {
                        view: scope.view.clone(),
                        field: field.clone(),
                    });
                    continue;
                }
                let Some(nested) = nested_schema(&scope, field, meta, diagnostics) else {
                    continue;
                };
                let child = Scope {
                    doc_type: scope.doc_type,
                    view: format!("{}_{}", scope.view, field),
                    parent: Some(scope.view.clone()),
                    path: JsonPath::item(),
                    list: Some(ListExpansion {
                        path: scope.path.child(field.as_str()),
                        item_id_column: LISTITEM_ID.to_string(),
                    }),
                };
                children.push(compile_node(child, nested, diagnostics));
            }
            FieldType::Unknown(type_name) => {
                diagnostics.push(Diagnostic::UnknownFieldType {
                    view: scope.view.clone(),
                    field: field.clone(),
                    field_type: type_name.clone(),
                });
            }
        }
    }

    let chunk_filter = if scope.list.is_some() {
        ChunkFilter::All
    } else {
        ChunkFilter::BaseOnly
    };

    debug!(view = %scope.view, columns = columns.len(), children = children.len(), "Compiled view");

    ViewPlanNode {
        name: scope.view,
        doc_type: scope.doc_type.to_string(),
        parent: scope.parent,
        columns,
        list_expansion: scope.list,
        chunk_filter,
        children,
    }
}

fn nested_schema<'s>(
    scope: &Scope<'_>,
    field: &str,
    meta: &'s FieldMetadata,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<&'s DocumentSchema> {
    if meta.record_type.is_none() {
        diagnostics.push(Diagnostic::MissingRecordType {
            view: scope.view.clone(),
            field: field.to_string(),
        });
    }
    meta.record_type.as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, field_type: FieldType) -> FieldMetadata {
        FieldMetadata::new(name, field_type)
    }

    fn well_schema() -> RootSchema {
        let casing = DocumentSchema::new()
            .with_field(field("LISTITEM_ID", FieldType::Guid))
            .with_field(field("DEPTH", FieldType::Decimal))
            .with_field(
                field("GRADE", FieldType::Record).with_record_type(
                    DocumentSchema::new().with_field(field("CODE", FieldType::Text)),
                ),
            )
            .with_field(
                field("JOINTS", FieldType::RecordList).with_record_type(
                    DocumentSchema::new().with_field(field("LENGTH", FieldType::Decimal)),
                ),
            );

        let well = DocumentSchema::new()
            .with_field(field("DOCUMENT_ID", FieldType::Guid))
            .with_field(field("NAME", FieldType::Text))
            .with_field(field("SPUD", FieldType::DateTime))
            .with_field(field("ACTIVE_FLAG", FieldType::Boolean))
            .with_field(field("LEGACY", FieldType::Text).active(false))
            .with_field(field("OPERATOR", FieldType::Document).with_document_type("Company"))
            .with_field(field("SHAPE", FieldType::Unknown("GEOMETRY".into())))
            .with_field(
                field("LOCATION", FieldType::Record).with_record_type(
                    DocumentSchema::new()
                        .with_field(field("LAT", FieldType::Decimal))
                        .with_field(field("LON", FieldType::Decimal)),
                ),
            )
            .with_field(field("CASINGS", FieldType::RecordList).with_record_type(casing));

        RootSchema::new().with_type("Well", well)
    }

    fn names(node: &ViewPlanNode) -> Vec<&str> {
        node.columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_root_view_columns() {
        let plan = compile(&well_schema());
        let well = plan.find("Well").unwrap();

        assert!(well.is_root());
        assert_eq!(well.chunk_filter, ChunkFilter::BaseOnly);
        assert_eq!(
            names(well),
            [
                "DOCUMENT_ID",
                "_DELETED",
                "_AUTHOR",
                "_VERSION",
                "_DATE",
                "ACTIVE_FLAG",
                "NAME",
                "OPERATOR",
                "SPUD"
            ]
        );
        assert_eq!(well.column("SPUD").unwrap().coercion, Coercion::DateTime);
        assert_eq!(well.column("ACTIVE_FLAG").unwrap().coercion, Coercion::Boolean);
    }

    #[test]
    fn test_inactive_fields_dropped() {
        let plan = compile(&well_schema());
        assert!(plan.find("Well").unwrap().column("LEGACY").is_none());
    }

    #[test]
    fn test_document_field_is_foreign_key() {
        let plan = compile(&well_schema());
        let operator = plan.find("Well").unwrap().column("OPERATOR").unwrap();

        assert_eq!(operator.references.as_deref(), Some("Company"));
        assert_eq!(
            operator.source,
            ColumnSource::Payload(JsonPath::data().child("OPERATOR").child("DOCUMENT_ID"))
        );
    }

    #[test]
    fn test_record_child_exposes_nested_fields() {
        let schema = RootSchema::new().with_type(
            "Well",
            DocumentSchema::new().with_field(
                field("CHILD", FieldType::Record).with_record_type(
                    DocumentSchema::new().with_field(field("NAME", FieldType::Text)),
                ),
            ),
        );
        let plan = compile(&schema);
        let child = plan.find("Well_CHILD").unwrap();

        assert_eq!(child.parent.as_deref(), Some("Well"));
        assert!(child.list_expansion.is_none());
        assert_eq!(child.chunk_filter, ChunkFilter::BaseOnly);
        assert_eq!(names(child), ["DOCUMENT_ID", "NAME"]);
        assert_eq!(
            child.column("NAME").unwrap().source,
            ColumnSource::Payload(JsonPath::data().child("CHILD").child("NAME"))
        );
    }

    #[test]
    fn test_list_in_list_is_compiled_out() {
        let schema = RootSchema::new().with_type(
            "Well",
            DocumentSchema::new().with_field(
                field("CHILD", FieldType::RecordList).with_record_type(
                    DocumentSchema::new()
                        .with_field(field("NAME", FieldType::Text))
                        .with_field(
                            field("GRANDCHILD", FieldType::RecordList).with_record_type(
                                DocumentSchema::new().with_field(field("X", FieldType::Integer)),
                            ),
                        ),
                ),
            ),
        );
        let plan = compile(&schema);

        assert!(plan.find("Well_CHILD").is_some());
        assert!(plan.find("Well_CHILD_GRANDCHILD").is_none());
        assert_eq!(plan.view_count(), 2);
        assert_eq!(
            plan.diagnostics,
            vec![Diagnostic::NestedList {
                view: "Well_CHILD".into(),
                field: "GRANDCHILD".into()
            }]
        );
    }

    #[test]
    fn test_list_view_expands_items() {
        let plan = compile(&well_schema());
        let casings = plan.find("Well_CASINGS").unwrap();

        let expansion = casings.list_expansion.as_ref().unwrap();
        assert_eq!(expansion.path, JsonPath::data().child("CASINGS"));
        assert_eq!(casings.chunk_filter, ChunkFilter::All);
        assert_eq!(names(casings), ["DOCUMENT_ID", "LISTITEM_ID", "DEPTH"]);
        assert_eq!(
            casings.column("DEPTH").unwrap().source,
            ColumnSource::Payload(JsonPath::item().child("DEPTH"))
        );
    }

    #[test]
    fn test_record_inside_list_keeps_expansion() {
        let plan = compile(&well_schema());
        let grade = plan.find("Well_CASINGS_GRADE").unwrap();

        assert_eq!(grade.parent.as_deref(), Some("Well_CASINGS"));
        assert_eq!(
            grade.list_expansion.as_ref().unwrap().path,
            JsonPath::data().child("CASINGS")
        );
        assert_eq!(names(grade), ["DOCUMENT_ID", "LISTITEM_ID", "CODE"]);
        assert_eq!(
            grade.column("CODE").unwrap().source,
            ColumnSource::Payload(JsonPath::item().child("GRADE").child("CODE"))
        );
    }

    #[test]
    fn test_unknown_type_is_diagnosed() {
        let plan = compile(&well_schema());

        assert!(plan.find("Well").unwrap().column("SHAPE").is_none());
        assert!(plan.diagnostics.contains(&Diagnostic::UnknownFieldType {
            view: "Well".into(),
            field: "SHAPE".into(),
            field_type: "GEOMETRY".into()
        }));
    }

    #[test]
    fn test_envelope_only_on_root() {
        let plan = compile(&well_schema());
        for node in plan.nodes() {
            assert_eq!(node.column("_DELETED").is_some(), node.is_root(), "{}", node.name);
        }
    }

    #[test]
    fn test_views_are_ordered_parents_first() {
        let plan = compile(&well_schema());
        let order: Vec<&str> = plan.nodes().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(
            order,
            ["Well", "Well_CASINGS", "Well_CASINGS_GRADE", "Well_LOCATION"]
        );
    }

    #[test]
    fn test_json_path_display() {
        assert_eq!(JsonPath::data().child("A").child("B").to_string(), "data.A.B");
        assert_eq!(JsonPath::item().child("X").to_string(), "item.X");
    }
}

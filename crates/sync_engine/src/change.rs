//! The unit sync operates on: one side's claim about what happened to a
//! document (§3 Change, §4.D).
use common::sync_types::now_ms;
use value::{
    ConvexObject,
    DocumentId,
    TableName,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One side's (local or server) claim about a document. `base_fields` is
/// only meaningful for local changes: "the document state the client
/// believed was authoritative" when it made the change, used to compute
/// the version gap and the `stale` flag (§3).
#[derive(Clone, Debug)]
pub struct Change {
    pub change_id: String,
    pub document_id: DocumentId,
    pub table: TableName,
    pub kind: ChangeKind,
    pub fields: ConvexObject,
    pub base_fields: Option<ConvexObject>,
    pub version: i64,
    pub timestamp: i64,
}

impl Change {
    pub fn new(
        document_id: DocumentId,
        table: TableName,
        kind: ChangeKind,
        fields: ConvexObject,
        version: i64,
    ) -> Self {
        Self {
            change_id: format!("{document_id}:{version}"),
            document_id,
            table,
            kind,
            fields,
            base_fields: None,
            version,
            timestamp: now_ms(),
        }
    }

    pub fn with_base_fields(mut self, base_fields: ConvexObject) -> Self {
        self.base_fields = Some(base_fields);
        self
    }
}

/// The outcome of resolving a conflict (or of the field-conflict
/// auto-merge path), ready to be applied through `database::DocumentStore`
/// (§4.D resolution strategies).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedChange {
    pub kind: ChangeKind,
    pub fields: ConvexObject,
    pub version: i64,
}


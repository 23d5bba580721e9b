//! Table schema and migration descriptors (§3, §4.A `apply_schema`/
//! `apply_migration`).
use std::collections::BTreeMap;

use serde::{
    Deserialize,
    Serialize,
};
use value::{
    FieldValidator,
    TableName,
};

use crate::index::IndexDescriptor;

/// The field definitions and indexes declared for one table. A table with
/// no entry in a [`SchemaDescriptor`] is schemaless: any document shape is
/// accepted until a schema is explicitly applied (§4.A [SUPPLEMENT]).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: BTreeMap<String, FieldValidator>,
    pub indexes: Vec<IndexDescriptor>,
}

/// A complete schema: every declared table's definition, keyed by table
/// name. Content-hashed on `apply_schema` (§3 invariant: "every applied
/// schema has a content-hash recorded").
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub tables: BTreeMap<TableName, TableSchema>,
}

impl SchemaDescriptor {
    /// Canonical JSON text used both to content-hash the schema (§3) and to
    /// compare two schemas for `apply_schema`'s no-op-if-identical rule
    /// (§8 "apply_schema with identical schema is a no-op with the same
    /// content hash").
    pub fn canonical_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn content_hash(&self) -> anyhow::Result<String> {
        Ok(crate::sha256::hex_digest(self.canonical_json()?.as_bytes()))
    }
}

/// One step of a migration plan (§4.A `apply_migration`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum MigrationOp {
    AddColumn {
        table: TableName,
        field: String,
        validator: FieldValidator,
    },
    DropColumn {
        table: TableName,
        field: String,
    },
    CreateTable {
        table: TableName,
    },
    DropTable {
        table: TableName,
    },
    CreateIndex {
        table: TableName,
        index: IndexDescriptor,
    },
    DropIndex {
        table: TableName,
        index_name: String,
    },
}

/// A migration request: `apply_migration` asserts `from_version ==
/// current` (and, if given, `expected_hash == current_hash`) before
/// executing `ops` atomically and bumping the version by one (§4.A,
/// §8 scenario 5).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub from_version: i64,
    pub expected_hash: Option<String>,
    pub ops: Vec<MigrationOp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_schemas_hash_identically() {
        let schema = SchemaDescriptor::default();
        assert_eq!(schema.content_hash().unwrap(), schema.content_hash().unwrap());
    }

    #[test]
    fn distinct_schemas_hash_differently() {
        let empty = SchemaDescriptor::default();
        let mut tables = BTreeMap::new();
        tables.insert("messages".parse().unwrap(), TableSchema::default());
        let with_table = SchemaDescriptor { tables };
        assert_ne!(empty.content_hash().unwrap(), with_table.content_hash().unwrap());
    }
}

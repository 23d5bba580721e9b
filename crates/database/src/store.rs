//! [`DocumentStore`]: validated, transactional document storage with
//! schema versioning, indexed queries, and system tables (§4.A).
use std::{
    collections::HashMap,
    path::Path,
    sync::Arc,
};

use common::{
    query::QuerySpec,
    schema::{
        MigrationOp,
        MigrationPlan,
        SchemaDescriptor,
        TableSchema,
    },
    sync_types::now_ms,
};
use errors::ErrorMetadata;
use parking_lot::Mutex;
use rusqlite::{
    params,
    Connection,
    OptionalExtension,
};
use tokio::sync::broadcast;
use value::{
    check_valid_table_name,
    is_reserved_table_name,
    ConvexObject,
    ConvexValue,
    Document,
    DocumentId,
    TableName,
    Validator,
    CREATION_TIME_FIELD,
    ID_FIELD,
};

use crate::{
    persistence,
    query_translate,
};

/// Emitted on every committed write (§3 Ownership: "DocumentStore emits a
/// commit event consumed by InvalidationBus"). `InvalidationBus` itself is
/// the pure `database::invalidation` module; this is just the payload.
#[derive(Clone, Debug)]
pub struct CommitEvent {
    pub table: TableName,
    pub changed_ids: Vec<DocumentId>,
}

struct LockedState {
    conn: Connection,
    table_numbers: HashMap<TableName, u16>,
    next_table_number: u16,
    schemas: HashMap<TableName, TableSchema>,
    schema_version: i64,
    schema_hash: String,
}

/// Single-writer-per-shard storage (§5): every mutating operation takes
/// the same lock for its whole transaction, so writes on one shard are
/// linearizable and commit -> invalidation publication is atomic.
#[derive(Clone)]
pub struct DocumentStore {
    state: Arc<Mutex<LockedState>>,
    commit_tx: broadcast::Sender<CommitEvent>,
}

impl DocumentStore {
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        persistence::bootstrap(&conn)?;
        let (table_numbers, next_table_number) = load_table_numbers(&conn)?;
        let (schemas, schema_version, schema_hash) = load_schema_state(&conn)?;
        let (commit_tx, _rx) = broadcast::channel(4096);
        Ok(Self {
            state: Arc::new(Mutex::new(LockedState {
                conn,
                table_numbers,
                next_table_number,
                schemas,
                schema_version,
                schema_hash,
            })),
            commit_tx,
        })
    }

    /// A receiver fed every [`CommitEvent`] (§4.B); `sync::SubscriptionHub`
    /// drives `on_write` from this.
    pub fn subscribe_commits(&self) -> broadcast::Receiver<CommitEvent> {
        self.commit_tx.subscribe()
    }

    pub fn schema_version(&self) -> i64 {
        self.state.lock().schema_version
    }

    pub fn schema_hash(&self) -> String {
        self.state.lock().schema_hash.clone()
    }

    pub fn list_tables(&self) -> Vec<TableName> {
        self.state.lock().table_numbers.keys().cloned().collect()
    }

    pub fn document_count(&self, table: &TableName) -> anyhow::Result<u64> {
        let state = self.state.lock();
        if !table_exists(&state.conn, table.as_str())? {
            return Ok(0);
        }
        let count: i64 = state.conn.query_row(
            &format!(r#"SELECT COUNT(*) FROM "{}""#, table.as_str()),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn insert(&self, table: &TableName, fields: ConvexObject) -> anyhow::Result<DocumentId> {
        self.with_transaction(|txn| txn.insert(table, fields))
    }

    pub fn get(&self, table: &TableName, id: &DocumentId) -> anyhow::Result<Option<Document>> {
        let state = self.state.lock();
        get_document(&state.conn, table, id)
    }

    pub fn patch(&self, table: &TableName, id: &DocumentId, patch_fields: ConvexObject) -> anyhow::Result<Document> {
        self.with_transaction(|txn| txn.patch(table, id, patch_fields))
    }

    pub fn replace(&self, table: &TableName, id: &DocumentId, fields: ConvexObject) -> anyhow::Result<Document> {
        self.with_transaction(|txn| txn.replace(table, id, fields))
    }

    pub fn delete(&self, table: &TableName, id: &DocumentId) -> anyhow::Result<()> {
        self.with_transaction(|txn| txn.delete(table, id))
    }

    pub fn query(&self, spec: &QuerySpec) -> anyhow::Result<Vec<Document>> {
        let state = self.state.lock();
        run_query(&state.conn, spec)
    }

    /// Runs `f` against a [`Transaction`] under the shard's write lock.
    /// All-or-nothing: an `Err` return rolls back and never publishes
    /// invalidation; `Ok` commits and publishes every accumulated
    /// [`CommitEvent`] (§5 Transactions).
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Transaction) -> anyhow::Result<T>) -> anyhow::Result<T> {
        self.with_transaction(f)
    }

    fn with_transaction<T>(&self, f: impl FnOnce(&mut Transaction) -> anyhow::Result<T>) -> anyhow::Result<T> {
        let mut state = self.state.lock();
        // `ensure_table` mutates the in-memory table-number cache ahead of
        // `COMMIT` (it needs the number to generate ids); snapshot it so a
        // rollback can undo those mutations along with the SQL (§5: "writes
        // that fail do not mutate state").
        let table_numbers_snapshot = state.table_numbers.clone();
        let next_table_number_snapshot = state.next_table_number;
        state.conn.execute_batch("BEGIN IMMEDIATE")?;
        let (result, events) = {
            let mut txn = Transaction {
                state: &mut *state,
                events: Vec::new(),
            };
            let result = f(&mut txn);
            let events = std::mem::take(&mut txn.events);
            (result, events)
        };
        match result {
            Ok(value) => {
                state.conn.execute_batch("COMMIT")?;
                drop(state);
                for event in events {
                    let _ = self.commit_tx.send(event);
                }
                Ok(value)
            },
            Err(e) => {
                let _ = state.conn.execute_batch("ROLLBACK");
                state.table_numbers = table_numbers_snapshot;
                state.next_table_number = next_table_number_snapshot;
                Err(e)
            },
        }
    }

    pub fn apply_schema(&self, schema: SchemaDescriptor) -> anyhow::Result<i64> {
        let new_hash = schema.content_hash()?;
        let mut state = self.state.lock();
        if new_hash == state.schema_hash {
            // §8: applying an identical schema is a no-op with the same hash.
            return Ok(state.schema_version);
        }
        for table in schema.tables.keys() {
            if is_reserved_table_name(table.as_str()) {
                anyhow::bail!(ErrorMetadata::reserved_table(table));
            }
        }
        state.conn.execute_batch("BEGIN IMMEDIATE")?;
        let next_version = state.schema_version + 1;
        let write = state.conn.execute(
            "INSERT INTO _schema_versions (version, applied_at, schema_hash) VALUES (?1, ?2, ?3)",
            params![next_version, now_ms(), new_hash],
        );
        if let Err(e) = write {
            let _ = state.conn.execute_batch("ROLLBACK");
            return Err(e.into());
        }
        let serialized = serde_json::to_string(&schema)?;
        if let Err(e) = state.conn.execute(
            "INSERT INTO _metadata (key, value) VALUES ('schema', ?1) ON CONFLICT(key) DO UPDATE SET value = ?1",
            params![serialized],
        ) {
            let _ = state.conn.execute_batch("ROLLBACK");
            return Err(e.into());
        }
        state.conn.execute_batch("COMMIT")?;
        state.schema_version = next_version;
        state.schema_hash = new_hash;
        state.schemas = schema.tables;
        Ok(next_version)
    }

    pub fn apply_migration(&self, plan: MigrationPlan) -> anyhow::Result<i64> {
        let mut state = self.state.lock();
        if plan.from_version != state.schema_version {
            anyhow::bail!(ErrorMetadata::version_conflict(plan.from_version, state.schema_version));
        }
        if let Some(expected) = &plan.expected_hash {
            if *expected != state.schema_hash {
                anyhow::bail!(ErrorMetadata::schema_hash_mismatch());
            }
        }
        state.conn.execute_batch("BEGIN IMMEDIATE")?;
        if let Err(e) = apply_migration_ops(&state.conn, &plan.ops, &mut state.schemas) {
            let _ = state.conn.execute_batch("ROLLBACK");
            return Err(e);
        }
        let next_version = state.schema_version + 1;
        let schema = SchemaDescriptor {
            tables: state.schemas.clone(),
        };
        let hash = match schema.content_hash() {
            Ok(h) => h,
            Err(e) => {
                let _ = state.conn.execute_batch("ROLLBACK");
                return Err(e);
            },
        };
        if let Err(e) = state.conn.execute(
            "INSERT INTO _schema_versions (version, applied_at, schema_hash) VALUES (?1, ?2, ?3)",
            params![next_version, now_ms(), hash],
        ) {
            let _ = state.conn.execute_batch("ROLLBACK");
            return Err(e.into());
        }
        let serialized = serde_json::to_string(&schema)?;
        if let Err(e) = state.conn.execute(
            "INSERT INTO _metadata (key, value) VALUES ('schema', ?1) ON CONFLICT(key) DO UPDATE SET value = ?1",
            params![serialized],
        ) {
            let _ = state.conn.execute_batch("ROLLBACK");
            return Err(e.into());
        }
        state.conn.execute_batch("COMMIT")?;
        state.schema_version = next_version;
        state.schema_hash = hash;
        Ok(next_version)
    }
}

fn apply_migration_ops(
    conn: &Connection,
    ops: &[MigrationOp],
    schemas: &mut HashMap<TableName, TableSchema>,
) -> anyhow::Result<()> {
    for op in ops {
        match op {
            MigrationOp::CreateTable { table } => {
                if is_reserved_table_name(table.as_str()) {
                    anyhow::bail!(ErrorMetadata::reserved_table(table));
                }
                conn.execute_batch(&persistence::create_user_table_sql(table.as_str()))?;
                schemas.entry(table.clone()).or_default();
            },
            MigrationOp::DropTable { table } => {
                conn.execute_batch(&persistence::drop_table_sql(table.as_str()))?;
                schemas.remove(table);
            },
            MigrationOp::AddColumn { table, field, validator } => {
                let schema = schemas.entry(table.clone()).or_default();
                schema.fields.insert(field.clone(), validator.clone());
            },
            MigrationOp::DropColumn { table, field } => {
                if let Some(schema) = schemas.get_mut(table) {
                    schema.fields.remove(field);
                }
            },
            MigrationOp::CreateIndex { table, index } => {
                let columns: Vec<String> = index.fields.iter().map(|f| json_path_column(f.as_str())).collect();
                conn.execute_batch(&persistence::create_index_sql(table.as_str(), &index.name, &columns, index.unique))?;
                schemas.entry(table.clone()).or_default().indexes.push(index.clone());
            },
            MigrationOp::DropIndex { table, index_name } => {
                conn.execute_batch(&persistence::drop_index_sql(index_name))?;
                if let Some(schema) = schemas.get_mut(table) {
                    schema.indexes.retain(|i| &i.name != index_name);
                }
            },
        }
    }
    Ok(())
}

fn json_path_column(field: &str) -> String {
    if field == ID_FIELD {
        "id".to_string()
    } else if field == CREATION_TIME_FIELD {
        "creation_time".to_string()
    } else {
        format!("json_extract(data, '$.{field}')")
    }
}

/// A handle to one in-flight, not-yet-committed write (§5 Transactions).
/// Operations performed through a `Transaction` -- including ones composed
/// from within a single `DocumentStore::transaction(..)` callback -- share
/// one underlying SQL transaction; there's no separate nested `BEGIN`, so
/// composition naturally flattens (§5: "Nested transactions are
/// flattened").
pub struct Transaction<'a> {
    state: &'a mut LockedState,
    events: Vec<CommitEvent>,
}

impl<'a> Transaction<'a> {
    pub fn insert(&mut self, table: &TableName, fields: ConvexObject) -> anyhow::Result<DocumentId> {
        if is_reserved_table_name(table.as_str()) {
            anyhow::bail!(ErrorMetadata::reserved_table(table));
        }
        check_valid_table_name(table.as_str())?;
        if let Some(schema) = self.state.schemas.get(table) {
            validate_against_schema(&self.state.conn, schema, &fields)?;
        }
        let table_number = ensure_table(self.state, table)?;
        let id = DocumentId::generate(table_number);
        let creation_time = now_ms();
        let data = serde_json::to_string(&Document {
            id,
            creation_time,
            fields,
        }.fields_json())?;
        self.state.conn.execute(
            &format!(r#"INSERT INTO "{}" (id, creation_time, data) VALUES (?1, ?2, ?3)"#, table.as_str()),
            params![id.encode(), creation_time, data],
        )?;
        self.state.conn.execute(
            r#"INSERT INTO _documents (id, "table", creation_time) VALUES (?1, ?2, ?3)"#,
            params![id.encode(), table.as_str(), creation_time],
        )?;
        self.events.push(CommitEvent {
            table: table.clone(),
            changed_ids: vec![id],
        });
        Ok(id)
    }

    pub fn get(&self, table: &TableName, id: &DocumentId) -> anyhow::Result<Option<Document>> {
        get_document(&self.state.conn, table, id)
    }

    pub fn patch(&mut self, table: &TableName, id: &DocumentId, patch_fields: ConvexObject) -> anyhow::Result<Document> {
        for (name, _) in patch_fields.iter() {
            if name.as_str() == ID_FIELD || name.as_str() == CREATION_TIME_FIELD {
                anyhow::bail!(ErrorMetadata::immutable_field(name));
            }
        }
        let existing = get_document(&self.state.conn, table, id)?
            .ok_or_else(|| anyhow::Error::new(ErrorMetadata::not_found("DocumentNotFound", format!("no document {id} in table \"{table}\""))))?;
        let mut merged: std::collections::BTreeMap<_, _> = existing.fields.into_map();
        for (name, value) in patch_fields.into_map() {
            merged.insert(name, value);
        }
        let merged = ConvexObject::try_from(merged)?;
        if let Some(schema) = self.state.schemas.get(table) {
            validate_against_schema(&self.state.conn, schema, &merged)?;
        }
        let data = serde_json::to_string(&Document {
            id: *id,
            creation_time: existing.creation_time,
            fields: merged.clone(),
        }.fields_json())?;
        self.state.conn.execute(
            &format!(r#"UPDATE "{}" SET data = ?1 WHERE id = ?2"#, table.as_str()),
            params![data, id.encode()],
        )?;
        self.events.push(CommitEvent {
            table: table.clone(),
            changed_ids: vec![*id],
        });
        Ok(Document {
            id: *id,
            creation_time: existing.creation_time,
            fields: merged,
        })
    }

    pub fn replace(&mut self, table: &TableName, id: &DocumentId, fields: ConvexObject) -> anyhow::Result<Document> {
        let existing = get_document(&self.state.conn, table, id)?
            .ok_or_else(|| anyhow::Error::new(ErrorMetadata::not_found("DocumentNotFound", format!("no document {id} in table \"{table}\""))))?;
        if let Some(schema) = self.state.schemas.get(table) {
            validate_against_schema(&self.state.conn, schema, &fields)?;
        }
        let data = serde_json::to_string(&Document {
            id: *id,
            creation_time: existing.creation_time,
            fields: fields.clone(),
        }.fields_json())?;
        self.state.conn.execute(
            &format!(r#"UPDATE "{}" SET data = ?1 WHERE id = ?2"#, table.as_str()),
            params![data, id.encode()],
        )?;
        self.events.push(CommitEvent {
            table: table.clone(),
            changed_ids: vec![*id],
        });
        Ok(Document {
            id: *id,
            creation_time: existing.creation_time,
            fields,
        })
    }

    pub fn delete(&mut self, table: &TableName, id: &DocumentId) -> anyhow::Result<()> {
        if !table_exists(&self.state.conn, table.as_str())? {
            return Ok(());
        }
        let changed = self.state.conn.execute(
            &format!(r#"DELETE FROM "{}" WHERE id = ?1"#, table.as_str()),
            params![id.encode()],
        )?;
        self.state.conn.execute("DELETE FROM _documents WHERE id = ?1", params![id.encode()])?;
        if changed > 0 {
            self.events.push(CommitEvent {
                table: table.clone(),
                changed_ids: vec![*id],
            });
        }
        Ok(())
    }

    pub fn query(&self, spec: &QuerySpec) -> anyhow::Result<Vec<Document>> {
        run_query(&self.state.conn, spec)
    }
}

fn ensure_table(state: &mut LockedState, table: &TableName) -> anyhow::Result<u16> {
    if let Some(number) = state.table_numbers.get(table) {
        return Ok(*number);
    }
    let number = state.next_table_number;
    state.next_table_number = state.next_table_number.wrapping_add(1).max(1);
    state.conn.execute_batch(&persistence::create_user_table_sql(table.as_str()))?;
    state.table_numbers.insert(table.clone(), number);
    persist_table_numbers(&state.conn, &state.table_numbers, state.next_table_number)?;
    Ok(number)
}

fn persist_table_numbers(conn: &Connection, table_numbers: &HashMap<TableName, u16>, next: u16) -> anyhow::Result<()> {
    let names: Vec<&str> = table_numbers.keys().map(|t| t.as_str()).collect();
    let serialized = serde_json::json!({
        "tables": names,
        "table_numbers": table_numbers.iter().map(|(k, v)| (k.as_str().to_string(), *v)).collect::<HashMap<_, _>>(),
        "next_table_number": next,
    })
    .to_string();
    conn.execute(
        "INSERT INTO _metadata (key, value) VALUES ('tables', ?1) ON CONFLICT(key) DO UPDATE SET value = ?1",
        params![serialized],
    )?;
    Ok(())
}

fn load_table_numbers(conn: &Connection) -> anyhow::Result<(HashMap<TableName, u16>, u16)> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM _metadata WHERE key = 'tables'", [], |row| row.get(0))
        .optional()?;
    let Some(raw) = raw else {
        return Ok((HashMap::new(), 1));
    };
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let mut table_numbers = HashMap::new();
    if let Some(map) = parsed.get("table_numbers").and_then(|v| v.as_object()) {
        for (name, number) in map {
            table_numbers.insert(name.parse()?, number.as_u64().unwrap_or(0) as u16);
        }
    }
    let next = parsed.get("next_table_number").and_then(|v| v.as_u64()).unwrap_or(1) as u16;
    Ok((table_numbers, next))
}

fn load_schema_state(conn: &Connection) -> anyhow::Result<(HashMap<TableName, TableSchema>, i64, String)> {
    let version: i64 = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _schema_versions", [], |row| row.get(0))?;
    let raw: Option<String> = conn
        .query_row("SELECT value FROM _metadata WHERE key = 'schema'", [], |row| row.get(0))
        .optional()?;
    let Some(raw) = raw else {
        return Ok((HashMap::new(), version, SchemaDescriptor::default().content_hash()?));
    };
    let descriptor: SchemaDescriptor = serde_json::from_str(&raw)?;
    let hash = descriptor.content_hash()?;
    Ok((descriptor.tables, version, hash))
}

fn table_exists(conn: &Connection, table: &str) -> anyhow::Result<bool> {
    let exists: Option<String> = conn
        .query_row("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1", params![table], |row| row.get(0))
        .optional()?;
    Ok(exists.is_some())
}

fn get_document(conn: &Connection, table: &TableName, id: &DocumentId) -> anyhow::Result<Option<Document>> {
    if !table_exists(conn, table.as_str())? {
        return Ok(None);
    }
    let row: Option<(i64, String)> = conn
        .query_row(
            &format!(r#"SELECT creation_time, data FROM "{}" WHERE id = ?1"#, table.as_str()),
            params![id.encode()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((creation_time, data)) = row else {
        return Ok(None);
    };
    let fields = Document::fields_from_json(serde_json::from_str(&data)?)?;
    Ok(Some(Document {
        id: *id,
        creation_time,
        fields,
    }))
}

fn run_query(conn: &Connection, spec: &QuerySpec) -> anyhow::Result<Vec<Document>> {
    let Some(table) = &spec.table else {
        anyhow::bail!(ErrorMetadata::invalid_filter("query is missing a table"));
    };
    if !table_exists(conn, table.as_str())? {
        return Ok(Vec::new());
    }
    let translated = query_translate::translate(spec)?;
    let mut stmt = conn.prepare(&translated.sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(translated.params.iter()), |row| {
        let id: String = row.get(0)?;
        let creation_time: i64 = row.get(1)?;
        let data: String = row.get(2)?;
        Ok((id, creation_time, data))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (id, creation_time, data) = row?;
        let id = DocumentId::decode(&id).map_err(|e| anyhow::anyhow!("corrupt stored id: {e}"))?;
        let fields = Document::fields_from_json(serde_json::from_str(&data)?)?;
        out.push(Document { id, creation_time, fields });
    }
    Ok(out)
}

/// Shape validation plus the referential-integrity check (§3 invariant,
/// §4.A [SUPPLEMENT]): every `id(table)` value must denote a document that
/// exists in `table`, using the `_documents` shadow index.
fn validate_against_schema(conn: &Connection, schema: &TableSchema, fields: &ConvexObject) -> anyhow::Result<()> {
    let mut field_validators = std::collections::BTreeMap::new();
    for (name, validator) in &schema.fields {
        field_validators.insert(name.parse()?, validator.clone());
    }
    let object_validator = Validator::Object { fields: field_validators.clone() };
    object_validator.validate(&ConvexValue::Object(fields.clone()))?;
    for (name, field_validator) in &field_validators {
        if let Some(value) = fields.get(name.as_str()) {
            check_id_references(conn, &field_validator.validator, value)?;
        }
    }
    Ok(())
}

fn check_id_references(conn: &Connection, validator: &Validator, value: &ConvexValue) -> anyhow::Result<()> {
    match (validator, value) {
        (Validator::Id { table }, ConvexValue::Id(id)) => {
            if get_document(conn, table, id)?.is_none() {
                anyhow::bail!(ErrorMetadata::invalid_value(
                    "DanglingReference",
                    format!("id {id} does not reference an existing document in table \"{table}\""),
                ));
            }
            Ok(())
        },
        (Validator::Array { element }, ConvexValue::Array(items)) => {
            for item in items {
                check_id_references(conn, element, item)?;
            }
            Ok(())
        },
        (Validator::Object { fields: field_validators }, ConvexValue::Object(obj)) => {
            for (name, field_validator) in field_validators {
                if let Some(v) = obj.get(name.as_str()) {
                    check_id_references(conn, &field_validator.validator, v)?;
                }
            }
            Ok(())
        },
        (Validator::Union { variants }, v) => {
            // Validator::validate already determined which variant matches;
            // re-check references against the first structurally matching one.
            for variant in variants {
                if variant.validate(v).is_ok() {
                    return check_id_references(conn, variant, v);
                }
            }
            Ok(())
        },
        _ => Ok(()),
    }
}

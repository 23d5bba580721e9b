//! The persisted layout of §6: `_metadata`, the `_documents` shadow index,
//! `_schema_versions`, and the scheduler's table. Per-user-table DDL is
//! generated on first use by [`crate::store::DocumentStore`].
use rusqlite::Connection;

pub const BOOTSTRAP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS _metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS _documents (
    id TEXT PRIMARY KEY,
    "table" TEXT NOT NULL,
    creation_time INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS _documents_by_table ON _documents("table");

CREATE TABLE IF NOT EXISTS _schema_versions (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL,
    schema_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS scheduled_functions (
    id TEXT PRIMARY KEY,
    function_path TEXT NOT NULL,
    args TEXT NOT NULL,
    run_at INTEGER NOT NULL,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    completed_at INTEGER,
    error TEXT,
    error_code TEXT,
    retries INTEGER NOT NULL,
    max_retries INTEGER NOT NULL,
    dedupe_key TEXT
);
CREATE INDEX IF NOT EXISTS scheduled_functions_pending_run_at
    ON scheduled_functions(run_at) WHERE status = 'pending';
"#;

pub fn bootstrap(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(BOOTSTRAP_SQL)?;
    Ok(())
}

/// DDL for one user table (§6): `(id TEXT PK, creation_time INTEGER NOT
/// NULL, data TEXT NOT NULL)`. `table` has already been validated by
/// [`value::check_valid_table_name`] and quoted with the identifier-quote
/// character (§4.A rule 4), so this is not raw user-string concatenation.
pub fn create_user_table_sql(table: &str) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS "{table}" (
            id TEXT PRIMARY KEY,
            creation_time INTEGER NOT NULL,
            data TEXT NOT NULL
        )"#
    )
}

pub fn create_index_sql(table: &str, index_name: &str, columns: &[String], unique: bool) -> String {
    let unique_kw = if unique { "UNIQUE " } else { "" };
    let cols = columns.join(", ");
    format!(r#"CREATE {unique_kw}INDEX IF NOT EXISTS "{index_name}" ON "{table}"({cols})"#)
}

pub fn drop_index_sql(index_name: &str) -> String {
    format!(r#"DROP INDEX IF EXISTS "{index_name}""#)
}

pub fn drop_table_sql(table: &str) -> String {
    format!(r#"DROP TABLE IF EXISTS "{table}""#)
}

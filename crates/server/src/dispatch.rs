//! Maps a `{path, args}` request onto the document store (§4.F, §6
//! request/response endpoints). The core has no UDF engine (§1), so `path`
//! is read the same way a subscription's `query_path` is: a `table:op`
//! reference, not a pointer to user-defined function code. Shared by
//! `/api/query`, `/api/mutation`, `/api/action`, and the `Scheduler`'s
//! `DispatchFn` (`database::scheduler`: "that's the server crate's job,
//! wiring this to a query/mutation/action dispatch table").
use std::sync::Arc;

use database::{
    DispatchError,
    Document,
    DocumentStore,
};
use errors::ErrorMetadata;
use sync::QueryExecutor;
use value::{
    DocumentId,
    TableName,
};

/// The operation a `path` addresses, taken from the segment after the
/// table name (`messages:insert` -> table `messages`, op `insert`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Query,
    Insert,
    Patch,
    Replace,
    Delete,
}

fn parse_path(path: &str) -> anyhow::Result<(TableName, Op)> {
    let mut parts = path.splitn(2, ':');
    let table: TableName = parts
        .next()
        .unwrap_or(path)
        .parse()
        .map_err(|_| ErrorMetadata::protocol_error(format!("path \"{path}\" does not name a valid table")))?;
    let op = match parts.next() {
        None | Some("list") | Some("get") => Op::Query,
        Some("insert") => Op::Insert,
        Some("patch") | Some("update") => Op::Patch,
        Some("replace") | Some("set") => Op::Replace,
        Some("delete") | Some("remove") => Op::Delete,
        Some(other) => anyhow::bail!(ErrorMetadata::protocol_error(format!("unrecognized operation \"{other}\" in path \"{path}\""))),
    };
    Ok((table, op))
}

fn document_id_arg(args: &serde_json::Value) -> anyhow::Result<DocumentId> {
    args.get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ErrorMetadata::protocol_error("args missing \"id\""))?
        .parse::<DocumentId>()
        .map_err(|e| ErrorMetadata::protocol_error(format!("invalid document id: {e}")).into())
}

fn fields_arg(args: &serde_json::Value) -> anyhow::Result<value::ConvexObject> {
    let fields = args
        .get("fields")
        .cloned()
        .ok_or_else(|| ErrorMetadata::protocol_error("args missing \"fields\""))?;
    Document::fields_from_json(fields)
}

/// Binds a `path` + `args` request to the store and runs it, returning the
/// JSON `value` the gateway wraps into `{value}` (§6).
pub fn dispatch(store: &DocumentStore, path: &str, args: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
    let (table, op) = parse_path(path)?;
    match op {
        Op::Query => store.execute(path, args),
        Op::Insert => {
            let fields = fields_arg(args)?;
            let id = store.insert(&table, fields)?;
            Ok(serde_json::json!({ "id": id.to_string() }))
        },
        Op::Patch => {
            let id = document_id_arg(args)?;
            let fields = fields_arg(args)?;
            let doc = store.patch(&table, &id, fields)?;
            Ok(doc.to_json())
        },
        Op::Replace => {
            let id = document_id_arg(args)?;
            let fields = fields_arg(args)?;
            let doc = store.replace(&table, &id, fields)?;
            Ok(doc.to_json())
        },
        Op::Delete => {
            let id = document_id_arg(args)?;
            store.delete(&table, &id)?;
            Ok(serde_json::json!({ "id": id.to_string() }))
        },
    }
}

/// Wraps [`dispatch`] as a `database::DispatchFn` for the scheduler, which
/// calls into the same table by `function_path` (§4.E). Dispatch errors
/// without `ErrorMetadata` are treated as retryable; ones with it carry
/// their code through so the scheduler's `error_code` column stays
/// meaningful.
pub fn as_dispatch_fn(store: Arc<DocumentStore>) -> database::DispatchFn {
    Arc::new(move |path, args| {
        let store = Arc::clone(&store);
        Box::pin(async move {
            dispatch(&store, &path, &args).map(|_| ()).map_err(|err| {
                let code = errors::ErrorMetadataAnyhowExt::error_metadata(&err).map(|m| m.code);
                DispatchError {
                    message: format!("{err:#}"),
                    code,
                }
            })
        })
    })
}

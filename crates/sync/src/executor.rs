//! Runs a subscription's query against the document store (§4.C
//! `on_write`: "re-executes each affected subscription"). The core has no
//! UDF engine (out of scope, §1), so a `query_path` is read directly as a
//! `table:view` reference and `args` as a JSON-encoded [`QuerySpec`],
//! rather than as a reference to user-defined query code.
use common::query::{
    Direction,
    Filter,
    FilterOp,
    FilterTree,
    OrderBy,
    QuerySpec,
};
use errors::ErrorMetadata;
use value::{
    ConvexValue,
    TableName,
};

/// Runs one subscription's query and returns its result as a JSON array,
/// ready to be a frame's `data` field (§6).
pub trait QueryExecutor: Send + Sync {
    fn execute(&self, query_path: &str, args: &serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

impl QueryExecutor for database::DocumentStore {
    fn execute(&self, query_path: &str, args: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let table = table_from_query_path(query_path)?;
        let spec = query_spec_from_args(table, args)?;
        let docs = self.query(&spec)?;
        Ok(serde_json::Value::Array(docs.iter().map(|doc| doc.to_json()).collect()))
    }
}

/// The table a `query_path` addresses is its first `:`-delimited segment
/// (e.g. `messages:list` names table `messages`), matching the convention
/// `database::invalidation::path_names_table` already relies on.
fn table_from_query_path(query_path: &str) -> anyhow::Result<TableName> {
    let table = query_path.split(':').next().unwrap_or(query_path);
    table
        .parse()
        .map_err(|_| ErrorMetadata::protocol_error(format!("query path \"{query_path}\" does not name a valid table")).into())
}

/// `args`' recognized shape: `{filters: [{field,op,value}], order:
/// {field,direction}, limit, index}`. Every field is optional; an empty
/// object queries the whole table in default (`_creationTime ASC`) order.
fn query_spec_from_args(table: TableName, args: &serde_json::Value) -> anyhow::Result<QuerySpec> {
    let mut spec = QuerySpec::new(table);
    let serde_json::Value::Object(map) = args else {
        if args.is_null() {
            return Ok(spec);
        }
        anyhow::bail!(ErrorMetadata::protocol_error("subscription args must be a JSON object"));
    };

    if let Some(filters) = map.get("filters") {
        let filters = filters
            .as_array()
            .ok_or_else(|| ErrorMetadata::protocol_error("\"filters\" must be an array"))?;
        for filter_json in filters {
            spec = spec.filter(parse_filter(filter_json)?);
        }
    }
    if let Some(tree_json) = map.get("tree") {
        spec.tree = Some(parse_tree(tree_json)?);
    }
    if let Some(order_json) = map.get("order") {
        spec = spec.order(parse_order(order_json)?);
    }
    if let Some(limit_json) = map.get("limit") {
        let limit = limit_json
            .as_u64()
            .ok_or_else(|| ErrorMetadata::protocol_error("\"limit\" must be a non-negative integer"))?;
        spec = spec.limit(limit);
    }
    if let Some(index_json) = map.get("index") {
        spec.index_hint = index_json.as_str().map(str::to_string);
    }
    Ok(spec)
}

fn parse_filter(json: &serde_json::Value) -> anyhow::Result<Filter> {
    let field = json
        .get("field")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ErrorMetadata::protocol_error("filter missing \"field\""))?;
    let op = json
        .get("op")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ErrorMetadata::protocol_error("filter missing \"op\""))?;
    let op = parse_op(op)?;
    let value_json = json.get("value").cloned().unwrap_or(serde_json::Value::Null);
    let value = ConvexValue::from_json(value_json)?;
    Ok(Filter::new(field, op, value))
}

fn parse_op(op: &str) -> anyhow::Result<FilterOp> {
    Ok(match op {
        "eq" => FilterOp::Eq,
        "neq" => FilterOp::Neq,
        "lt" => FilterOp::Lt,
        "lte" => FilterOp::Lte,
        "gt" => FilterOp::Gt,
        "gte" => FilterOp::Gte,
        other => anyhow::bail!(ErrorMetadata::protocol_error(format!("unrecognized filter op \"{other}\""))),
    })
}

fn parse_tree(json: &serde_json::Value) -> anyhow::Result<FilterTree> {
    if let Some(children) = json.get("and").and_then(|v| v.as_array()) {
        return Ok(FilterTree::And(children.iter().map(parse_tree).collect::<anyhow::Result<_>>()?));
    }
    if let Some(children) = json.get("or").and_then(|v| v.as_array()) {
        return Ok(FilterTree::Or(children.iter().map(parse_tree).collect::<anyhow::Result<_>>()?));
    }
    Ok(FilterTree::Leaf(parse_filter(json)?))
}

fn parse_order(json: &serde_json::Value) -> anyhow::Result<OrderBy> {
    let field = json
        .get("field")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ErrorMetadata::protocol_error("order missing \"field\""))?
        .to_string();
    let direction = match json.get("direction").and_then(|v| v.as_str()) {
        Some("desc") => Direction::Desc,
        Some("asc") | None => Direction::Asc,
        Some(other) => anyhow::bail!(ErrorMetadata::protocol_error(format!("unrecognized order direction \"{other}\""))),
    };
    Ok(OrderBy { field, direction })
}

#[cfg(test)]
mod tests {
    use database::DocumentStore;
    use value::ConvexObject;

    use super::*;

    fn doc(title: &str) -> ConvexObject {
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("title".parse().unwrap(), ConvexValue::from(title));
        ConvexObject::try_from(fields).unwrap()
    }

    #[test]
    fn table_from_query_path_uses_first_segment() {
        assert_eq!(table_from_query_path("messages:list").unwrap().as_str(), "messages");
        assert_eq!(table_from_query_path("messages").unwrap().as_str(), "messages");
    }

    #[test]
    fn executes_a_query_path_against_the_store() {
        let store = DocumentStore::open_in_memory().unwrap();
        let table: TableName = "messages".parse().unwrap();
        store.insert(&table, doc("hello")).unwrap();
        let result = store.execute("messages:list", &serde_json::json!({})).unwrap();
        let array = result.as_array().unwrap();
        assert_eq!(array.len(), 1);
        assert_eq!(array[0]["title"], "hello");
    }

    #[test]
    fn executes_with_filters_and_limit() {
        let store = DocumentStore::open_in_memory().unwrap();
        let table: TableName = "messages".parse().unwrap();
        store.insert(&table, doc("a")).unwrap();
        store.insert(&table, doc("b")).unwrap();
        let args = serde_json::json!({
            "filters": [{"field": "title", "op": "eq", "value": "a"}],
            "limit": 10,
        });
        let result = store.execute("messages:list", &args).unwrap();
        assert_eq!(result.as_array().unwrap().len(), 1);
    }

    #[test]
    fn rejects_unrecognized_table() {
        let store = DocumentStore::open_in_memory().unwrap();
        assert!(store.execute("not valid:list", &serde_json::json!({})).is_err());
    }
}

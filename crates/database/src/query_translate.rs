//! Translates a [`common::query::QuerySpec`] into a parameterized SQL
//! statement (§4.A, "Query translation (this is the subtle part)").
use common::query::{
    Direction,
    Filter,
    FilterOp,
    FilterTree,
    QuerySpec,
};
use errors::ErrorMetadata;
use rusqlite::types::Value as SqlValue;
use value::{
    check_valid_field_name,
    check_valid_table_name,
    ConvexValue,
    CREATION_TIME_FIELD,
    ID_FIELD,
};

/// A translated statement, ready for `conn.prepare(&translated.sql)` and
/// `rusqlite::params_from_iter(&translated.params)`.
pub struct Translated {
    pub sql: String,
    pub params: Vec<SqlValue>,
    /// The index name the caller passed as a hint, if any (§4.A rule 8).
    /// Carried alongside the statement; the planner may ignore it and an
    /// unknown name must not fail translation.
    pub index_hint: Option<String>,
}

/// Rule 1: system fields use direct column references; other fields use a
/// JSON-path extract against the serialized `data` column.
fn field_reference(field: &str) -> anyhow::Result<String> {
    if field == ID_FIELD {
        return Ok("id".to_string());
    }
    if field == CREATION_TIME_FIELD {
        return Ok("creation_time".to_string());
    }
    check_valid_field_name(field)?;
    Ok(format!("json_extract(data, '$.{field}')"))
}

/// Rule 3: every literal becomes a parameter. `undefined`/`NaN`/`+-Inf` are
/// rejected before any SQL is produced. Scalars are bound as their natural
/// SQL type (matching what `json_extract` yields for a JSON scalar);
/// composite/tagged-wrapper values (`int64`, `bytes`, `id`, arrays,
/// objects) are bound as their canonical JSON text, so that two
/// structurally equal values compare equal via ordinary `=`.
fn literal_param(value: &ConvexValue) -> anyhow::Result<SqlValue> {
    value.validate_finite().map_err(|_| {
        anyhow::Error::new(ErrorMetadata::invalid_filter(
            "filter value must be finite (no NaN or +-Infinity)",
        ))
    })?;
    Ok(match value {
        ConvexValue::Null => SqlValue::Null,
        ConvexValue::Boolean(b) => SqlValue::Integer(if *b { 1 } else { 0 }),
        ConvexValue::Float64(f) => SqlValue::Real(*f),
        ConvexValue::String(s) => SqlValue::Text(s.clone()),
        ConvexValue::Int64(_) | ConvexValue::Bytes(_) | ConvexValue::Id(_) | ConvexValue::Array(_) | ConvexValue::Object(_) => {
            SqlValue::Text(value::json::canonical_json_text(value))
        },
    })
}

/// Rule 2: `eq null` -> `IS NULL`; `neq null` -> `IS NOT NULL`. Other
/// operators against `null` fall through to ordinary SQL three-valued
/// logic (`< NULL` etc. are always unknown, matching SQL semantics).
fn render_filter(filter: &Filter, params: &mut Vec<SqlValue>) -> anyhow::Result<String> {
    let column = field_reference(&filter.field)?;
    if matches!(filter.value, ConvexValue::Null) {
        return Ok(match filter.op {
            FilterOp::Eq => format!("{column} IS NULL"),
            FilterOp::Neq => format!("{column} IS NOT NULL"),
            other => format!("{column} {} NULL", other.as_sql()),
        });
    }
    params.push(literal_param(&filter.value)?);
    Ok(format!("{column} {} ?", filter.op.as_sql()))
}

/// Rule 7: every tree node is parenthesized; `AND` is the default
/// connective joining the outer filter list with any attached tree.
fn render_tree(tree: &FilterTree, params: &mut Vec<SqlValue>) -> anyhow::Result<String> {
    Ok(match tree {
        FilterTree::Leaf(filter) => render_filter(filter, params)?,
        FilterTree::And(children) => {
            let parts = children
                .iter()
                .map(|c| render_tree(c, params))
                .collect::<anyhow::Result<Vec<_>>>()?;
            format!("({})", parts.join(" AND "))
        },
        FilterTree::Or(children) => {
            let parts = children
                .iter()
                .map(|c| render_tree(c, params))
                .collect::<anyhow::Result<Vec<_>>>()?;
            format!("({})", parts.join(" OR "))
        },
    })
}

pub fn translate(spec: &QuerySpec) -> anyhow::Result<Translated> {
    let table = spec
        .table
        .as_ref()
        .ok_or_else(|| anyhow::Error::new(ErrorMetadata::invalid_filter("query is missing a table")))?;
    check_valid_table_name(table.as_str())?;

    let mut params = Vec::new();
    let mut conditions = Vec::new();
    for filter in &spec.filters {
        conditions.push(render_filter(filter, &mut params)?);
    }
    if let Some(tree) = &spec.tree {
        conditions.push(render_tree(tree, &mut params)?);
    }

    let mut sql = format!(r#"SELECT id, creation_time, data FROM "{table}""#, table = table.as_str());
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    // Rule 5: default `_creationTime ASC`; ordering on a non-system field
    // uses the JSON-extract form too. A composite `(order_field, id)`
    // tiebreak makes pagination deterministic under concurrent inserts
    // (§9 Open Question, resolved in DESIGN.md).
    let order = spec.order.clone().unwrap_or_default();
    let order_column = field_reference(&order.field)?;
    let dir_sql = match order.direction {
        Direction::Asc => "ASC",
        Direction::Desc => "DESC",
    };
    sql.push_str(&format!(" ORDER BY {order_column} {dir_sql}, id {dir_sql}"));

    // Rule 6: integer only; `LIMIT 0` is legal and returns no rows.
    if let Some(limit) = spec.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    Ok(Translated {
        sql,
        params,
        index_hint: spec.index_hint.clone(),
    })
}

#[cfg(test)]
mod tests {
    use common::query::{
        Filter,
        FilterOp,
        OrderBy,
    };

    use super::*;

    #[test]
    fn null_equality_uses_is_null_not_equals_parameter() {
        let spec = QuerySpec::new("users".parse().unwrap())
            .filter(Filter::new("deletedAt", FilterOp::Eq, ConvexValue::Null))
            .order(OrderBy {
                field: "_creationTime".to_string(),
                direction: Direction::Desc,
            })
            .limit(10);
        let translated = translate(&spec).unwrap();
        assert!(translated.sql.contains("IS NULL"));
        assert!(!translated.sql.contains("= ?"));
        assert!(translated.sql.contains("creation_time DESC"));
        assert!(translated.sql.contains("LIMIT 10"));
        assert!(translated.params.is_empty());
    }

    #[test]
    fn system_field_uses_direct_column_not_json_extract() {
        let spec = QuerySpec::new("users".parse().unwrap())
            .filter(Filter::new("_creationTime", FilterOp::Gt, ConvexValue::Float64(5.0)));
        let translated = translate(&spec).unwrap();
        assert!(translated.sql.contains("creation_time > ?"));
        assert!(!translated.sql.contains("json_extract(data, '$._creationTime')"));
    }

    #[test]
    fn user_field_uses_json_extract() {
        let spec = QuerySpec::new("users".parse().unwrap())
            .filter(Filter::new("name", FilterOp::Eq, ConvexValue::from("ada")));
        let translated = translate(&spec).unwrap();
        assert!(translated.sql.contains("json_extract(data, '$.name') = ?"));
    }

    #[test]
    fn nan_filter_value_is_rejected_before_sql() {
        let spec = QuerySpec::new("users".parse().unwrap())
            .filter(Filter::new("score", FilterOp::Eq, ConvexValue::Float64(f64::NAN)));
        assert!(translate(&spec).is_err());
    }

    #[test]
    fn limit_zero_is_legal() {
        let spec = QuerySpec::new("users".parse().unwrap()).limit(0);
        let translated = translate(&spec).unwrap();
        assert!(translated.sql.contains("LIMIT 0"));
    }
}

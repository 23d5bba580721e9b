//! The filter/order AST that callers build and `database`'s translator (§4.A)
//! turns into a parameterized SQL statement. Kept here, rather than in
//! `database`, so `sync`'s subscription registry can store a `QuerySpec`
//! without depending on the storage crate.
use value::{
    ConvexValue,
    TableName,
    CREATION_TIME_FIELD,
};

/// `eq`/`neq` treat `value: Null` specially (§4.A rule 2): `IS NULL` /
/// `IS NOT NULL` rather than `= ?` / `!= ?`, since SQL's three-valued logic
/// makes `x = NULL` never true.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub enum FilterOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl FilterOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Neq => "!=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
        }
    }
}

/// A single `{field, op, value}` comparison (§4.A).
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: ConvexValue,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: ConvexValue) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }
}

/// The `{and|or, children}` logical tree callers may attach alongside the
/// flat filter list (§4.A rule 7). Every node is parenthesized on
/// translation so composition is unambiguous regardless of connective
/// mixing.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterTree {
    Leaf(Filter),
    And(Vec<FilterTree>),
    Or(Vec<FilterTree>),
}

/// Sort direction. Defaults to `Asc` on `_creationTime` when no explicit
/// order is given (§4.A rule 5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl Default for OrderBy {
    fn default() -> Self {
        Self {
            field: CREATION_TIME_FIELD.to_string(),
            direction: Direction::Asc,
        }
    }
}

/// The full shape of a `DocumentStore::query` call (§4.A).
#[derive(Clone, Debug, Default)]
pub struct QuerySpec {
    pub table: Option<TableName>,
    pub filters: Vec<Filter>,
    pub tree: Option<FilterTree>,
    pub order: Option<OrderBy>,
    pub limit: Option<u64>,
    /// Passed through to the statement as a hint only (§4.A rule 8); the
    /// planner may ignore it, and a nonexistent index name must not fail
    /// the query.
    pub index_hint: Option<String>,
}

impl QuerySpec {
    pub fn new(table: TableName) -> Self {
        Self {
            table: Some(table),
            ..Default::default()
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order(mut self, order: OrderBy) -> Self {
        self.order = Some(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_filters() {
        let spec = QuerySpec::new("messages".parse().unwrap())
            .filter(Filter::new("channel", FilterOp::Eq, ConvexValue::from("general")))
            .order(OrderBy {
                field: "_creationTime".to_string(),
                direction: Direction::Desc,
            })
            .limit(10);
        assert_eq!(spec.filters.len(), 1);
        assert_eq!(spec.limit, Some(10));
    }

    #[test]
    fn default_order_is_creation_time_ascending() {
        let order = OrderBy::default();
        assert_eq!(order.field, "_creationTime");
        assert_eq!(order.direction, Direction::Asc);
    }
}

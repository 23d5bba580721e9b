//! A pure translator from a committed write to the set of subscriptions
//! that might need to re-run (§4.B). Owns no state: callers (the `sync`
//! crate's registry) pass in the live `(SubscriptionId, query_path)` pairs
//! to check.
//!
//! §9 Open Question: a raw substring match on `queryPath` over-invalidates
//! when a table name happens to be a substring of an unrelated path (table
//! `msg` would spuriously invalidate `messages:list`). This core uses a
//! stricter colon-delimited segment match instead -- still conservative
//! (false positives are fine, §4.B), but without that pathology. See
//! DESIGN.md.
use common::sync_types::SubscriptionId;
use value::TableName;

/// Does `query_path` name `table`, either as the whole path or as one of
/// its `:`-delimited segments?
pub fn path_names_table(query_path: &str, table: &TableName) -> bool {
    query_path.split(':').any(|segment| segment == table.as_str())
}

/// For each committed write to `table`, the subscriptions whose cached
/// result might have changed (§4.B). `false positives are acceptable;
/// false negatives are not`.
pub fn affected_subscriptions<'a, I>(table: &TableName, subscriptions: I) -> Vec<SubscriptionId>
where
    I: IntoIterator<Item = (SubscriptionId, &'a str)>,
{
    subscriptions
        .into_iter()
        .filter(|(_, query_path)| path_names_table(query_path, table))
        .map(|(id, _)| id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_path_that_is_exactly_the_table() {
        let table: TableName = "messages".parse().unwrap();
        assert!(path_names_table("messages", &table));
    }

    #[test]
    fn matches_colon_delimited_segment() {
        let table: TableName = "messages".parse().unwrap();
        assert!(path_names_table("messages:list", &table));
        assert!(path_names_table("channel:messages:byChannel", &table));
    }

    #[test]
    fn does_not_match_substring_that_is_not_a_segment() {
        let table: TableName = "msg".parse().unwrap();
        assert!(!path_names_table("messages:list", &table));
    }

    #[test]
    fn affected_subscriptions_filters_down_to_matches() {
        let table: TableName = "messages".parse().unwrap();
        let a = SubscriptionId::derive(common::sync_types::SessionId::new(), "messages:list", "h1");
        let b = SubscriptionId::derive(common::sync_types::SessionId::new(), "users:get", "h2");
        let affected = affected_subscriptions(&table, vec![(a, "messages:list"), (b, "users:get")]);
        assert_eq!(affected, vec![a]);
    }
}

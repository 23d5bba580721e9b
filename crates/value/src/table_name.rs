use std::{
    fmt::{
        self,
        Debug,
    },
    ops::Deref,
    str::FromStr,
};

use errors::ErrorMetadata;

/// Table names reserved for internal bookkeeping may not be declared or
/// written to by callers (§3).
pub const RESERVED_TABLE_NAMES: &[&str] = &["_documents", "_schema_versions", "_metadata"];
pub const RESERVED_PREFIX: char = '_';

pub fn check_valid_table_name(s: &str) -> anyhow::Result<()> {
    if s.is_empty() {
        anyhow::bail!(ErrorMetadata::invalid_identifier(
            "InvalidTableName",
            "Table names cannot be empty"
        ));
    }
    let mut chars = s.chars();
    let first = chars.next().expect("checked non-empty above");
    if !(first.is_ascii_alphabetic() || first == '_') {
        anyhow::bail!(ErrorMetadata::invalid_identifier(
            "InvalidTableName",
            format!("Table name \"{s}\" must start with a letter or underscore"),
        ));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        anyhow::bail!(ErrorMetadata::invalid_identifier(
            "InvalidTableName",
            format!("Table name \"{s}\" contains invalid characters"),
        ));
    }
    Ok(())
}

pub fn is_reserved_table_name(s: &str) -> bool {
    RESERVED_TABLE_NAMES.contains(&s) || s.starts_with(RESERVED_PREFIX)
}

/// Unique name for a table. Tables contain documents referenced by
/// [`crate::DocumentId`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    pub fn is_reserved(&self) -> bool {
        is_reserved_table_name(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TableName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        check_valid_table_name(s)?;
        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for TableName {
    type Error = anyhow::Error;

    fn try_from(s: String) -> anyhow::Result<Self> {
        check_valid_table_name(&s)?;
        Ok(Self(s))
    }
}

impl From<TableName> for String {
    fn from(t: TableName) -> Self {
        t.0
    }
}

impl Debug for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Deref for TableName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A small integer assigned to each table on creation, used only to give
/// document ids a table-tagged first character (§3) without leaking table
/// identity into storage rows, which key on the table name directly.
pub type TableNumber = u16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_names_are_flagged() {
        assert!(is_reserved_table_name("_documents"));
        assert!(is_reserved_table_name("_anything"));
        assert!(!is_reserved_table_name("messages"));
    }

    #[test]
    fn validates_identifier_alphabet() {
        assert!("messages".parse::<TableName>().is_ok());
        assert!("messages-v2".parse::<TableName>().is_err());
        assert!("".parse::<TableName>().is_err());
    }
}

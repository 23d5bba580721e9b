use std::{
    borrow::Borrow,
    fmt::{
        self,
        Debug,
    },
    ops::Deref,
    str::FromStr,
};

use errors::ErrorMetadata;

/// A field name's first character must be an ASCII letter or underscore;
/// the rest must be letters, digits, or underscores. Fields whose name
/// starts with `_` are system fields (`_id`, `_creationTime`) and cannot be
/// set directly by `insert`/`patch`/`replace` callers.
pub fn check_valid_field_name(s: &str) -> anyhow::Result<()> {
    if s.is_empty() {
        anyhow::bail!(ErrorMetadata::invalid_identifier(
            "InvalidFieldName",
            "Field names cannot be empty"
        ));
    }
    let mut chars = s.chars();
    let first = chars.next().expect("checked non-empty above");
    if !(first.is_ascii_alphabetic() || first == '_') {
        anyhow::bail!(ErrorMetadata::invalid_identifier(
            "InvalidFieldName",
            format!("Field name \"{s}\" must start with a letter or underscore"),
        ));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        anyhow::bail!(ErrorMetadata::invalid_identifier(
            "InvalidFieldName",
            format!("Field name \"{s}\" contains invalid characters"),
        ));
    }
    Ok(())
}

/// The document id field, exposed to callers as `_id`.
pub const ID_FIELD: &str = "_id";
/// The document creation time field, exposed to callers as `_creationTime`.
pub const CREATION_TIME_FIELD: &str = "_creationTime";

/// Field names within a document's top-level object.
#[derive(Hash, Eq, Ord, PartialEq, PartialOrd, Clone, derive_more::Display, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldName(String);

impl FieldName {
    pub fn is_system(&self) -> bool {
        self.0.starts_with('_')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for FieldName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        check_valid_field_name(s)?;
        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for FieldName {
    type Error = anyhow::Error;

    fn try_from(s: String) -> anyhow::Result<Self> {
        check_valid_field_name(&s)?;
        Ok(Self(s))
    }
}

impl From<FieldName> for String {
    fn from(f: FieldName) -> Self {
        f.0
    }
}

impl Debug for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Deref for FieldName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Borrow<str> for FieldName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        assert!("channel".parse::<FieldName>().is_ok());
        assert!("_id".parse::<FieldName>().is_ok());
        assert!("deletedAt".parse::<FieldName>().is_ok());
    }

    #[test]
    fn rejects_bad_names() {
        assert!("".parse::<FieldName>().is_err());
        assert!("1abc".parse::<FieldName>().is_err());
        assert!("has space".parse::<FieldName>().is_err());
    }

    #[test]
    fn system_fields_are_tagged() {
        assert!(FieldName::from_str(ID_FIELD).unwrap().is_system());
        assert!(!FieldName::from_str("title").unwrap().is_system());
    }
}

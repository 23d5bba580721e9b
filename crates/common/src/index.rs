//! Index descriptors (§3 Table, §4.A rule 8).
use value::FieldName;

/// A named, ordered list of fields a table's storage may be indexed on.
/// `query`'s `index_hint` refers to one of these by name; a hint for an
/// index that doesn't exist is not an error (§4.A rule 8).
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub fields: Vec<FieldName>,
    pub unique: bool,
}

impl IndexDescriptor {
    pub fn new(name: impl Into<String>, fields: Vec<FieldName>, unique: bool) -> Self {
        Self {
            name: name.into(),
            fields,
            unique,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_preserves_field_order() {
        let idx = IndexDescriptor::new(
            "by_channel_and_time",
            vec!["channel".parse().unwrap(), "_creationTime".parse().unwrap()],
            false,
        );
        assert_eq!(idx.fields[0].as_str(), "channel");
        assert_eq!(idx.fields[1].as_str(), "_creationTime");
    }
}

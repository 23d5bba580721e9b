//! Object type used for a document's top-level value and for nested objects.
use std::{
    borrow::Borrow,
    collections::BTreeMap,
    fmt,
    ops::Deref,
};

use crate::{
    field_name::FieldName,
    size::{
        check_nesting,
        check_system_size,
        Size,
    },
    value::ConvexValue,
};

pub const MAX_OBJECT_FIELDS: usize = 1024;

/// A mapping of field name to [`ConvexValue`]. Field order is preserved as
/// insertion order in `BTreeMap`'s key order (lexicographic by field name),
/// matching how the storage layer's JSON column is produced deterministically
/// for hashing and diffing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConvexObject {
    size: usize,
    nesting: usize,
    fields: BTreeMap<FieldName, ConvexValue>,
}

impl TryFrom<BTreeMap<FieldName, ConvexValue>> for ConvexObject {
    type Error = anyhow::Error;

    fn try_from(fields: BTreeMap<FieldName, ConvexValue>) -> anyhow::Result<Self> {
        if fields.len() > MAX_OBJECT_FIELDS {
            anyhow::bail!(errors::ErrorMetadata::invalid_value(
                "TooManyFields",
                format!(
                    "object has {} fields, exceeding the {MAX_OBJECT_FIELDS} field limit",
                    fields.len()
                ),
            ));
        }
        let size = 1
            + fields
                .iter()
                .map(|(k, v)| k.len() + 1 + v.size())
                .sum::<usize>();
        check_system_size(size)?;
        let nesting = 1 + fields.values().map(|v| v.nesting()).max().unwrap_or(0);
        check_nesting(nesting)?;
        Ok(Self {
            size,
            nesting,
            fields,
        })
    }
}

impl ConvexObject {
    pub fn empty() -> Self {
        Self {
            size: 1,
            nesting: 1,
            fields: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&ConvexValue> {
        self.fields.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldName, &ConvexValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_map(self) -> BTreeMap<FieldName, ConvexValue> {
        self.fields
    }
}

impl Size for ConvexObject {
    fn size(&self) -> usize {
        self.size
    }

    fn nesting(&self) -> usize {
        self.nesting
    }
}

impl Deref for ConvexObject {
    type Target = BTreeMap<FieldName, ConvexValue>;

    fn deref(&self) -> &Self::Target {
        &self.fields
    }
}

impl Borrow<BTreeMap<FieldName, ConvexValue>> for ConvexObject {
    fn borrow(&self) -> &BTreeMap<FieldName, ConvexValue> {
        &self.fields
    }
}

impl fmt::Display for ConvexObject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}: {v:?}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn rejects_too_many_fields() {
        let mut fields = BTreeMap::new();
        for i in 0..(MAX_OBJECT_FIELDS + 1) {
            fields.insert(format!("f{i}").parse().unwrap(), ConvexValue::Null);
        }
        assert!(ConvexObject::try_from(fields).is_err());
    }

    #[test]
    fn empty_object_round_trips() {
        let obj = ConvexObject::empty();
        assert_eq!(obj.len(), 0);
        assert!(obj.is_empty());
    }
}

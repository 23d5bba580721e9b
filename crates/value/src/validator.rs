//! Flat, data-driven validator descriptors (§9 DESIGN NOTES: "Class-based
//! validator hierarchy → data-driven validators"). A single recursive
//! evaluator walks a [`Validator`] tree against a [`ConvexValue`]; there's no
//! virtual dispatch and the descriptor itself is `Serialize`/`Deserialize`
//! so it can be stored as part of a table's schema.
use std::collections::BTreeMap;

use errors::ErrorMetadata;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    field_name::FieldName,
    table_name::TableName,
    value::ConvexValue,
};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Validator {
    String,
    Float64,
    Int64,
    Boolean,
    Null,
    Bytes,
    Id { table: TableName },
    Array { element: Box<Validator> },
    Object { fields: BTreeMap<FieldName, FieldValidator> },
    Union { variants: Vec<Validator> },
    Literal { value: LiteralValue },
    Any,
}

/// A restricted value that `serde_json`/`Serialize` can represent exactly,
/// used for the `literal<v>` validator kind (§3).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum LiteralValue {
    String(String),
    Int64(i64),
    Float64(f64),
    Boolean(bool),
}

impl LiteralValue {
    fn matches(&self, value: &ConvexValue) -> bool {
        match (self, value) {
            (LiteralValue::String(a), ConvexValue::String(b)) => a == b,
            (LiteralValue::Int64(a), ConvexValue::Int64(b)) => a == b,
            (LiteralValue::Float64(a), ConvexValue::Float64(b)) => a == b,
            (LiteralValue::Boolean(a), ConvexValue::Boolean(b)) => a == b,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FieldValidator {
    pub validator: Validator,
    /// `true` if the field may be omitted entirely (distinct from being
    /// present with value `null`, which `Validator::Null` or a `Union`
    /// containing it governs).
    #[serde(default)]
    pub optional: bool,
}

impl Validator {
    pub fn validate(&self, value: &ConvexValue) -> anyhow::Result<()> {
        let ok = match (self, value) {
            (Validator::Any, _) => true,
            (Validator::String, ConvexValue::String(_)) => true,
            (Validator::Float64, ConvexValue::Float64(_)) => true,
            (Validator::Int64, ConvexValue::Int64(_)) => true,
            (Validator::Boolean, ConvexValue::Boolean(_)) => true,
            (Validator::Null, ConvexValue::Null) => true,
            (Validator::Bytes, ConvexValue::Bytes(_)) => true,
            (Validator::Id { table }, ConvexValue::Id(_)) => {
                // Referential integrity (does the id point at an existing document
                // in `table`) is checked by the document store at write time, which
                // has access to the shadow index; the validator only confirms the
                // value is shaped like an id.
                let _ = table;
                true
            },
            (Validator::Array { element }, ConvexValue::Array(items)) => {
                for item in items {
                    element.validate(item)?;
                }
                true
            },
            (Validator::Object { fields }, ConvexValue::Object(obj)) => {
                for (name, field_validator) in fields {
                    match obj.get(name.as_str()) {
                        Some(v) => field_validator.validator.validate(v)?,
                        None if field_validator.optional => {},
                        None => anyhow::bail!(ErrorMetadata::schema_violation(format!(
                            "missing required field \"{name}\""
                        ))),
                    }
                }
                for (name, _) in obj.iter() {
                    if name.is_system() {
                        continue;
                    }
                    if !fields.contains_key(name) {
                        anyhow::bail!(ErrorMetadata::schema_violation(format!(
                            "unexpected field \"{name}\" not declared in schema"
                        )));
                    }
                }
                true
            },
            (Validator::Union { variants }, v) => {
                return variants
                    .iter()
                    .find_map(|variant| variant.validate(v).ok())
                    .ok_or_else(|| {
                        anyhow::Error::new(ErrorMetadata::schema_violation(format!(
                            "value did not match any variant of the union (got {})",
                            v.kind_name()
                        )))
                    });
            },
            (Validator::Literal { value: literal }, v) => literal.matches(v),
            _ => false,
        };
        if !ok {
            anyhow::bail!(ErrorMetadata::schema_violation(format!(
                "value of kind \"{}\" does not match validator {self:?}",
                value.kind_name()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_field(name: &str, optional: bool) -> (FieldName, FieldValidator) {
        (
            name.parse().unwrap(),
            FieldValidator {
                validator: Validator::String,
                optional,
            },
        )
    }

    #[test]
    fn validates_primitive_kinds() {
        assert!(Validator::Int64.validate(&ConvexValue::Int64(1)).is_ok());
        assert!(Validator::Int64.validate(&ConvexValue::Boolean(true)).is_err());
    }

    #[test]
    fn optional_field_may_be_absent() {
        let object_validator = Validator::Object {
            fields: BTreeMap::from([string_field("title", false), string_field("subtitle", true)]),
        };
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("title".parse().unwrap(), ConvexValue::from("hi"));
        let obj = crate::object::ConvexObject::try_from(fields).unwrap();
        assert!(object_validator.validate(&ConvexValue::Object(obj)).is_ok());
    }

    #[test]
    fn missing_required_field_fails() {
        let object_validator = Validator::Object {
            fields: BTreeMap::from([string_field("title", false)]),
        };
        let obj = crate::object::ConvexObject::empty();
        assert!(object_validator.validate(&ConvexValue::Object(obj)).is_err());
    }

    #[test]
    fn union_accepts_any_matching_variant() {
        let v = Validator::Union {
            variants: vec![Validator::String, Validator::Null],
        };
        assert!(v.validate(&ConvexValue::Null).is_ok());
        assert!(v.validate(&ConvexValue::from("x")).is_ok());
        assert!(v.validate(&ConvexValue::Int64(1)).is_err());
    }

    #[test]
    fn literal_matches_exact_value_only() {
        let v = Validator::Literal {
            value: LiteralValue::String("general".to_string()),
        };
        assert!(v.validate(&ConvexValue::from("general")).is_ok());
        assert!(v.validate(&ConvexValue::from("other")).is_err());
    }
}

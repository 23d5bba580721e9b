//! Conversion between [`ConvexValue`] and `serde_json::Value` (§4.A).
//!
//! `int64` and `bytes` don't have a native JSON representation, so they
//! round-trip through tagged wrapper objects: `{"__type":"bigint","value":"<decimal>"}`
//! and `{"__type":"arraybuffer","value":[...]}`. Every other JSON shape maps
//! onto the obvious `ConvexValue` variant. `undefined` has no JSON
//! representation and can't appear; `NaN`/`±Infinity` are rejected by
//! `serde_json` itself when parsing and by [`crate::numeric::check_finite_float`]
//! when constructing values programmatically.
use std::collections::BTreeMap;

use errors::ErrorMetadata;
use serde_json::{
    json,
    Value as JsonValue,
};

use crate::{
    bytes::ConvexBytes,
    document_id::DocumentId,
    numeric::parse_int64_decimal,
    object::ConvexObject,
    value::ConvexValue,
};

const TYPE_FIELD: &str = "__type";
const VALUE_FIELD: &str = "value";
const BIGINT_TAG: &str = "bigint";
const BYTES_TAG: &str = "arraybuffer";
const ID_TAG: &str = "id";

impl ConvexValue {
    pub fn to_json(&self) -> JsonValue {
        match self {
            ConvexValue::Null => JsonValue::Null,
            ConvexValue::Boolean(b) => JsonValue::Bool(*b),
            ConvexValue::Float64(n) => {
                serde_json::Number::from_f64(*n).map(JsonValue::Number).unwrap_or(JsonValue::Null)
            },
            ConvexValue::Int64(n) => json!({ TYPE_FIELD: BIGINT_TAG, VALUE_FIELD: n.to_string() }),
            ConvexValue::String(s) => JsonValue::String(s.clone()),
            ConvexValue::Bytes(b) => {
                let bytes: Vec<u8> = b.to_vec();
                json!({ TYPE_FIELD: BYTES_TAG, VALUE_FIELD: bytes })
            },
            ConvexValue::Id(id) => json!({ TYPE_FIELD: ID_TAG, VALUE_FIELD: id.encode() }),
            ConvexValue::Array(items) => {
                JsonValue::Array(items.iter().map(ConvexValue::to_json).collect())
            },
            ConvexValue::Object(obj) => {
                let mut map = serde_json::Map::new();
                for (k, v) in obj.iter() {
                    map.insert(k.to_string(), v.to_json());
                }
                JsonValue::Object(map)
            },
        }
    }

    pub fn from_json(json: JsonValue) -> anyhow::Result<Self> {
        Ok(match json {
            JsonValue::Null => ConvexValue::Null,
            JsonValue::Bool(b) => ConvexValue::Boolean(b),
            JsonValue::Number(n) => {
                let f = n.as_f64().ok_or_else(|| {
                    ErrorMetadata::invalid_value("InvalidNumber", "number is not representable as float64")
                })?;
                ConvexValue::Float64(f)
            },
            JsonValue::String(s) => ConvexValue::String(s),
            JsonValue::Array(items) => ConvexValue::Array(
                items
                    .into_iter()
                    .map(ConvexValue::from_json)
                    .collect::<anyhow::Result<_>>()?,
            ),
            JsonValue::Object(map) => {
                if let Some(JsonValue::String(tag)) = map.get(TYPE_FIELD) {
                    return Self::from_tagged(tag, map);
                }
                let mut fields = BTreeMap::new();
                for (k, v) in map {
                    fields.insert(k.parse()?, ConvexValue::from_json(v)?);
                }
                ConvexValue::Object(ConvexObject::try_from(fields)?)
            },
        })
    }

    fn from_tagged(tag: &str, mut map: serde_json::Map<String, JsonValue>) -> anyhow::Result<Self> {
        let value = map
            .remove(VALUE_FIELD)
            .ok_or_else(|| ErrorMetadata::invalid_value("InvalidTaggedValue", format!("{tag} wrapper missing \"value\"")))?;
        match tag {
            BIGINT_TAG => {
                let s = value.as_str().ok_or_else(|| {
                    ErrorMetadata::invalid_value("InvalidTaggedValue", "bigint wrapper's value must be a string")
                })?;
                Ok(ConvexValue::Int64(parse_int64_decimal(s)?))
            },
            BYTES_TAG => {
                let arr = value.as_array().ok_or_else(|| {
                    ErrorMetadata::invalid_value("InvalidTaggedValue", "arraybuffer wrapper's value must be an array")
                })?;
                let mut bytes = Vec::with_capacity(arr.len());
                for item in arr {
                    let byte = item
                        .as_u64()
                        .filter(|b| *b <= 255)
                        .ok_or_else(|| {
                            ErrorMetadata::invalid_value("InvalidTaggedValue", "arraybuffer entries must be bytes")
                        })?;
                    bytes.push(byte as u8);
                }
                Ok(ConvexValue::Bytes(ConvexBytes::try_from(bytes)?))
            },
            ID_TAG => {
                let s = value.as_str().ok_or_else(|| {
                    ErrorMetadata::invalid_value("InvalidTaggedValue", "id wrapper's value must be a string")
                })?;
                Ok(ConvexValue::Id(
                    DocumentId::decode(s).map_err(|e| ErrorMetadata::invalid_value("InvalidId", e.to_string()))?,
                ))
            },
            other => anyhow::bail!(ErrorMetadata::invalid_value(
                "InvalidTaggedValue",
                format!("unrecognized __type tag \"{other}\""),
            )),
        }
    }
}

/// Canonical JSON text for a filter literal or a stored document: object
/// keys sorted (guaranteed by `ConvexObject`'s `BTreeMap` backing), so
/// structural equality on the Convex side matches byte equality of the JSON
/// text the storage engine compares with `=` (§4.A rule 3).
pub fn canonical_json_text(value: &ConvexValue) -> String {
    value.to_json().to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn int64_round_trips_through_json() {
        for n in [0i64, -1, i64::MAX, i64::MIN, 42] {
            let v = ConvexValue::Int64(n);
            let json = v.to_json();
            let back = ConvexValue::from_json(json).unwrap();
            assert_eq!(back, v);
        }
    }

    #[test]
    fn bytes_round_trip_through_json() {
        let v = ConvexValue::Bytes(ConvexBytes::try_from(vec![1, 2, 3, 255]).unwrap());
        let json = v.to_json();
        let back = ConvexValue::from_json(json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn id_round_trips_through_json() {
        let id = DocumentId::generate(3);
        let v = ConvexValue::Id(id);
        let back = ConvexValue::from_json(v.to_json()).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn nested_object_round_trips() {
        let mut fields = BTreeMap::new();
        fields.insert("title".parse().unwrap(), ConvexValue::from("hi"));
        fields.insert(
            "tags".parse().unwrap(),
            ConvexValue::Array(vec![ConvexValue::from("a"), ConvexValue::from("b")]),
        );
        let obj = ConvexValue::Object(ConvexObject::try_from(fields).unwrap());
        let back = ConvexValue::from_json(obj.to_json()).unwrap();
        assert_eq!(back, obj);
    }

    #[test]
    fn rejects_unrecognized_tag() {
        let json = json!({ "__type": "nope", "value": "x" });
        assert!(ConvexValue::from_json(json).is_err());
    }
}

//! A document: `_id` and `_creationTime` are immutable system fields (§3
//! invariant) alongside an ordered mapping of user fields.
use std::collections::BTreeMap;

use serde_json::{
    Map as JsonMap,
    Value as JsonValue,
};

use crate::{
    field_name::{
        FieldName,
        CREATION_TIME_FIELD,
        ID_FIELD,
    },
    object::ConvexObject,
    value::ConvexValue,
};

#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub id: crate::document_id::DocumentId,
    /// Monotonic milliseconds since the epoch, assigned at insert (§3).
    pub creation_time: i64,
    pub fields: ConvexObject,
}

impl Document {
    /// The document's user fields plus `_id`/`_creationTime`, ready to
    /// serialize to a client as a single JSON object (§6 `{value}`
    /// responses and `update` frame `data`).
    pub fn to_json(&self) -> JsonValue {
        let mut map = JsonMap::new();
        map.insert(ID_FIELD.to_string(), JsonValue::String(self.id.encode()));
        map.insert(
            CREATION_TIME_FIELD.to_string(),
            JsonValue::from(self.creation_time),
        );
        for (k, v) in self.fields.iter() {
            map.insert(k.to_string(), v.to_json());
        }
        JsonValue::Object(map)
    }

    /// Just the user fields, as stored in the `data` column (§6 persisted
    /// layout) -- `_id`/`_creationTime` live in dedicated columns instead.
    pub fn fields_json(&self) -> JsonValue {
        let mut map = JsonMap::new();
        for (k, v) in self.fields.iter() {
            map.insert(k.to_string(), v.to_json());
        }
        JsonValue::Object(map)
    }

    pub fn fields_from_json(json: JsonValue) -> anyhow::Result<ConvexObject> {
        let JsonValue::Object(map) = json else {
            anyhow::bail!(errors::ErrorMetadata::internal(
                "stored document data column was not a JSON object"
            ));
        };
        let mut fields = BTreeMap::new();
        for (k, v) in map {
            let field: FieldName = k.parse()?;
            fields.insert(field, ConvexValue::from_json(v)?);
        }
        ConvexObject::try_from(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_id::DocumentId;

    #[test]
    fn to_json_includes_system_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("title".parse().unwrap(), ConvexValue::from("hello"));
        let doc = Document {
            id: DocumentId::generate(1),
            creation_time: 1234,
            fields: ConvexObject::try_from(fields).unwrap(),
        };
        let json = doc.to_json();
        assert_eq!(json["_creationTime"], 1234);
        assert_eq!(json["title"], "hello");
        assert!(json["_id"].is_string());
    }

    #[test]
    fn fields_json_round_trips_through_fields_from_json() {
        let mut fields = BTreeMap::new();
        fields.insert("count".parse().unwrap(), ConvexValue::Int64(7));
        let obj = ConvexObject::try_from(fields).unwrap();
        let doc = Document {
            id: DocumentId::generate(2),
            creation_time: 1,
            fields: obj.clone(),
        };
        let restored = Document::fields_from_json(doc.fields_json()).unwrap();
        assert_eq!(restored, obj);
    }
}

//! Conflict classification between a local-pending change and an
//! already-committed server change addressing the same document (§4.D).
use std::collections::BTreeMap;

use value::{
    ConvexObject,
    ConvexValue,
    FieldName,
};

use crate::change::{
    Change,
    ChangeKind,
    ResolvedChange,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictKind {
    DeleteUpdate,
    UpdateDelete,
    FieldConflict,
}

/// One field where `local` and `server` disagree (or one side has it and
/// the other doesn't). `None` means the side didn't carry that field in
/// its change at all -- not the same as the field being explicitly `null`.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDiff {
    pub field: FieldName,
    pub local: Option<ConvexValue>,
    pub server: Option<ConvexValue>,
}

/// Both changes, their field-level diff, and the version gap (§4.D).
#[derive(Clone, Debug)]
pub struct ConflictRecord {
    pub kind: ConflictKind,
    pub local: Change,
    pub server: Change,
    pub field_diff: Vec<FieldDiff>,
    /// `server.version - local.version`.
    pub version_gap: i64,
    /// Set when `version_gap > 1`: the client missed at least one
    /// intervening server update (§4.D).
    pub stale: bool,
}

/// `detect`'s three-way outcome: no conflict, an automatic disjoint-field
/// merge (not reported as a conflict, §4.D), or a real conflict requiring
/// a resolution strategy.
pub enum Detection {
    NoConflict,
    AutoMerged(ResolvedChange),
    Conflict(ConflictRecord),
}

/// Field-by-field diff of two objects, listing every field present in
/// either side where the values differ (or only one side has the field).
pub fn diff_fields(local: &ConvexObject, server: &ConvexObject) -> Vec<FieldDiff> {
    let mut fields: std::collections::BTreeSet<&FieldName> = std::collections::BTreeSet::new();
    fields.extend(local.keys());
    fields.extend(server.keys());
    fields
        .into_iter()
        .filter_map(|field| {
            let l = local.get(field.as_str());
            let s = server.get(field.as_str());
            if l == s {
                return None;
            }
            Some(FieldDiff {
                field: field.clone(),
                local: l.cloned(),
                server: s.cloned(),
            })
        })
        .collect()
}

/// Classify `(local_change, server_change)` addressing the same document
/// (§4.D). Detection is the pure decision table; resolving a `Conflict`
/// into a [`ResolvedChange`] is [`crate::resolver::ConflictResolver`]'s job.
pub fn detect(local: Change, server: Change) -> Detection {
    match (local.kind, server.kind) {
        (ChangeKind::Delete, ChangeKind::Delete) => Detection::NoConflict,
        (ChangeKind::Insert, ChangeKind::Insert) => Detection::NoConflict,
        (ChangeKind::Delete, ChangeKind::Update) => {
            Detection::Conflict(build_record(ConflictKind::DeleteUpdate, local, server))
        },
        (ChangeKind::Update, ChangeKind::Delete) => {
            Detection::Conflict(build_record(ConflictKind::UpdateDelete, local, server))
        },
        _ => {
            // Both update (the common case), or a mixed insert/update pair
            // with no dedicated kind; treat the latter like a field
            // conflict, the conservative choice when unsure rather than
            // silently dropping a disagreement.
            let diff = diff_fields(&local.fields, &server.fields);
            if diff.is_empty() {
                let merged = union_fields(&local.fields, &server.fields);
                return Detection::AutoMerged(ResolvedChange {
                    kind: ChangeKind::Update,
                    fields: merged,
                    version: server.version + 1,
                });
            }
            Detection::Conflict(build_record(ConflictKind::FieldConflict, local, server))
        },
    }
}

fn build_record(kind: ConflictKind, local: Change, server: Change) -> ConflictRecord {
    let field_diff = diff_fields(&local.fields, &server.fields);
    let version_gap = server.version - local.version;
    let stale = version_gap > 1;
    ConflictRecord {
        kind,
        local,
        server,
        field_diff,
        version_gap,
        stale,
    }
}

/// Union of two objects' fields for the no-real-conflict auto-merge path
/// (§4.D: "disjoint fields are unioned"). Fields are known disjoint by the
/// caller (`diff_fields` returned empty), so either side's value is fine
/// wherever both have it.
fn union_fields(local: &ConvexObject, server: &ConvexObject) -> ConvexObject {
    let mut merged: BTreeMap<FieldName, ConvexValue> = BTreeMap::new();
    for (k, v) in local.iter() {
        merged.insert(k.clone(), v.clone());
    }
    for (k, v) in server.iter() {
        merged.insert(k.clone(), v.clone());
    }
    ConvexObject::try_from(merged).expect("union of two valid objects is itself within size limits")
}

#[cfg(test)]
mod tests {
    use value::DocumentId;

    use super::*;

    fn obj(pairs: &[(&str, ConvexValue)]) -> ConvexObject {
        let mut fields = BTreeMap::new();
        for (k, v) in pairs {
            fields.insert(k.parse().unwrap(), v.clone());
        }
        ConvexObject::try_from(fields).unwrap()
    }

    fn change(kind: ChangeKind, fields: ConvexObject, version: i64) -> Change {
        Change::new(DocumentId::generate(1), "messages".parse().unwrap(), kind, fields, version)
    }

    #[test]
    fn both_deletes_is_no_conflict() {
        let local = change(ChangeKind::Delete, ConvexObject::empty(), 1);
        let server = change(ChangeKind::Delete, ConvexObject::empty(), 2);
        assert!(matches!(detect(local, server), Detection::NoConflict));
    }

    #[test]
    fn disjoint_updates_auto_merge() {
        let local = change(ChangeKind::Update, obj(&[("body", ConvexValue::from("hi"))]), 1);
        let server = change(ChangeKind::Update, obj(&[("title", ConvexValue::from("hey"))]), 2);
        match detect(local, server) {
            Detection::AutoMerged(resolved) => {
                assert_eq!(resolved.fields.get("body"), Some(&ConvexValue::from("hi")));
                assert_eq!(resolved.fields.get("title"), Some(&ConvexValue::from("hey")));
                assert_eq!(resolved.version, 3);
            },
            _ => panic!("expected auto-merge"),
        }
    }

    #[test]
    fn overlapping_updates_conflict() {
        let local = change(ChangeKind::Update, obj(&[("title", ConvexValue::from("A")), ("body", ConvexValue::from("X"))]), 1);
        let server = change(ChangeKind::Update, obj(&[("title", ConvexValue::from("B"))]), 2);
        match detect(local, server) {
            Detection::Conflict(record) => {
                assert_eq!(record.kind, ConflictKind::FieldConflict);
                assert_eq!(record.version_gap, 1);
                assert!(!record.stale);
                assert_eq!(record.field_diff.len(), 1);
                assert_eq!(record.field_diff[0].field.as_str(), "title");
            },
            _ => panic!("expected a conflict"),
        }
    }

    #[test]
    fn version_gap_over_one_is_stale() {
        let local = change(ChangeKind::Update, obj(&[("title", ConvexValue::from("A"))]), 1);
        let server = change(ChangeKind::Update, obj(&[("title", ConvexValue::from("B"))]), 4);
        match detect(local, server) {
            Detection::Conflict(record) => {
                assert_eq!(record.version_gap, 3);
                assert!(record.stale);
            },
            _ => panic!("expected a conflict"),
        }
    }

    #[test]
    fn delete_update_and_update_delete_are_classified() {
        let delete = change(ChangeKind::Delete, ConvexObject::empty(), 1);
        let update = change(ChangeKind::Update, obj(&[("title", ConvexValue::from("B"))]), 2);
        match detect(delete.clone(), update.clone()) {
            Detection::Conflict(record) => assert_eq!(record.kind, ConflictKind::DeleteUpdate),
            _ => panic!("expected delete-update conflict"),
        }
        match detect(update, delete) {
            Detection::Conflict(record) => assert_eq!(record.kind, ConflictKind::UpdateDelete),
            _ => panic!("expected update-delete conflict"),
        }
    }
}

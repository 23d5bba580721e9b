//! Resolution strategies over a detected [`ConflictRecord`] (§4.D).
//!
//! The real Convex sync protocol is server-authoritative optimistic
//! concurrency, not a merging CRDT, so this is a pure decision-table
//! component in the style of `database::store`'s field-level `patch` merge
//! and `errors`'s metadata-driven failure reporting, applied to §4.D's
//! resolver contract.
use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    sync::Arc,
};

use errors::ErrorMetadata;
use parking_lot::Mutex;
use value::{
    ConvexObject,
    FieldName,
    TableName,
};

use crate::{
    change::{
        Change,
        ChangeKind,
        ResolvedChange,
    },
    conflict::{
        ConflictKind,
        ConflictRecord,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionStrategy {
    ServerWins,
    ClientWins,
    Merge,
    Manual,
}

/// Per-field override consulted by the `merge` strategy when `local` and
/// `server` disagree on a field (§4.D, §9 "two-level mapping `table ->
/// field -> strategy`").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldMergeStrategy {
    PreferLocal,
    PreferServer,
}

/// Returns the resolved fields for a `manual` conflict. Invoked
/// synchronously; a `Result::Err` (or, in principle, a panic unwound by the
/// caller into one) is surfaced as-is, not swallowed (§4.D failure
/// semantics).
pub type ManualHandler = Arc<dyn Fn(&ConflictRecord) -> anyhow::Result<ResolvedChange> + Send + Sync>;

/// A fully custom resolver, bypassing the built-in strategies entirely
/// (§4.D "custom resolver: a supplied function receives both changes and
/// returns the resolved form").
pub type CustomResolver = Arc<dyn Fn(&Change, &Change) -> anyhow::Result<ResolvedChange> + Send + Sync>;

pub type ConflictListener = Arc<dyn Fn(&ConflictRecord) + Send + Sync>;

/// A version generator for `client-wins` resolutions; defaults to
/// `server.version + 1` (§4.D).
pub type VersionGenerator = Arc<dyn Fn(i64) -> i64 + Send + Sync>;

/// Holds the field-strategy table, the configured manual handler, and the
/// listener registry, and turns a [`ConflictRecord`] plus a
/// [`ResolutionStrategy`] into a [`ResolvedChange`] (§4.D).
#[derive(Clone)]
pub struct ConflictResolver {
    default_merge_strategy: FieldMergeStrategy,
    field_strategies: Arc<Mutex<HashMap<TableName, HashMap<FieldName, FieldMergeStrategy>>>>,
    manual_handler: Arc<Mutex<Option<ManualHandler>>>,
    listeners: Arc<Mutex<Vec<ConflictListener>>>,
    version_generator: VersionGenerator,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(FieldMergeStrategy::PreferServer)
    }
}

impl ConflictResolver {
    pub fn new(default_merge_strategy: FieldMergeStrategy) -> Self {
        Self {
            default_merge_strategy,
            field_strategies: Arc::new(Mutex::new(HashMap::new())),
            manual_handler: Arc::new(Mutex::new(None)),
            listeners: Arc::new(Mutex::new(Vec::new())),
            version_generator: Arc::new(|server_version| server_version + 1),
        }
    }

    pub fn with_version_generator(mut self, generator: VersionGenerator) -> Self {
        self.version_generator = generator;
        self
    }

    pub fn set_field_strategy(&self, table: TableName, field: FieldName, strategy: FieldMergeStrategy) {
        self.field_strategies
            .lock()
            .entry(table)
            .or_default()
            .insert(field, strategy);
    }

    pub fn set_manual_handler(&self, handler: ManualHandler) {
        *self.manual_handler.lock() = Some(handler);
    }

    pub fn add_listener(&self, listener: ConflictListener) {
        self.listeners.lock().push(listener);
    }

    fn notify_listeners(&self, record: &ConflictRecord) {
        for listener in self.listeners.lock().iter() {
            listener(record);
        }
    }

    fn field_strategy(&self, table: &TableName, field: &FieldName) -> FieldMergeStrategy {
        self.field_strategies
            .lock()
            .get(table)
            .and_then(|fields| fields.get(field))
            .copied()
            .unwrap_or(self.default_merge_strategy)
    }

    /// Resolve a conflict per `strategy`, notifying every registered
    /// listener first so audit/UI observers see every conflict before
    /// resolution (§4.D "Listeners").
    pub fn resolve(&self, record: &ConflictRecord, strategy: ResolutionStrategy) -> anyhow::Result<ResolvedChange> {
        self.notify_listeners(record);
        match strategy {
            ResolutionStrategy::ServerWins => Ok(self.resolve_server_wins(record)),
            ResolutionStrategy::ClientWins => Ok(self.resolve_client_wins(record)),
            ResolutionStrategy::Merge => self.resolve_merge(record),
            ResolutionStrategy::Manual => self.resolve_manual(record),
        }
    }

    /// Resolve via a fully custom resolver rather than a built-in strategy
    /// (§4.D "custom resolver"). Listeners still fire.
    pub fn resolve_with_custom(&self, record: &ConflictRecord, resolver: &CustomResolver) -> anyhow::Result<ResolvedChange> {
        self.notify_listeners(record);
        let resolved = resolver(&record.local, &record.server)?;
        validate_resolution(&resolved)?;
        Ok(resolved)
    }

    fn resolve_server_wins(&self, record: &ConflictRecord) -> ResolvedChange {
        // server-wins honors server intent even for delete/update conflicts
        // (§4.D): the server's change (including its kind) wins outright.
        ResolvedChange {
            kind: record.server.kind,
            fields: record.server.fields.clone(),
            version: record.server.version,
        }
    }

    fn resolve_client_wins(&self, record: &ConflictRecord) -> ResolvedChange {
        // client-wins honors local intent (keep delete / keep update) with
        // the version bumped past the server's (§4.D).
        ResolvedChange {
            kind: record.local.kind,
            fields: record.local.fields.clone(),
            version: (self.version_generator)(record.server.version),
        }
    }

    fn resolve_merge(&self, record: &ConflictRecord) -> anyhow::Result<ResolvedChange> {
        if record.kind != ConflictKind::FieldConflict {
            anyhow::bail!(ErrorMetadata::invalid_resolution(format!(
                "merge strategy requires a field-conflict, not {:?}",
                record.kind
            )));
        }
        let mut merged: BTreeMap<FieldName, value::ConvexValue> = BTreeMap::new();
        for (k, v) in record.local.fields.iter() {
            merged.insert(k.clone(), v.clone());
        }
        for (k, v) in record.server.fields.iter() {
            merged.insert(k.clone(), v.clone());
        }
        for diff in &record.field_diff {
            // Only genuine overlaps (present on both sides) consult the
            // field strategy; one-sided fields are already in `merged` from
            // the unions above and must never be dropped by a losing side.
            let (Some(local), Some(server)) = (diff.local.clone(), diff.server.clone()) else {
                continue;
            };
            let winner = match self.field_strategy(&record.local.table, &diff.field) {
                FieldMergeStrategy::PreferLocal => local,
                FieldMergeStrategy::PreferServer => server,
            };
            merged.insert(diff.field.clone(), winner);
        }
        let fields = ConvexObject::try_from(merged)?;
        Ok(ResolvedChange {
            kind: ChangeKind::Update,
            fields,
            version: (self.version_generator)(record.server.version),
        })
    }

    fn resolve_manual(&self, record: &ConflictRecord) -> anyhow::Result<ResolvedChange> {
        let handler = self
            .manual_handler
            .lock()
            .clone()
            .ok_or_else(|| ErrorMetadata::resolver_required(&record.local.table))?;
        let resolved = handler(record)?;
        validate_resolution(&resolved)?;
        Ok(resolved)
    }
}

/// A handler (manual or custom) returning fields missing required keys is
/// a fatal programming error, not a conflict outcome (§4.D
/// `InvalidResolution`). There's nothing schema-aware to check here --
/// that's `database::store`'s job once the resolution is applied -- only
/// that the handler didn't hand back something structurally empty when the
/// conflict wasn't a delete.
fn validate_resolution(resolved: &ResolvedChange) -> anyhow::Result<()> {
    if resolved.kind != ChangeKind::Delete && resolved.version <= 0 {
        anyhow::bail!(ErrorMetadata::invalid_resolution(
            "resolver returned a non-delete resolution with a non-positive version"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{
        AtomicUsize,
        Ordering,
    };

    use value::{
        ConvexValue,
        DocumentId,
    };

    use super::*;
    use crate::conflict::{
        detect,
        Detection,
    };

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

    fn field_conflict() -> ConflictRecord {
        let local = change(ChangeKind::Update, obj(&[("title", ConvexValue::from("A")), ("body", ConvexValue::from("X"))]), 1);
        let server = change(ChangeKind::Update, obj(&[("title", ConvexValue::from("B"))]), 2);
        match detect(local, server) {
            Detection::Conflict(record) => record,
            _ => panic!("expected a conflict"),
        }
    }

    #[test]
    fn server_wins_adopts_server_fields_and_version() {
        let record = field_conflict();
        let resolver = ConflictResolver::default();
        let resolved = resolver.resolve(&record, ResolutionStrategy::ServerWins).unwrap();
        assert_eq!(resolved.fields, record.server.fields);
        assert_eq!(resolved.version, record.server.version);
    }

    #[test]
    fn client_wins_adopts_local_fields_with_bumped_version() {
        let record = field_conflict();
        let resolver = ConflictResolver::default();
        let resolved = resolver.resolve(&record, ResolutionStrategy::ClientWins).unwrap();
        assert_eq!(resolved.fields, record.local.fields);
        assert_eq!(resolved.version, record.server.version + 1);
    }

    #[test]
    fn merge_unions_disjoint_fields_default_server_on_overlap() {
        let record = field_conflict();
        let resolver = ConflictResolver::default();
        let resolved = resolver.resolve(&record, ResolutionStrategy::Merge).unwrap();
        assert_eq!(resolved.fields.get("title"), Some(&ConvexValue::from("B")));
        assert_eq!(resolved.fields.get("body"), Some(&ConvexValue::from("X")));
        assert_eq!(resolved.version, record.server.version + 1);
    }

    #[test]
    fn merge_honors_field_level_override() {
        let record = field_conflict();
        let resolver = ConflictResolver::default();
        resolver.set_field_strategy("messages".parse().unwrap(), "title".parse().unwrap(), FieldMergeStrategy::PreferLocal);
        let resolved = resolver.resolve(&record, ResolutionStrategy::Merge).unwrap();
        assert_eq!(resolved.fields.get("title"), Some(&ConvexValue::from("A")));
    }

    #[test]
    fn manual_without_handler_fails_resolver_required() {
        let record = field_conflict();
        let resolver = ConflictResolver::default();
        let err = resolver.resolve(&record, ResolutionStrategy::Manual).unwrap_err();
        assert_eq!(err.downcast_ref::<ErrorMetadata>().unwrap().code, errors::ErrorCode::ResolverRequired);
    }

    #[test]
    fn manual_invokes_configured_handler() {
        let record = field_conflict();
        let resolver = ConflictResolver::default();
        resolver.set_manual_handler(Arc::new(|record| {
            Ok(ResolvedChange {
                kind: ChangeKind::Update,
                fields: record.server.fields.clone(),
                version: record.server.version + 10,
            })
        }));
        let resolved = resolver.resolve(&record, ResolutionStrategy::Manual).unwrap();
        assert_eq!(resolved.version, record.server.version + 10);
    }

    #[test]
    fn listeners_observe_every_conflict() {
        let record = field_conflict();
        let resolver = ConflictResolver::default();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        resolver.add_listener(Arc::new(move |_record| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));
        resolver.resolve(&record, ResolutionStrategy::ServerWins).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn custom_resolver_bypasses_builtin_strategies() {
        let record = field_conflict();
        let resolver = ConflictResolver::default();
        let custom: CustomResolver = Arc::new(|_local, server| {
            Ok(ResolvedChange {
                kind: ChangeKind::Update,
                fields: server.fields.clone(),
                version: 999,
            })
        });
        let resolved = resolver.resolve_with_custom(&record, &custom).unwrap();
        assert_eq!(resolved.version, 999);
    }

    #[test]
    fn delete_update_client_wins_keeps_local_delete_intent() {
        let local = change(ChangeKind::Delete, ConvexObject::empty(), 1);
        let server = change(ChangeKind::Update, obj(&[("title", ConvexValue::from("B"))]), 2);
        let record = match detect(local, server) {
            Detection::Conflict(record) => record,
            _ => panic!("expected a conflict"),
        };
        let resolver = ConflictResolver::default();
        let resolved = resolver.resolve(&record, ResolutionStrategy::ClientWins).unwrap();
        assert_eq!(resolved.kind, ChangeKind::Delete);
    }
}

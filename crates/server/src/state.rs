//! Shared process state (§4.F: "holds no state of its own beyond `Arc`
//! handles to `DocumentStore`, `SubscriptionHub`, and `Scheduler`").
use std::sync::Arc;

use database::{
    DocumentStore,
    Scheduler,
};
use sync::SubscriptionHub;
use sync_engine::{
    ConflictResolver,
    FieldMergeStrategy,
};

use crate::{
    config::ServerConfig,
    dispatch,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DocumentStore>,
    pub hub: Arc<SubscriptionHub>,
    pub scheduler: Arc<Scheduler>,
    pub resolver: Arc<ConflictResolver>,
}

impl AppState {
    pub fn open(config: &ServerConfig) -> anyhow::Result<Self> {
        let store = Arc::new(if config.db_path.as_str() == ":memory:" {
            DocumentStore::open_in_memory()?
        } else {
            DocumentStore::open(&config.db_path())?
        });
        let hub = Arc::new(
            SubscriptionHub::new(store.clone())
                .with_timing(config.heartbeat_interval_ms, config.reconnect_grace_window_ms),
        );
        hub.spawn_invalidation_listener(store.subscribe_commits());
        hub.spawn_maintenance_loop();

        // A sibling file rather than the document store's own connection,
        // so the scheduler's polling loop never contends with document
        // writes for SQLite's single-writer file lock.
        let scheduler = Arc::new(if config.db_path.as_str() == ":memory:" {
            Scheduler::open_in_memory_with_base_delay(dispatch::as_dispatch_fn(store.clone()), config.scheduler_base_delay_ms)?
        } else {
            let mut scheduler_path = config.db_path();
            scheduler_path.set_extension("scheduler.sqlite3");
            Scheduler::open_with_base_delay(&scheduler_path, dispatch::as_dispatch_fn(store.clone()), config.scheduler_base_delay_ms)?
        });

        Ok(Self {
            store,
            hub,
            scheduler,
            // Last-writer-wins by server value unless a table registers a
            // manual handler or custom resolver (§4.D).
            resolver: Arc::new(ConflictResolver::new(FieldMergeStrategy::PreferServer)),
        })
    }

    pub fn shutdown(&self) {
        self.hub.shutdown();
    }
}

//! Document storage, query translation, invalidation and the scheduler
//! (§4.A, §4.B, §4.E) atop an embedded `rusqlite` database, matching the
//! persisted layout of §6.
pub mod invalidation;
mod persistence;
pub mod query_translate;
pub mod scheduler;
pub mod store;

pub use scheduler::{
    DispatchError,
    DispatchFn,
    ScheduledFunction,
    Scheduler,
    ScheduleStatus,
};
pub use store::{
    CommitEvent,
    DocumentStore,
    Transaction,
};
pub use value::Document;

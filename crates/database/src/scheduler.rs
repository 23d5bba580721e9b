//! A persisted, crash-safe scheduler for delayed, at-least-once function
//! dispatch (§4.E), sharing the `scheduled_functions` table bootstrapped by
//! [`crate::persistence`].
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    time::Duration,
};

use common::{
    knobs::{
        DEFAULT_MAX_RETRIES,
        SCHEDULER_BASE_DELAY_MS,
    },
    sync_types::now_ms,
};
use errors::ErrorCode;
use parking_lot::Mutex;
use rusqlite::{
    params,
    Connection,
    OptionalExtension,
};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::persistence;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScheduleStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl ScheduleStatus {
    fn as_db_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Running => "running",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Failed => "failed",
            ScheduleStatus::Canceled => "canceled",
        }
    }

    fn from_db_str(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "pending" => ScheduleStatus::Pending,
            "running" => ScheduleStatus::Running,
            "completed" => ScheduleStatus::Completed,
            "failed" => ScheduleStatus::Failed,
            "canceled" => ScheduleStatus::Canceled,
            other => anyhow::bail!("unrecognized schedule status {other:?} in storage"),
        })
    }
}

#[derive(Clone, Debug)]
pub struct ScheduledFunction {
    pub id: String,
    pub function_path: String,
    pub args: serde_json::Value,
    pub run_at: i64,
    pub status: ScheduleStatus,
    pub created_at: i64,
    pub completed_at: Option<i64>,
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub retries: u32,
    pub max_retries: u32,
    pub dedupe_key: Option<String>,
}

/// What a dispatcher reports back on failure (§4.E "at-least-once, with
/// exponential backoff retries"). Distinct from [`errors::ErrorMetadata`]
/// because a dispatched function runs out-of-process from the scheduler and
/// only needs to cross this one boundary.
#[derive(Clone, Debug)]
pub struct DispatchError {
    pub message: String,
    pub code: Option<ErrorCode>,
}

impl DispatchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }
}

pub type DispatchFuture = Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send>>;
/// Invoked once per due function; the scheduler itself doesn't know how to
/// actually run a `function_path` against `args` (that's the `server`
/// crate's job, wiring this to a query/mutation/action dispatch table).
pub type DispatchFn = Arc<dyn Fn(String, serde_json::Value) -> DispatchFuture + Send + Sync>;

/// Options accepted by [`Scheduler::run_after`]/[`Scheduler::run_at`].
#[derive(Clone, Debug, Default)]
pub struct ScheduleOptions {
    pub max_retries: Option<u32>,
    /// If a pending row with the same key already exists, that row's id is
    /// returned instead of scheduling a duplicate (§4.E [SUPPLEMENT]).
    pub dedupe_key: Option<String>,
}

pub struct Scheduler {
    conn: Arc<Mutex<Connection>>,
    notify: Arc<Notify>,
    /// §4.E: `run_at = now + 2^retries * base_delay`. Overridable by
    /// `server::ServerConfig` (§1 [AMBIENT] Configuration); defaults to
    /// `common::knobs::SCHEDULER_BASE_DELAY_MS`.
    base_delay_ms: i64,
}

impl Scheduler {
    pub fn open(path: &std::path::Path, dispatch: DispatchFn) -> anyhow::Result<Self> {
        Self::from_connection(Connection::open(path)?, dispatch, SCHEDULER_BASE_DELAY_MS)
    }

    pub fn open_in_memory(dispatch: DispatchFn) -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, dispatch, SCHEDULER_BASE_DELAY_MS)
    }

    /// Like [`Self::open`], but with an explicit `base_delay_ms` in place of
    /// `common::knobs::SCHEDULER_BASE_DELAY_MS`, per `ServerConfig`'s
    /// `--scheduler-base-delay-ms`.
    pub fn open_with_base_delay(path: &std::path::Path, dispatch: DispatchFn, base_delay_ms: i64) -> anyhow::Result<Self> {
        Self::from_connection(Connection::open(path)?, dispatch, base_delay_ms)
    }

    pub fn open_in_memory_with_base_delay(dispatch: DispatchFn, base_delay_ms: i64) -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, dispatch, base_delay_ms)
    }

    fn from_connection(conn: Connection, dispatch: DispatchFn, base_delay_ms: i64) -> anyhow::Result<Self> {
        persistence::bootstrap(&conn)?;
        // Any row left `running` was mid-dispatch when the process last
        // died; at-least-once semantics mean we re-dispatch it (§4.E).
        conn.execute(
            "UPDATE scheduled_functions SET status = 'pending' WHERE status = 'running'",
            [],
        )?;
        let scheduler = Self {
            conn: Arc::new(Mutex::new(conn)),
            notify: Arc::new(Notify::new()),
            base_delay_ms,
        };
        scheduler.spawn_loop(dispatch);
        Ok(scheduler)
    }

    fn spawn_loop(&self, dispatch: DispatchFn) {
        let conn = Arc::clone(&self.conn);
        let notify = Arc::clone(&self.notify);
        let base_delay_ms = self.base_delay_ms;
        tokio::spawn(async move {
            loop {
                let next_run_at = next_pending_run_at(&conn);
                let wait = match next_run_at {
                    Some(run_at) => {
                        let delay = (run_at - now_ms()).max(0) as u64;
                        Duration::from_millis(delay)
                    },
                    None => Duration::from_millis(60_000),
                };
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {},
                    _ = notify.notified() => {},
                }
                while let Some(due) = claim_next_due(&conn) {
                    let dispatch = Arc::clone(&dispatch);
                    let conn = Arc::clone(&conn);
                    let result = (dispatch)(due.function_path.clone(), due.args.clone()).await;
                    record_dispatch_result(&conn, &due, result, base_delay_ms);
                }
            }
        });
    }

    pub fn run_after(&self, delay_ms: i64, function_path: impl Into<String>, args: serde_json::Value) -> anyhow::Result<String> {
        self.run_at(now_ms() + delay_ms, function_path, args, ScheduleOptions::default())
    }

    pub fn run_at(
        &self,
        run_at: i64,
        function_path: impl Into<String>,
        args: serde_json::Value,
        options: ScheduleOptions,
    ) -> anyhow::Result<String> {
        let conn = self.conn.lock();
        if let Some(dedupe_key) = &options.dedupe_key {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM scheduled_functions WHERE dedupe_key = ?1 AND status = 'pending'",
                    params![dedupe_key],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = existing {
                return Ok(id);
            }
        }
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO scheduled_functions
                (id, function_path, args, run_at, status, created_at, completed_at, error, error_code, retries, max_retries, dedupe_key)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, NULL, NULL, NULL, 0, ?6, ?7)",
            params![
                id,
                function_path.into(),
                args.to_string(),
                run_at,
                now_ms(),
                options.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
                options.dedupe_key,
            ],
        )?;
        drop(conn);
        self.notify.notify_one();
        Ok(id)
    }

    /// Cancels a function that hasn't run yet. Returns whether this call
    /// performed the pending -> canceled transition (§4.E, §8: "the first
    /// call returns true, subsequent calls return false"); races with
    /// firing return false rather than erroring.
    pub fn cancel(&self, id: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE scheduled_functions SET status = 'canceled' WHERE id = ?1 AND status = 'pending'",
            params![id],
        )?;
        Ok(changed > 0)
    }

    pub fn get(&self, id: &str) -> anyhow::Result<Option<ScheduledFunction>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(SELECT_COLUMNS_WHERE_ID, params![id], row_to_scheduled_function)
            .optional()?;
        row.transpose()
    }

    pub fn list(&self, status: Option<ScheduleStatus>) -> anyhow::Result<Vec<ScheduledFunction>> {
        let conn = self.conn.lock();
        let mut out = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE status = ?1 ORDER BY run_at ASC"))?;
                let rows = stmt.query_map(params![status.as_db_str()], row_to_scheduled_function)?;
                for row in rows {
                    out.push(row??);
                }
            },
            None => {
                let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY run_at ASC"))?;
                let rows = stmt.query_map([], row_to_scheduled_function)?;
                for row in rows {
                    out.push(row??);
                }
            },
        }
        Ok(out)
    }
}

const SELECT_COLUMNS: &str = "SELECT id, function_path, args, run_at, status, created_at, completed_at, error, error_code, retries, max_retries, dedupe_key FROM scheduled_functions";
const SELECT_COLUMNS_WHERE_ID: &str = "SELECT id, function_path, args, run_at, status, created_at, completed_at, error, error_code, retries, max_retries, dedupe_key FROM scheduled_functions WHERE id = ?1";

type Row<'a, 'b> = &'a rusqlite::Row<'b>;

fn row_to_scheduled_function(row: Row) -> rusqlite::Result<anyhow::Result<ScheduledFunction>> {
    let id: String = row.get(0)?;
    let function_path: String = row.get(1)?;
    let args_text: String = row.get(2)?;
    let run_at: i64 = row.get(3)?;
    let status_text: String = row.get(4)?;
    let created_at: i64 = row.get(5)?;
    let completed_at: Option<i64> = row.get(6)?;
    let error: Option<String> = row.get(7)?;
    let error_code_text: Option<String> = row.get(8)?;
    let retries: u32 = row.get(9)?;
    let max_retries: u32 = row.get(10)?;
    let dedupe_key: Option<String> = row.get(11)?;
    Ok((|| {
        let args = serde_json::from_str(&args_text)?;
        let status = ScheduleStatus::from_db_str(&status_text)?;
        let error_code = error_code_text
            .map(|s| serde_json::from_value::<ErrorCode>(serde_json::Value::String(s)))
            .transpose()?;
        Ok(ScheduledFunction {
            id,
            function_path,
            args,
            run_at,
            status,
            created_at,
            completed_at,
            error,
            error_code,
            retries,
            max_retries,
            dedupe_key,
        })
    })())
}

fn next_pending_run_at(conn: &Arc<Mutex<Connection>>) -> Option<i64> {
    let conn = conn.lock();
    conn.query_row(
        "SELECT MIN(run_at) FROM scheduled_functions WHERE status = 'pending'",
        [],
        |row| row.get(0),
    )
    .ok()
    .flatten()
}

/// Atomically claims the earliest pending, due row by flipping it to
/// `running` -- the same "mark before dispatch" step that makes a crash
/// mid-dispatch recoverable on restart (§4.E).
fn claim_next_due(conn: &Arc<Mutex<Connection>>) -> Option<ScheduledFunction> {
    let conn = conn.lock();
    let now = now_ms();
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM scheduled_functions WHERE status = 'pending' AND run_at <= ?1 ORDER BY run_at ASC LIMIT 1",
            params![now],
            |row| row.get(0),
        )
        .optional()
        .ok()
        .flatten()?;
    conn.execute(
        "UPDATE scheduled_functions SET status = 'running' WHERE id = ?1",
        params![id],
    )
    .ok()?;
    conn.query_row(SELECT_COLUMNS_WHERE_ID, params![id], row_to_scheduled_function)
        .optional()
        .ok()
        .flatten()
        .and_then(|r| r.ok())
}

fn record_dispatch_result(conn: &Arc<Mutex<Connection>>, due: &ScheduledFunction, result: Result<(), DispatchError>, base_delay_ms: i64) {
    let conn = conn.lock();
    match result {
        Ok(()) => {
            let _ = conn.execute(
                "UPDATE scheduled_functions SET status = 'completed', completed_at = ?1 WHERE id = ?2",
                params![now_ms(), due.id],
            );
        },
        Err(e) => {
            if due.retries >= due.max_retries {
                let code = e.code.map(|c| serde_json::to_value(c).ok()).flatten().and_then(|v| v.as_str().map(String::from));
                let _ = conn.execute(
                    "UPDATE scheduled_functions SET status = 'failed', completed_at = ?1, error = ?2, error_code = ?3, retries = ?4 WHERE id = ?5",
                    params![now_ms(), e.message, code, due.retries, due.id],
                );
            } else {
                // Exponential backoff (§4.E): run_at = now + 2^retries * base_delay,
                // using the pre-increment retry count for both the guard and exponent.
                let backoff = base_delay_ms * (1i64 << due.retries.min(20));
                let _ = conn.execute(
                    "UPDATE scheduled_functions SET status = 'pending', run_at = ?1, error = ?2, retries = ?3 WHERE id = ?4",
                    params![now_ms() + backoff, e.message, due.retries + 1, due.id],
                );
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{
        AtomicUsize,
        Ordering,
    };

    use super::*;

    fn noop_dispatch() -> DispatchFn {
        Arc::new(|_path, _args| Box::pin(async { Ok(()) }))
    }

    #[tokio::test]
    async fn run_after_schedules_a_pending_function() {
        let scheduler = Scheduler::open_in_memory(noop_dispatch()).unwrap();
        let id = scheduler.run_after(60_000, "jobs:cleanup", serde_json::json!({})).unwrap();
        let found = scheduler.get(&id).unwrap().unwrap();
        assert_eq!(found.status, ScheduleStatus::Pending);
        assert_eq!(found.function_path, "jobs:cleanup");
    }

    #[tokio::test]
    async fn dedupe_key_reuses_the_pending_row() {
        let scheduler = Scheduler::open_in_memory(noop_dispatch()).unwrap();
        let options = ScheduleOptions {
            max_retries: None,
            dedupe_key: Some("daily-digest".to_string()),
        };
        let a = scheduler
            .run_at(now_ms() + 60_000, "jobs:digest", serde_json::json!({}), options.clone())
            .unwrap();
        let b = scheduler
            .run_at(now_ms() + 60_000, "jobs:digest", serde_json::json!({}), options)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(scheduler.list(Some(ScheduleStatus::Pending)).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancel_is_a_noop_for_already_completed_function() {
        let scheduler = Scheduler::open_in_memory(noop_dispatch()).unwrap();
        let id = scheduler.run_after(60_000, "jobs:once", serde_json::json!({})).unwrap();
        assert!(scheduler.cancel(&id).unwrap());
        assert!(!scheduler.cancel(&id).unwrap());
        assert_eq!(scheduler.get(&id).unwrap().unwrap().status, ScheduleStatus::Canceled);
    }

    #[tokio::test]
    async fn function_eventually_dispatches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let dispatch: DispatchFn = Arc::new(move |_path, _args| {
            let calls = Arc::clone(&calls_clone);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        let scheduler = Scheduler::open_in_memory(dispatch).unwrap();
        let id = scheduler.run_after(0, "jobs:now", serde_json::json!({})).unwrap();
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Some(found) = scheduler.get(&id).unwrap() {
                if found.status == ScheduleStatus::Completed {
                    break;
                }
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.get(&id).unwrap().unwrap().status, ScheduleStatus::Completed);
    }
}

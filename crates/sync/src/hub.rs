//! The subscription registry, push delivery, and reconnection (§4.C).
use std::{
    collections::HashMap,
    sync::Arc,
};

use common::{
    knobs::{
        HEARTBEAT_INTERVAL_MS,
        HEARTBEAT_MISS_THRESHOLD,
        RECONNECT_GRACE_WINDOW_MS,
    },
    sha256::hex_digest_json,
    sync_types::{
        now_ms,
        SeqNumber,
        SessionId,
        SubscriptionId,
    },
};
use database::CommitEvent;
use errors::ErrorMetadata;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::{
    executor::QueryExecutor,
    metrics,
    protocol::ServerFrame,
};

/// Where a hub sends frames for one connected session. The `server` crate
/// implements this over an actual WebSocket sink; tests use an in-memory
/// one. `try_send` reports back-pressure rather than blocking (§4.C
/// "Back-pressure"): suspension points belong to the transport, not the
/// hub (§5).
pub trait PushTransport: Send + Sync {
    fn try_send(&self, frame: ServerFrame) -> Result<(), ServerFrame>;
}

/// Authentication is consumed as an opaque principal (§1): the core does
/// not verify tokens. The default passthrough treats the token itself as
/// the principal, which is enough to exercise `authenticate`/`on_write`
/// end to end; a real deployment supplies a real verifier.
pub trait PrincipalVerifier: Send + Sync {
    fn verify(&self, token: &str) -> anyhow::Result<String>;
}

pub struct PassthroughVerifier;

impl PrincipalVerifier for PassthroughVerifier {
    fn verify(&self, token: &str) -> anyhow::Result<String> {
        Ok(token.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionLifecycle {
    Connected,
    Reconnecting,
    Closed,
}

struct ClientSession {
    lifecycle: SessionLifecycle,
    transport: Option<Arc<dyn PushTransport>>,
    principal: Option<String>,
    last_ping: i64,
    reconnect_since: Option<i64>,
    /// Registration order, so reconnect replay can preserve it (§4.C).
    subscriptions: Vec<SubscriptionId>,
}

impl ClientSession {
    fn new() -> Self {
        Self {
            lifecycle: SessionLifecycle::Connected,
            transport: None,
            principal: None,
            last_ping: now_ms(),
            reconnect_since: None,
            subscriptions: Vec::new(),
        }
    }
}

struct SubscriptionEntry {
    client: SessionId,
    query_path: String,
    args: serde_json::Value,
    last_result_hash: Option<String>,
    last_result: serde_json::Value,
    next_seq: SeqNumber,
    refcount: u32,
}

struct HubState {
    sessions: HashMap<SessionId, ClientSession>,
    subs: HashMap<SubscriptionId, SubscriptionEntry>,
}

/// A `(subscription_id, data, seq)` frame payload produced by `subscribe`
/// or by a reconnect replay, left for the caller (the `server` crate's WS
/// handler) to wrap with whatever wire-level correlation token the client
/// originally supplied.
#[derive(Debug, Clone)]
pub struct PushPayload {
    pub subscription_id: SubscriptionId,
    pub data: serde_json::Value,
    pub seq: SeqNumber,
}

/// Registry of live subscriptions, result caching, push delivery, and
/// reconnection (§4.C). Cheaply `Clone`: internal state is `Arc`-shared.
#[derive(Clone)]
pub struct SubscriptionHub {
    state: Arc<Mutex<HubState>>,
    executor: Arc<dyn QueryExecutor>,
    verifier: Arc<dyn PrincipalVerifier>,
    /// §4.C: "missing 3x T transitions the session to Reconnecting".
    /// Overridable by `server::ServerConfig` (§1 [AMBIENT] Configuration);
    /// defaults to `common::knobs::HEARTBEAT_INTERVAL_MS`.
    heartbeat_timeout_ms: i64,
    /// §4.C: configurable TTL a dropped session's subscriptions survive for.
    reconnect_grace_window_ms: i64,
}

impl SubscriptionHub {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                sessions: HashMap::new(),
                subs: HashMap::new(),
            })),
            executor,
            verifier: Arc::new(PassthroughVerifier),
            heartbeat_timeout_ms: HEARTBEAT_INTERVAL_MS * HEARTBEAT_MISS_THRESHOLD as i64,
            reconnect_grace_window_ms: RECONNECT_GRACE_WINDOW_MS,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn PrincipalVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Overrides the heartbeat interval and reconnect grace window this hub
    /// enforces, per `ServerConfig`'s `--heartbeat-interval-ms`/
    /// `--reconnect-grace-window-ms` (§1 [AMBIENT] Configuration).
    pub fn with_timing(mut self, heartbeat_interval_ms: i64, reconnect_grace_window_ms: i64) -> Self {
        self.heartbeat_timeout_ms = heartbeat_interval_ms * HEARTBEAT_MISS_THRESHOLD as i64;
        self.reconnect_grace_window_ms = reconnect_grace_window_ms;
        self
    }

    /// `Disconnected -> Connected` or `Reconnecting -> Connected` (§4.C).
    /// Returns the replay payloads for every subscription retained from a
    /// prior connection, in registration order, with fresh `seq` counters
    /// starting at 1 (§4.C, §8 scenario 2).
    pub fn connect(&self, session: SessionId, transport: Arc<dyn PushTransport>) -> Vec<PushPayload> {
        let mut state = self.state.lock();
        let was_reconnecting = state
            .sessions
            .get(&session)
            .map(|s| s.lifecycle == SessionLifecycle::Reconnecting)
            .unwrap_or(false);
        let entry = state.sessions.entry(session).or_insert_with(ClientSession::new);
        entry.lifecycle = SessionLifecycle::Connected;
        entry.transport = Some(transport);
        entry.last_ping = now_ms();
        entry.reconnect_since = None;

        if !was_reconnecting {
            return Vec::new();
        }
        let sub_ids = entry.subscriptions.clone();
        let mut replay = Vec::with_capacity(sub_ids.len());
        for sub_id in sub_ids {
            if let Some(sub) = state.subs.get_mut(&sub_id) {
                sub.next_seq = 2;
                replay.push(PushPayload {
                    subscription_id: sub_id,
                    data: sub.last_result.clone(),
                    seq: 1,
                });
            }
        }
        replay
    }

    /// `Connected -> Reconnecting` (§4.C): subscriptions are retained, but
    /// no frames are emitted until the client reconnects within the grace
    /// window.
    pub fn disconnect(&self, session: SessionId) {
        let mut state = self.state.lock();
        if let Some(entry) = state.sessions.get_mut(&session) {
            entry.lifecycle = SessionLifecycle::Reconnecting;
            entry.transport = None;
            entry.reconnect_since = Some(now_ms());
        }
    }

    pub fn heartbeat(&self, session: SessionId) {
        let mut state = self.state.lock();
        if let Some(entry) = state.sessions.get_mut(&session) {
            entry.last_ping = now_ms();
        }
    }

    pub fn authenticate(&self, session: SessionId, token: &str) -> anyhow::Result<()> {
        let principal = self.verifier.verify(token)?;
        let mut state = self.state.lock();
        let entry = state.sessions.entry(session).or_insert_with(ClientSession::new);
        entry.principal = Some(principal);
        Ok(())
    }

    /// `subscribe` (§4.C): deterministic id from `(client, query_path,
    /// hash(args))` so repeated calls dedup and are idempotent. Runs the
    /// query once up front ("Initial push: as soon as first result
    /// computed").
    pub fn subscribe(&self, session: SessionId, query_path: String, args: serde_json::Value) -> anyhow::Result<PushPayload> {
        let args_hash = hex_digest_json(&args);
        let sub_id = SubscriptionId::derive(session, &query_path, &args_hash);

        let mut state = self.state.lock();
        if let Some(existing) = state.subs.get_mut(&sub_id) {
            existing.refcount += 1;
            return Ok(PushPayload {
                subscription_id: sub_id,
                data: existing.last_result.clone(),
                seq: existing.next_seq.saturating_sub(1).max(1),
            });
        }
        drop(state);

        let data = self.executor.execute(&query_path, &args)?;
        let hash = hex_digest_json(&data);

        let mut state = self.state.lock();
        state.subs.insert(
            sub_id,
            SubscriptionEntry {
                client: session,
                query_path,
                args,
                last_result_hash: Some(hash),
                last_result: data.clone(),
                next_seq: 2,
                refcount: 1,
            },
        );
        state
            .sessions
            .entry(session)
            .or_insert_with(ClientSession::new)
            .subscriptions
            .push(sub_id);
        metrics::set_active_subscriptions(state.subs.len());
        Ok(PushPayload {
            subscription_id: sub_id,
            data,
            seq: 1,
        })
    }

    /// Idempotent (§8): repeated calls after the first succeed with no
    /// effect.
    pub fn unsubscribe(&self, subscription_id: SubscriptionId) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        let Some(entry) = state.subs.get_mut(&subscription_id) else {
            return Ok(());
        };
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount == 0 {
            let client = entry.client;
            state.subs.remove(&subscription_id);
            if let Some(session) = state.sessions.get_mut(&client) {
                session.subscriptions.retain(|id| *id != subscription_id);
            }
            metrics::set_active_subscriptions(state.subs.len());
        }
        Ok(())
    }

    /// `on_write` (§4.C): re-executes every subscription `InvalidationBus`
    /// says might be affected, pushing only on an actual result change.
    /// Commits arrive one at a time from [`Self::spawn_invalidation_listener`],
    /// so pushes for one subscription are delivered in commit order (§5).
    pub fn on_write(&self, event: &CommitEvent) {
        let candidates: Vec<(SubscriptionId, String)> = {
            let state = self.state.lock();
            state
                .subs
                .iter()
                .map(|(id, sub)| (*id, sub.query_path.clone()))
                .collect()
        };
        let affected = database::invalidation::affected_subscriptions(
            &event.table,
            candidates.iter().map(|(id, path)| (*id, path.as_str())),
        );
        for sub_id in affected {
            self.revalidate_one(sub_id);
        }
    }

    fn revalidate_one(&self, sub_id: SubscriptionId) {
        let (query_path, args, client) = {
            let state = self.state.lock();
            let Some(sub) = state.subs.get(&sub_id) else {
                return;
            };
            (sub.query_path.clone(), sub.args.clone(), sub.client)
        };
        let _timer = metrics::time_revalidation();
        let data = match self.executor.execute(&query_path, &args) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(%sub_id, error = %err, "subscription re-execution failed");
                return;
            },
        };
        let new_hash = hex_digest_json(&data);

        let mut state = self.state.lock();
        let Some(sub) = state.subs.get_mut(&sub_id) else {
            return;
        };
        if sub.last_result_hash.as_deref() == Some(new_hash.as_str()) {
            return;
        }
        sub.last_result_hash = Some(new_hash);
        sub.last_result = data.clone();
        let seq = sub.next_seq;
        sub.next_seq += 1;

        let Some(session) = state.sessions.get_mut(&client) else {
            return;
        };
        // Reconnecting sessions keep their cache current but receive no
        // frames until they reconnect (§4.C).
        if session.lifecycle != SessionLifecycle::Connected {
            return;
        }
        let Some(transport) = session.transport.clone() else {
            return;
        };
        let frame = ServerFrame::Update {
            subscription_id: sub_id.to_string(),
            data,
            seq,
        };
        // Back-pressure (§4.C): on a full send buffer we simply drop the
        // frame. The sequence number already advanced, so the client
        // observes the gap; the next successful push carries the latest
        // result regardless, coalescing the dropped updates away.
        match transport.try_send(frame) {
            Ok(()) => metrics::record_push(),
            Err(_) => metrics::record_dropped_push(),
        }
    }

    /// Periodic sweep implementing the heartbeat-miss and reconnect
    /// grace-window rules (§4.C, §5 "reconnect grace-window timer" is a
    /// suspension point; this task is where that suspension lives).
    pub fn spawn_maintenance_loop(&self) -> tokio::task::JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(1_000));
            loop {
                interval.tick().await;
                hub.run_maintenance_pass();
            }
        })
    }

    pub fn run_maintenance_pass(&self) {
        let now = now_ms();
        let heartbeat_timeout = self.heartbeat_timeout_ms;
        let mut state = self.state.lock();
        let mut to_close = Vec::new();
        for (session_id, session) in state.sessions.iter_mut() {
            match session.lifecycle {
                SessionLifecycle::Connected if now - session.last_ping > heartbeat_timeout => {
                    session.lifecycle = SessionLifecycle::Reconnecting;
                    session.transport = None;
                    session.reconnect_since = Some(now);
                },
                SessionLifecycle::Reconnecting => {
                    if let Some(since) = session.reconnect_since {
                        if now - since > self.reconnect_grace_window_ms {
                            to_close.push(*session_id);
                        }
                    }
                },
                _ => {},
            }
        }
        for session_id in to_close {
            if let Some(session) = state.sessions.get_mut(&session_id) {
                session.lifecycle = SessionLifecycle::Closed;
                for sub_id in std::mem::take(&mut session.subscriptions) {
                    state.subs.remove(&sub_id);
                }
            }
        }
    }

    /// Subscribes to `DocumentStore`'s commit events and drives `on_write`
    /// for each one, sequentially, preserving per-subscription commit
    /// ordering (§5). Intended to be spawned once per process.
    pub fn spawn_invalidation_listener(&self, mut commits: broadcast::Receiver<CommitEvent>) -> tokio::task::JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            loop {
                match commits.recv().await {
                    Ok(event) => hub.on_write(&event),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Server shutdown (§5): drains the registry, notifying each live
    /// subscription of termination before clearing all state.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        let sub_ids: Vec<SubscriptionId> = state.subs.keys().copied().collect();
        for sub_id in sub_ids {
            let Some(sub) = state.subs.get(&sub_id) else { continue };
            let client = sub.client;
            if let Some(session) = state.sessions.get(&client) {
                if let Some(transport) = &session.transport {
                    let _ = transport.try_send(ServerFrame::Error {
                        subscription_id: Some(sub_id.to_string()),
                        message: "server is shutting down".to_string(),
                        code: "Internal".to_string(),
                    });
                }
            }
        }
        state.subs.clear();
        state.sessions.clear();
        metrics::set_active_subscriptions(0);
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().subs.len()
    }
}

/// Used by callers that need to surface an unknown-session error instead
/// of the hub's usual lenient no-op handling (e.g. the `server` crate's
/// `/api/*` handlers, which operate outside a live WS session).
pub fn unknown_session(session: SessionId) -> anyhow::Error {
    ErrorMetadata::not_found("UnknownSession", format!("no session {session}")).into()
}

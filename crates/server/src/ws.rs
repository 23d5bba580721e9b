//! The `/api/sync` WebSocket endpoint (§6): frames from [`sync::protocol`]
//! carried over an `axum` upgrade, pushed through a [`sync::SubscriptionHub`].
//! Split into three loops (receive / send / worker) over this core's
//! query-path subscriptions.
use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::{
        ws::{
            Message,
            WebSocket,
            WebSocketUpgrade,
        },
        State,
    },
    response::IntoResponse,
};
use common::sync_types::{
    SessionId,
    SubscriptionId as InternalSubscriptionId,
};
use futures::{
    SinkExt,
    StreamExt,
};
use sync::{
    ClientFrame,
    PushTransport,
    ServerFrame,
    SUPPORTED_SUBPROTOCOLS,
};
use tokio::sync::mpsc;

use crate::state::AppState;

/// Bridges the hub's [`PushTransport`] (synchronous, back-pressure-aware)
/// to an async per-connection channel the send loop drains.
struct ChannelTransport {
    sender: mpsc::Sender<ServerFrame>,
}

impl PushTransport for ChannelTransport {
    fn try_send(&self, frame: ServerFrame) -> Result<(), ServerFrame> {
        self.sender.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(frame) => frame,
            mpsc::error::TrySendError::Closed(frame) => frame,
        })
    }
}

const HEARTBEAT_PING_INTERVAL: Duration = Duration::from_secs(10);

/// `?session=<uuid>` lets a reconnecting client identify itself to the hub
/// as the same `SessionId` it used before the drop, so `hub.connect`
/// recognizes the reconnect and `hub.subscribe`'s dedup-by-`(session,
/// query_path, args)` returns cached results immediately when the client
/// re-declares its subscriptions (§4.C). A client that omits it is treated
/// as brand new.
#[derive(serde::Deserialize)]
pub struct SyncQuery {
    session: Option<uuid::Uuid>,
}

pub async fn sync_handler(
    State(state): State<Arc<AppState>>,
    axum::extract::Query(query): axum::extract::Query<SyncQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let session = query.session.map(SessionId).unwrap_or_else(SessionId::new);
    ws.protocols(SUPPORTED_SUBPROTOCOLS)
        .on_upgrade(move |socket| handle_socket(socket, state, session))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, session: SessionId) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<ServerFrame>(common::knobs::SUBSCRIBER_SEND_BUFFER_LIMIT);

    // The hub's own reconnect replay (`connect`'s return value) covers a
    // client that reconnects without resending `subscribe` frames; since
    // this gateway doesn't persist wire-token mappings across sockets, we
    // don't have a client-visible id to attach that replay to, so a
    // reconnecting client is expected to re-declare the subscriptions it
    // still wants (cheap, since dedup makes that idempotent).
    let _ = state.hub.connect(session, Arc::new(ChannelTransport { sender: frame_tx }));

    // Maps this connection's client-chosen wire tokens to the hub's
    // internal deterministic ids, and back (§6 vs §4.C -- see
    // `sync::protocol::ClientFrame::Subscribe` doc comment).
    let mut wire_to_internal: HashMap<String, InternalSubscriptionId> = HashMap::new();
    let mut internal_to_wire: HashMap<InternalSubscriptionId, String> = HashMap::new();

    let mut ping_ticker = tokio::time::interval(HEARTBEAT_PING_INTERVAL);

    loop {
        tokio::select! {
            _ = ping_ticker.tick() => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            },
            outgoing = frame_rx.recv() => {
                let Some(frame) = outgoing else { break };
                let translated = translate_outgoing(frame, &internal_to_wire);
                let Ok(text) = serde_json::to_string(&translated) else { continue };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            },
            incoming = ws_rx.next() => {
                let Some(message) = incoming else { break };
                match message {
                    Ok(Message::Text(text)) => {
                        handle_client_frame(
                            &text,
                            session,
                            &state,
                            &mut ws_tx,
                            &mut wire_to_internal,
                            &mut internal_to_wire,
                        ).await;
                    },
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                        state.hub.heartbeat(session);
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(Message::Binary(_)) => continue,
                    Err(_) => break,
                }
            },
        }
    }

    for wire_id in wire_to_internal.into_values() {
        let _ = state.hub.unsubscribe(wire_id);
    }
    state.hub.disconnect(session);
}

fn translate_outgoing(frame: ServerFrame, internal_to_wire: &HashMap<InternalSubscriptionId, String>) -> ServerFrame {
    match frame {
        ServerFrame::Update { subscription_id, data, seq } => {
            let wire_id = resolve_wire_id(&subscription_id, internal_to_wire);
            ServerFrame::Update {
                subscription_id: wire_id,
                data,
                seq,
            }
        },
        ServerFrame::Error { subscription_id, message, code } => {
            let wire_id = subscription_id.map(|id| resolve_wire_id(&id, internal_to_wire));
            ServerFrame::Error {
                subscription_id: wire_id,
                message,
                code,
            }
        },
        other => other,
    }
}

fn resolve_wire_id(internal_id_str: &str, internal_to_wire: &HashMap<InternalSubscriptionId, String>) -> String {
    internal_id_str
        .parse::<uuid::Uuid>()
        .ok()
        .map(InternalSubscriptionId)
        .and_then(|id| internal_to_wire.get(&id).cloned())
        .unwrap_or_else(|| internal_id_str.to_string())
}

async fn handle_client_frame(
    text: &str,
    session: SessionId,
    state: &Arc<AppState>,
    ws_tx: &mut futures::stream::SplitSink<WebSocket, Message>,
    wire_to_internal: &mut HashMap<String, InternalSubscriptionId>,
    internal_to_wire: &mut HashMap<InternalSubscriptionId, String>,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            let _ = send_frame(ws_tx, ServerFrame::from_error(None, &anyhow::anyhow!(err))).await;
            return;
        },
    };
    match frame {
        ClientFrame::Authenticate { token } => match state.hub.authenticate(session, &token) {
            Ok(()) => {
                let _ = send_frame(ws_tx, ServerFrame::Authenticated {}).await;
            },
            Err(err) => {
                let _ = send_frame(ws_tx, ServerFrame::from_error(None, &err)).await;
            },
        },
        ClientFrame::Subscribe {
            subscription_id,
            query_path,
            args,
        } => {
            if wire_to_internal.contains_key(&subscription_id) {
                // Idempotent resubscribe with the same wire token (§8).
                let _ = send_frame(ws_tx, ServerFrame::Subscribed { subscription_id }).await;
                return;
            }
            match state.hub.subscribe(session, query_path, args) {
                Ok(payload) => {
                    wire_to_internal.insert(subscription_id.clone(), payload.subscription_id);
                    internal_to_wire.insert(payload.subscription_id, subscription_id.clone());
                    let _ = send_frame(ws_tx, ServerFrame::Subscribed { subscription_id: subscription_id.clone() }).await;
                    let _ = send_frame(
                        ws_tx,
                        ServerFrame::Update {
                            subscription_id,
                            data: payload.data,
                            seq: payload.seq,
                        },
                    )
                    .await;
                },
                Err(err) => {
                    let _ = send_frame(ws_tx, ServerFrame::from_error(Some(subscription_id), &err)).await;
                },
            }
        },
        ClientFrame::Unsubscribe { subscription_id } => {
            if let Some(internal_id) = wire_to_internal.remove(&subscription_id) {
                internal_to_wire.remove(&internal_id);
                let _ = state.hub.unsubscribe(internal_id);
            }
        },
        ClientFrame::Ping {} => {
            state.hub.heartbeat(session);
            let _ = send_frame(ws_tx, ServerFrame::Pong {}).await;
        },
    }
}

async fn send_frame(ws_tx: &mut futures::stream::SplitSink<WebSocket, Message>, frame: ServerFrame) -> anyhow::Result<()> {
    let text = serde_json::to_string(&frame)?;
    ws_tx.send(Message::Text(text.into())).await?;
    Ok(())
}

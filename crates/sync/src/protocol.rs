//! The wire protocol (§6): JSON frames over a WebSocket-style upgrade, plus
//! the upgrade handshake itself.
use common::sync_types::SeqNumber;
use errors::ErrorMetadata;
use serde::{
    Deserialize,
    Serialize,
};
use sha1::{
    Digest,
    Sha1,
};

/// Client -> server frames (§6). `subscriptionId` is a client-chosen
/// opaque token, round-tripped verbatim in `subscribed`/`update`/`error`
/// frames so the client can correlate responses without waiting on a
/// server-assigned id; the server's own dedup id for the *registry* entry
/// (§4.C, deterministic from `(client, query_path, hash(args))`) is a
/// separate internal concept the gateway maps to/from this token.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    Authenticate {
        token: String,
    },
    Subscribe {
        subscription_id: String,
        query_path: String,
        args: serde_json::Value,
    },
    Unsubscribe {
        subscription_id: String,
    },
    Ping {},
}

/// Server -> client frames (§6).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    Subscribed {
        subscription_id: String,
    },
    Update {
        subscription_id: String,
        data: serde_json::Value,
        seq: SeqNumber,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        subscription_id: Option<String>,
        message: String,
        code: String,
    },
    Authenticated {},
    Pong {},
}

impl ServerFrame {
    pub fn from_error(subscription_id: Option<String>, err: &anyhow::Error) -> Self {
        let response = errors::ErrorMetadataAnyhowExt::to_error_response(err);
        ServerFrame::Error {
            subscription_id,
            message: response.error,
            code: response.error_code,
        }
    }
}

/// The canonical suffix appended to the client nonce before hashing, fixed
/// by RFC 6455.
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Only WebSocket version 13 is supported (§6).
pub const SUPPORTED_WEBSOCKET_VERSION: &str = "13";

/// Sub-protocols this server offers, in preference order (§6). If the
/// client proposes neither, the server omits the sub-protocol header but
/// still upgrades.
pub const SUPPORTED_SUBPROTOCOLS: [&str; 2] = ["convex-sync-v2", "convex-sync-v1"];

/// Computes the `Sec-WebSocket-Accept` value for a given
/// `Sec-WebSocket-Key` nonce (§6, §8: fixed test vector for
/// `dGhlIHNhbXBsZSBub25jZQ==`).
pub fn accept_key(nonce_base64: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce_base64.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    base64::encode(hasher.finalize())
}

/// Rejects any version other than 13 with a dedicated, client-visible
/// error code (§6).
pub fn validate_websocket_version(version: &str) -> anyhow::Result<()> {
    if version != SUPPORTED_WEBSOCKET_VERSION {
        anyhow::bail!(ErrorMetadata::protocol_error(format!(
            "unsupported WebSocket version \"{version}\"; only {SUPPORTED_WEBSOCKET_VERSION} is supported"
        )));
    }
    Ok(())
}

/// Picks the first subprotocol both sides agree on, preserving our
/// preference order. `None` if the client proposed neither -- not an
/// error, the server still upgrades without one (§6).
pub fn negotiate_subprotocol(requested: &[&str]) -> Option<&'static str> {
    SUPPORTED_SUBPROTOCOLS
        .into_iter()
        .find(|candidate| requested.contains(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc6455_test_vector() {
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn rejects_unsupported_version() {
        assert!(validate_websocket_version("8").is_err());
        assert!(validate_websocket_version("13").is_ok());
    }

    #[test]
    fn negotiates_preferred_subprotocol_when_offered() {
        assert_eq!(negotiate_subprotocol(&["convex-sync-v1", "convex-sync-v2"]), Some("convex-sync-v2"));
        assert_eq!(negotiate_subprotocol(&["convex-sync-v1"]), Some("convex-sync-v1"));
    }

    #[test]
    fn no_subprotocol_is_not_an_error() {
        assert_eq!(negotiate_subprotocol(&["some-other-protocol"]), None);
    }

    #[test]
    fn subscribe_frame_parses_from_json() {
        let json = serde_json::json!({
            "type": "subscribe",
            "subscriptionId": "client-token-1",
            "queryPath": "messages:list",
            "args": {"channel": "general"},
        });
        let frame: ClientFrame = serde_json::from_value(json).unwrap();
        match frame {
            ClientFrame::Subscribe { subscription_id, query_path, .. } => {
                assert_eq!(subscription_id, "client-token-1");
                assert_eq!(query_path, "messages:list");
            },
            _ => panic!("expected Subscribe"),
        }
    }

    #[test]
    fn update_frame_serializes_camel_case() {
        let frame = ServerFrame::Update {
            subscription_id: "abc".to_string(),
            data: serde_json::json!([]),
            seq: 1,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "update");
        assert_eq!(json["subscriptionId"], "abc");
        assert_eq!(json["seq"], 1);
    }
}

//! Identifiers and small helpers shared by the wire protocol and the
//! subscription registry (§3 Subscription, §6).
use std::time::{
    SystemTime,
    UNIX_EPOCH,
};

use serde::{
    Deserialize,
    Serialize,
};
use uuid::Uuid;

/// Identifies one client session / WebSocket connection (§4.C glossary:
/// "Client session").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-side subscription identity (§3 Subscription). Deterministic from
/// `(client, query_path, hash(args))` so repeated `subscribe` calls
/// deduplicate (§4.C).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// A UUIDv5-style deterministic id derived from the session, query
    /// path, and a hash of the args. Using a namespaced hash (rather than a
    /// raw `Uuid::new_v5`, which requires a fixed namespace constant) keeps
    /// this independent of any particular UUID version's bit layout.
    pub fn derive(session: SessionId, query_path: &str, args_hash: &str) -> Self {
        let digest = crate::sha256::hex_digest(
            format!("{}:{}:{}", session.0, query_path, args_hash).as_bytes(),
        );
        // Fold the 32-byte hex digest's raw bytes into a 128-bit value so
        // equal inputs always produce the same id.
        let raw = hex_to_bytes16(&digest);
        Self(Uuid::from_bytes(raw))
    }
}

fn hex_to_bytes16(hex_str: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    let bytes = hex_str.as_bytes();
    for i in 0..16 {
        let hi = (bytes[i * 2] as char).to_digit(16).unwrap_or(0) as u8;
        let lo = (bytes[i * 2 + 1] as char).to_digit(16).unwrap_or(0) as u8;
        out[i] = (hi << 4) | lo;
    }
    out
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic per-subscription sequence number carried by `update` frames
/// (§4.C ordering guarantees, §6).
pub type SeqNumber = u64;

/// Monotonic milliseconds since the epoch (§3 `creation_time`, `run_at`).
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before the epoch")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_id_is_deterministic() {
        let session = SessionId::new();
        let a = SubscriptionId::derive(session, "messages:list", "hash1");
        let b = SubscriptionId::derive(session, "messages:list", "hash1");
        assert_eq!(a, b);
    }

    #[test]
    fn subscription_id_differs_by_args_hash() {
        let session = SessionId::new();
        let a = SubscriptionId::derive(session, "messages:list", "hash1");
        let b = SubscriptionId::derive(session, "messages:list", "hash2");
        assert_ne!(a, b);
    }

    #[test]
    fn now_ms_is_positive_and_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(a > 0);
        assert!(b >= a);
    }
}

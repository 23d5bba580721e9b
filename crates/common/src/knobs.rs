//! Tunable constants not wired to a particular component's API (§4.C,
//! §4.E, §5, §9). Collected in one place rather than scattering magic
//! numbers across the crates that use them.

/// §4.C: "server retains subscription state for up to a configurable TTL,
/// default 60 s".
pub const RECONNECT_GRACE_WINDOW_MS: i64 = 60_000;

/// §4.C: "hub expects client ping every T; missing 3x T transitions the
/// session to Reconnecting". `T` itself.
pub const HEARTBEAT_INTERVAL_MS: i64 = 10_000;

/// §4.C: number of missed heartbeats before a session is downgraded.
pub const HEARTBEAT_MISS_THRESHOLD: u32 = 3;

/// §4.E: `run_at = now + 2^retries * base_delay` on dispatch failure.
pub const SCHEDULER_BASE_DELAY_MS: i64 = 1_000;

/// §4.E: default retry ceiling for a scheduled function that doesn't
/// specify its own.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// §5: default deadline for HTTP request/response operations.
pub const HTTP_REQUEST_TIMEOUT_MS: i64 = 30_000;

/// §4.C back-pressure: client send-buffer depth (in pending frames) past
/// which the hub starts coalescing to only the latest result per
/// subscription.
pub const SUBSCRIBER_SEND_BUFFER_LIMIT: usize = 128;

/// Reconnect jitter/backoff cap for the client-side reconnect actor (not
/// implemented server-side, but the constant is shared so a client built
/// against this core can reuse it).
pub const RECONNECT_MAX_DELAY_MS: i64 = 30_000;

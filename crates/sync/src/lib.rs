//! Wire protocol, query execution, and subscription registry for the
//! reactive backend core's push layer (§4.C, §6).
mod executor;
mod hub;
mod metrics;
mod protocol;

#[cfg(test)]
mod tests;

pub use executor::QueryExecutor;
pub use hub::{
    unknown_session,
    PassthroughVerifier,
    PrincipalVerifier,
    PushPayload,
    PushTransport,
    SubscriptionHub,
};
pub use protocol::{
    accept_key,
    negotiate_subprotocol,
    validate_websocket_version,
    ClientFrame,
    ServerFrame,
    SUPPORTED_SUBPROTOCOLS,
    SUPPORTED_WEBSOCKET_VERSION,
};

//! HTTP/WebSocket gateway (§4.F `ApiGateway`): a thin `axum` router binding
//! [`database::DocumentStore`], [`sync::SubscriptionHub`], and
//! [`database::Scheduler`] to a network transport. Holds no state of its
//! own beyond the `Arc` handles in [`state::AppState`].
pub mod config;
pub mod dispatch;
pub mod http;
pub mod router;
pub mod state;
pub mod ws;

pub use config::ServerConfig;
pub use router::router;
pub use state::AppState;

//! Process configuration (§1 [AMBIENT] Configuration): a `clap`-derived,
//! env-overridable config struct.
use std::{
    net::Ipv4Addr,
    path::PathBuf,
};

use clap::Parser;
use common::knobs::{
    HEARTBEAT_INTERVAL_MS,
    RECONNECT_GRACE_WINDOW_MS,
    SCHEDULER_BASE_DELAY_MS,
};

#[derive(Parser, Clone, Debug)]
#[clap(author = "Convex, Inc. <no-reply@convex.dev>")]
pub struct ServerConfig {
    /// File path for the embedded SQLite store. `:memory:` runs with no
    /// persistence, useful for local development.
    #[clap(long, env = "CONVEX_CORE_DB_PATH", default_value = "convex_core.sqlite3")]
    pub db_path: String,

    /// Host interface to bind to.
    #[clap(long, env = "CONVEX_CORE_INTERFACE", default_value = "0.0.0.0")]
    pub interface: Ipv4Addr,

    /// Port to serve `/api/*` and the WebSocket sync endpoint on.
    #[clap(long, env = "CONVEX_CORE_PORT", default_value = "8080")]
    pub port: u16,

    /// §4.C: how long subscription state survives a dropped connection
    /// before the subscriptions are discarded.
    #[clap(long, env = "CONVEX_CORE_RECONNECT_GRACE_WINDOW_MS", default_value_t = RECONNECT_GRACE_WINDOW_MS)]
    pub reconnect_grace_window_ms: i64,

    /// §4.C: expected interval between client `ping` frames.
    #[clap(long, env = "CONVEX_CORE_HEARTBEAT_INTERVAL_MS", default_value_t = HEARTBEAT_INTERVAL_MS)]
    pub heartbeat_interval_ms: i64,

    /// §4.E: base delay for the scheduler's exponential backoff.
    #[clap(long, env = "CONVEX_CORE_SCHEDULER_BASE_DELAY_MS", default_value_t = SCHEDULER_BASE_DELAY_MS)]
    pub scheduler_base_delay_ms: i64,
}

impl ServerConfig {
    pub fn bind_address(&self) -> std::net::SocketAddr {
        (self.interface, self.port).into()
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.db_path)
    }

    #[cfg(test)]
    pub fn new_for_test() -> anyhow::Result<(Self, tempfile::TempDir)> {
        let dir = tempfile::tempdir()?;
        let db_path = dir.path().join("convex_core.sqlite3");
        let config = Self::try_parse_from([
            "convex-core-server",
            "--db-path",
            db_path.to_str().expect("valid utf8 path"),
            "--port",
            "0",
        ])?;
        Ok((config, dir))
    }
}

//! Process configuration, sourced from environment variables per the
//! external-interfaces contract. Loaded once at startup and threaded
//! through component constructors rather than read ad hoc.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for persisted state (store database, tunnel key tmp files).
    pub data_dir: PathBuf,
    /// Whether the store database is AEAD-sealed on disk.
    pub db_file_encryption: bool,
    /// Override secret for JWT signing. Production should derive this from
    /// the system master key instead; this exists for test/headless use.
    pub jwt_secret: Option<String>,
    pub node_env: String,
    pub ssl_port: Option<u16>,

    /// SSHPool tuning (C5).
    pub max_connections_per_host: usize,
    pub pool_idle_ttl_secs: u64,
    pub pool_create_timeout_secs: u64,
    pub pool_janitor_interval_secs: u64,

    /// MetricsCollector tuning (C7).
    pub metrics_cache_ttl_secs: u64,
    pub metrics_collect_timeout_secs: u64,
    pub liveness_probe_timeout_secs: u64,

    /// TunnelEngine tuning (C8).
    pub tunnel_connect_timeout_secs: u64,
    pub tunnel_connected_grace_secs: u64,
    pub tunnel_ping_interval_secs: u64,
    pub tunnel_manual_disconnect_clear_secs: u64,

    /// UnlockSession idle TTL (C1).
    pub unlock_session_idle_mins: u64,

    /// Store flush-to-disk interval (§6).
    pub store_flush_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./db/data")),
            db_file_encryption: env_bool("DB_FILE_ENCRYPTION", true),
            jwt_secret: std::env::var("JWT_SECRET").ok(),
            node_env: std::env::var("NODE_ENV").unwrap_or_else(|_| "production".to_string()),
            ssl_port: std::env::var("SSL_PORT").ok().and_then(|v| v.parse().ok()),
            max_connections_per_host: 3,
            pool_idle_ttl_secs: 600,
            pool_create_timeout_secs: 30,
            pool_janitor_interval_secs: 300,
            metrics_cache_ttl_secs: 30,
            metrics_collect_timeout_secs: 30,
            liveness_probe_timeout_secs: 5,
            tunnel_connect_timeout_secs: 60,
            tunnel_connected_grace_secs: 2,
            tunnel_ping_interval_secs: 120,
            tunnel_manual_disconnect_clear_secs: 5,
            unlock_session_idle_mins: 30,
            store_flush_interval_secs: 15,
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"),
        Err(_) => default,
    }
}

//! Tunnel state/error types. State is a tagged enum per the design notes'
//! instruction to represent it that way rather than with inheritance.

use serde::{Deserialize, Serialize};

use crate::ssh::client::AuthParams;

/// One endpoint of the reverse tunnel: either the source host the control
/// channel connects to, or the endpoint host the spawned remote `ssh -R`
/// targets.
#[derive(Debug, Clone)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelOrigin {
    Manual,
    Autostart,
}

/// Fully-materialized tunnel connect request: credentials already resolved
/// by [`crate::credential_resolver::CredentialResolver`] (§4.4), so the
/// engine itself does no credential lookups.
#[derive(Debug, Clone)]
pub struct TunnelConnectConfig {
    pub name: String,
    pub source: SshEndpoint,
    pub endpoint_host: String,
    pub endpoint_port: u16,
    pub endpoint_username: String,
    pub endpoint_auth: AuthParams,
    pub source_port: u16,
    pub max_retries: u32,
    pub retry_interval_ms: u64,
    pub origin: TunnelOrigin,
}

impl TunnelConnectConfig {
    /// `TUNNEL_MARKER_<sanitized-name>`: argv[0] tag for the spawned remote
    /// `ssh -R` process so orphans can be reaped via `pkill -f`.
    pub fn marker(&self) -> String {
        format!("TUNNEL_MARKER_{}", sanitize_marker(&self.name))
    }
}

fn sanitize_marker(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TunnelErrorKind {
    AuthenticationFailed,
    ConnectionFailed,
    NetworkError,
    Timeout,
    Unknown,
}

impl TunnelErrorKind {
    /// §4.8 step 4's error classification: only `NetworkError`, `Timeout`,
    /// and `Unknown` are retried.
    pub fn is_retryable(self) -> bool {
        matches!(self, TunnelErrorKind::NetworkError | TunnelErrorKind::Timeout | TunnelErrorKind::Unknown)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TunnelError {
    pub kind: TunnelErrorKind,
    pub message: String,
}

impl TunnelError {
    pub fn new(kind: TunnelErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// The tagged state enum from the design notes:
/// `{Idle, Connecting, Connected, Waiting{nextInSec}, Retrying,
/// Failed{reason}, Disconnected}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TunnelState {
    Idle,
    Connecting,
    Connected,
    Waiting { next_in_sec: u32 },
    Retrying,
    Failed { reason: String, retry_exhausted: bool, error_type: Option<TunnelErrorKind> },
    Disconnected,
}

impl TunnelState {
    pub fn is_connected(&self) -> bool {
        matches!(self, TunnelState::Connected)
    }
}

/// Broadcast record written to the in-memory status map; subscribers poll
/// or read-current rather than receiving pushes, matching §4.8's
/// broadcast contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelStatus {
    pub name: String,
    pub connected: bool,
    pub state: TunnelState,
    pub retry_count: u32,
}

impl TunnelStatus {
    pub fn idle(name: &str) -> Self {
        Self { name: name.to_string(), connected: false, state: TunnelState::Idle, retry_count: 0 }
    }
}

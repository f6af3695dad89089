//! Typed records persisted by the Store. Sensitive fields hold sealed
//! (`v2:...`) strings at rest and are only decrypted on read via
//! [`crate::crypto::CryptoEnvelope`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    /// PHC-format Argon2id hash of the login password.
    pub password_hash: String,
    pub dek_salt: [u8; 32],
    pub wrapped_dek_nonce: [u8; 12],
    pub wrapped_dek_ciphertext: Vec<u8>,
    pub is_admin: bool,
    pub oidc_subject: Option<String>,
    pub totp_secret: Option<String>,
    /// Hashed (never plaintext) one-shot backup codes.
    pub totp_backup_codes: Vec<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    Password,
    Key,
    Credential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub folder: Option<String>,
    pub tags: Vec<String>,
    pub auth_type: AuthType,
    pub username: String,
    /// Sealed at rest.
    pub password: Option<String>,
    /// Sealed at rest.
    pub private_key: Option<String>,
    pub public_key: Option<String>,
    /// Sealed at rest.
    pub key_passphrase: Option<String>,
    pub detected_key_type: Option<String>,
    pub usage_count: u64,
    pub last_used: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutostartSecrets {
    /// Sealed at rest. Absence means "refuse to connect" per the design's
    /// preserved-as-is autostart behavior, not "prompt".
    pub password: Option<String>,
    pub key: Option<String>,
    pub key_passphrase: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConnection {
    pub source_port: u16,
    pub endpoint_host: String,
    pub endpoint_port: u16,
    pub endpoint_username: String,
    pub endpoint_auth_type: AuthType,
    /// Sealed at rest: password or key material depending on `endpoint_auth_type`.
    pub endpoint_secrets: Option<String>,
    pub endpoint_credential_id: Option<String>,
    pub max_retries: u32,
    pub retry_interval_sec: u64,
    pub auto_start: bool,
}

impl TunnelConnection {
    /// The stable logical tunnel name: `"{hostName}_{sourcePort}_{endpointPort}"`.
    pub fn tunnel_name(&self, host_name: &str) -> String {
        format!("{host_name}_{}_{}", self.source_port, self.endpoint_port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub user_id: String,
    pub name: Option<String>,
    pub ip: String,
    pub port: u16,
    pub username: String,
    pub folder: Option<String>,
    pub tags: Vec<String>,
    pub pin: bool,
    pub auth_type: AuthType,
    /// Sealed at rest, only present when `auth_type == Password`.
    pub password: Option<String>,
    /// Sealed at rest, only present when `auth_type == Key`.
    pub private_key: Option<String>,
    pub key_passphrase: Option<String>,
    pub enable_terminal: bool,
    pub enable_tunnel: bool,
    pub enable_file_manager: bool,
    pub default_path: Option<String>,
    pub tunnel_connections: Vec<TunnelConnection>,
    pub autostart: AutostartSecrets,
    pub credential_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileManagerItemKind {
    Recent,
    Pinned,
    Shortcut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileManagerItem {
    pub id: String,
    pub user_id: String,
    pub host_id: String,
    pub name: String,
    pub path: String,
    pub kind: FileManagerItemKind,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DismissedAlert {
    pub alert_id: String,
    pub user_id: String,
    pub dismissed_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub entries: std::collections::HashMap<String, serde_json::Value>,
}

//! Store schema. Created idempotently with `execute_batch`, following the
//! same `CREATE TABLE IF NOT EXISTS` idiom used throughout the rest of this
//! codebase's libsql-backed persistence.

use libsql::Connection;

use super::StoreError;

pub async fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            dek_salt BLOB NOT NULL,
            wrapped_dek_nonce BLOB NOT NULL,
            wrapped_dek_ciphertext BLOB NOT NULL,
            is_admin INTEGER NOT NULL DEFAULT 0,
            oidc_subject TEXT,
            totp_secret TEXT,
            totp_backup_codes TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS credentials (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            description TEXT,
            folder TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            auth_type TEXT NOT NULL,
            username TEXT NOT NULL,
            password TEXT,
            private_key TEXT,
            public_key TEXT,
            key_passphrase TEXT,
            detected_key_type TEXT,
            usage_count INTEGER NOT NULL DEFAULT 0,
            last_used INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_credentials_user ON credentials(user_id);

        CREATE TABLE IF NOT EXISTS hosts (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name TEXT,
            ip TEXT NOT NULL,
            port INTEGER NOT NULL,
            username TEXT NOT NULL,
            folder TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            pin INTEGER NOT NULL DEFAULT 0,
            auth_type TEXT NOT NULL,
            password TEXT,
            private_key TEXT,
            key_passphrase TEXT,
            enable_terminal INTEGER NOT NULL DEFAULT 1,
            enable_tunnel INTEGER NOT NULL DEFAULT 1,
            enable_file_manager INTEGER NOT NULL DEFAULT 1,
            default_path TEXT,
            tunnel_connections TEXT NOT NULL DEFAULT '[]',
            autostart_password TEXT,
            autostart_key TEXT,
            autostart_key_passphrase TEXT,
            credential_id TEXT REFERENCES credentials(id) ON DELETE SET NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_hosts_user ON hosts(user_id);

        CREATE TABLE IF NOT EXISTS file_manager_items (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            host_id TEXT NOT NULL,
            name TEXT NOT NULL,
            path TEXT NOT NULL,
            kind TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_fmi_user_host ON file_manager_items(user_id, host_id);

        CREATE TABLE IF NOT EXISTS dismissed_alerts (
            alert_id TEXT NOT NULL,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            dismissed_at INTEGER NOT NULL,
            PRIMARY KEY (alert_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS settings (
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (user_id, key)
        );
        "#,
    )
    .await
    .map_err(StoreError::from)?;

    Ok(())
}

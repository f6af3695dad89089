//! C2 Store: typed repository over libsql. Reads pass sensitive columns
//! through [`CryptoEnvelope::open`]; writes through [`CryptoEnvelope::seal`].
//! Queries that only filter by non-sensitive columns do not require an
//! unlock session — only touching a sealed column does.

use std::path::Path;
use std::sync::Arc;

use libsql::{Builder, Connection, Database};

use crate::crypto::SharedEnvelope;

use super::error::StoreError;
use super::models::*;
use super::schema::init_schema;

pub struct Store {
    _db: Database,
    conn: Connection,
    envelope: SharedEnvelope,
}

fn now() -> i64 {
    // Populated by callers via `crate::clock::now_ms` in production; kept as
    // a thin wrapper here so a future deterministic-clock swap touches one
    // place.
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

impl Store {
    pub async fn open(path: &Path, envelope: SharedEnvelope) -> Result<Self, StoreError> {
        let db = Builder::new_local(path.to_string_lossy().as_ref())
            .build()
            .await?;
        let conn = db.connect()?;
        init_schema(&conn).await?;
        Ok(Self {
            _db: db,
            conn,
            envelope,
        })
    }

    #[cfg(test)]
    pub async fn open_in_memory(envelope: SharedEnvelope) -> Result<Self, StoreError> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;
        init_schema(&conn).await?;
        Ok(Self {
            _db: db,
            conn,
            envelope,
        })
    }

    // ==================== Users ====================

    pub async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO users (id, username, password_hash, dek_salt, wrapped_dek_nonce, wrapped_dek_ciphertext, is_admin, oidc_subject, totp_secret, totp_backup_codes, created_at) VALUES (?,?,?,?,?,?,?,?,?,?,?)",
                libsql::params![
                    user.id.clone(),
                    user.username.clone(),
                    user.password_hash.clone(),
                    user.dek_salt.to_vec(),
                    user.wrapped_dek_nonce.to_vec(),
                    user.wrapped_dek_ciphertext.clone(),
                    user.is_admin as i64,
                    user.oidc_subject.clone(),
                    user.totp_secret.clone(),
                    serde_json::to_string(&user.totp_backup_codes)?,
                    user.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, username, password_hash, dek_salt, wrapped_dek_nonce, wrapped_dek_ciphertext, is_admin, oidc_subject, totp_secret, totp_backup_codes, created_at FROM users WHERE username = ?",
                libsql::params![username],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_user(row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, username, password_hash, dek_salt, wrapped_dek_nonce, wrapped_dek_ciphertext, is_admin, oidc_subject, totp_secret, totp_backup_codes, created_at FROM users WHERE id = ?",
                libsql::params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_user(row)?)),
            None => Ok(None),
        }
    }

    /// Persist a new `password_hash`/`dek_salt`/wrapped-DEK triple, e.g. from
    /// a completed password reset. Does not touch any other column.
    pub async fn update_user_credentials(
        &self,
        user_id: &str,
        password_hash: &str,
        dek_salt: &[u8; 32],
        wrapped: &crate::crypto::WrappedDek,
    ) -> Result<(), StoreError> {
        if self.get_user_by_id(user_id).await?.is_none() {
            return Err(StoreError::NotFound(user_id.to_string()));
        }
        self.conn
            .execute(
                "UPDATE users SET password_hash = ?, dek_salt = ?, wrapped_dek_nonce = ?, wrapped_dek_ciphertext = ? WHERE id = ?",
                libsql::params![
                    password_hash.to_string(),
                    dek_salt.to_vec(),
                    wrapped.nonce.to_vec(),
                    wrapped.ciphertext.clone(),
                    user_id.to_string(),
                ],
            )
            .await?;
        Ok(())
    }

    /// Delete a user and everything scoped to them. `hosts`, `credentials`,
    /// `file_manager_items`, `dismissed_alerts`, and `settings` all declare
    /// `ON DELETE CASCADE` against `users(id)` (enforced via the
    /// `PRAGMA foreign_keys = ON` set in `init_schema`), so one delete here
    /// is enough.
    pub async fn delete_user(&self, user_id: &str) -> Result<(), StoreError> {
        if self.get_user_by_id(user_id).await?.is_none() {
            return Err(StoreError::NotFound(user_id.to_string()));
        }
        self.conn
            .execute("DELETE FROM users WHERE id = ?", libsql::params![user_id])
            .await?;
        Ok(())
    }

    // ==================== Hosts ====================

    pub async fn create_host(&self, user_id: &str, host: &Host) -> Result<(), StoreError> {
        let sealed_password = self.seal_opt("hosts", "password", user_id, &host.id, &host.password).await?;
        let sealed_key = self.seal_opt("hosts", "private_key", user_id, &host.id, &host.private_key).await?;
        let sealed_passphrase = self
            .seal_opt("hosts", "key_passphrase", user_id, &host.id, &host.key_passphrase)
            .await?;
        let sealed_autostart_password = self
            .seal_opt("hosts", "autostart_password", user_id, &host.id, &host.autostart.password)
            .await?;
        let sealed_autostart_key = self
            .seal_opt("hosts", "autostart_key", user_id, &host.id, &host.autostart.key)
            .await?;
        let sealed_autostart_passphrase = self
            .seal_opt(
                "hosts",
                "autostart_key_passphrase",
                user_id,
                &host.id,
                &host.autostart.key_passphrase,
            )
            .await?;

        self.conn
            .execute(
                "INSERT INTO hosts (id, user_id, name, ip, port, username, folder, tags, pin, auth_type, password, private_key, key_passphrase, enable_terminal, enable_tunnel, enable_file_manager, default_path, tunnel_connections, autostart_password, autostart_key, autostart_key_passphrase, credential_id, created_at, updated_at) \
                 VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
                libsql::params![
                    host.id.clone(),
                    user_id.to_string(),
                    host.name.clone(),
                    host.ip.clone(),
                    host.port as i64,
                    host.username.clone(),
                    host.folder.clone(),
                    serde_json::to_string(&host.tags)?,
                    host.pin as i64,
                    auth_type_str(host.auth_type).to_string(),
                    sealed_password,
                    sealed_key,
                    sealed_passphrase,
                    host.enable_terminal as i64,
                    host.enable_tunnel as i64,
                    host.enable_file_manager as i64,
                    host.default_path.clone(),
                    serde_json::to_string(&host.tunnel_connections)?,
                    sealed_autostart_password,
                    sealed_autostart_key,
                    sealed_autostart_passphrase,
                    host.credential_id.clone(),
                    host.created_at,
                    host.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn get_host(&self, user_id: &str, host_id: &str) -> Result<Option<Host>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, user_id, name, ip, port, username, folder, tags, pin, auth_type, password, private_key, key_passphrase, enable_terminal, enable_tunnel, enable_file_manager, default_path, tunnel_connections, autostart_password, autostart_key, autostart_key_passphrase, credential_id, created_at, updated_at FROM hosts WHERE id = ?",
                libsql::params![host_id],
            )
            .await?;
        let row = match rows.next().await? {
            Some(r) => r,
            None => return Ok(None),
        };
        let host = self.row_to_host(row).await?;
        if host.user_id != user_id {
            return Err(StoreError::NotOwned);
        }
        Ok(Some(host))
    }

    pub async fn list_hosts_for_user(&self, user_id: &str) -> Result<Vec<Host>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, user_id, name, ip, port, username, folder, tags, pin, auth_type, password, private_key, key_passphrase, enable_terminal, enable_tunnel, enable_file_manager, default_path, tunnel_connections, autostart_password, autostart_key, autostart_key_passphrase, credential_id, created_at, updated_at FROM hosts WHERE user_id = ?",
                libsql::params![user_id],
            )
            .await?;
        let mut hosts = Vec::new();
        while let Some(row) = rows.next().await? {
            hosts.push(self.row_to_host(row).await?);
        }
        Ok(hosts)
    }

    pub async fn delete_host(&self, user_id: &str, host_id: &str) -> Result<(), StoreError> {
        if self.get_host(user_id, host_id).await?.is_none() {
            return Err(StoreError::NotFound(host_id.to_string()));
        }
        self.conn
            .execute("DELETE FROM hosts WHERE id = ?", libsql::params![host_id])
            .await?;
        Ok(())
    }

    /// Overwrite every mutable column of an existing host owned by
    /// `user_id`. `host.id`/`host.user_id` identify the row; `host.created_at`
    /// is ignored (callers are expected to preserve it from a prior read).
    pub async fn update_host(&self, user_id: &str, host: &Host) -> Result<(), StoreError> {
        if self.get_host(user_id, &host.id).await?.is_none() {
            return Err(StoreError::NotFound(host.id.clone()));
        }

        let sealed_password = self.seal_opt("hosts", "password", user_id, &host.id, &host.password).await?;
        let sealed_key = self.seal_opt("hosts", "private_key", user_id, &host.id, &host.private_key).await?;
        let sealed_passphrase = self
            .seal_opt("hosts", "key_passphrase", user_id, &host.id, &host.key_passphrase)
            .await?;
        let sealed_autostart_password = self
            .seal_opt("hosts", "autostart_password", user_id, &host.id, &host.autostart.password)
            .await?;
        let sealed_autostart_key = self
            .seal_opt("hosts", "autostart_key", user_id, &host.id, &host.autostart.key)
            .await?;
        let sealed_autostart_passphrase = self
            .seal_opt(
                "hosts",
                "autostart_key_passphrase",
                user_id,
                &host.id,
                &host.autostart.key_passphrase,
            )
            .await?;

        self.conn
            .execute(
                "UPDATE hosts SET name = ?, ip = ?, port = ?, username = ?, folder = ?, tags = ?, pin = ?, auth_type = ?, \
                 password = ?, private_key = ?, key_passphrase = ?, enable_terminal = ?, enable_tunnel = ?, \
                 enable_file_manager = ?, default_path = ?, tunnel_connections = ?, autostart_password = ?, \
                 autostart_key = ?, autostart_key_passphrase = ?, credential_id = ?, updated_at = ? \
                 WHERE id = ?",
                libsql::params![
                    host.name.clone(),
                    host.ip.clone(),
                    host.port as i64,
                    host.username.clone(),
                    host.folder.clone(),
                    serde_json::to_string(&host.tags)?,
                    host.pin as i64,
                    auth_type_str(host.auth_type).to_string(),
                    sealed_password,
                    sealed_key,
                    sealed_passphrase,
                    host.enable_terminal as i64,
                    host.enable_tunnel as i64,
                    host.enable_file_manager as i64,
                    host.default_path.clone(),
                    serde_json::to_string(&host.tunnel_connections)?,
                    sealed_autostart_password,
                    sealed_autostart_key,
                    sealed_autostart_passphrase,
                    host.credential_id.clone(),
                    host.updated_at,
                    host.id.clone(),
                ],
            )
            .await?;
        Ok(())
    }

    // ==================== Credentials ====================

    pub async fn create_credential(&self, user_id: &str, credential: &Credential) -> Result<(), StoreError> {
        let sealed_password = self
            .seal_opt("credentials", "password", user_id, &credential.id, &credential.password)
            .await?;
        let sealed_key = self
            .seal_opt("credentials", "private_key", user_id, &credential.id, &credential.private_key)
            .await?;
        let sealed_passphrase = self
            .seal_opt(
                "credentials",
                "key_passphrase",
                user_id,
                &credential.id,
                &credential.key_passphrase,
            )
            .await?;

        self.conn
            .execute(
                "INSERT INTO credentials (id, user_id, name, description, folder, tags, auth_type, username, password, private_key, public_key, key_passphrase, detected_key_type, usage_count, last_used, created_at, updated_at) \
                 VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
                libsql::params![
                    credential.id.clone(),
                    user_id.to_string(),
                    credential.name.clone(),
                    credential.description.clone(),
                    credential.folder.clone(),
                    serde_json::to_string(&credential.tags)?,
                    auth_type_str(credential.auth_type).to_string(),
                    credential.username.clone(),
                    sealed_password,
                    sealed_key,
                    credential.public_key.clone(),
                    sealed_passphrase,
                    credential.detected_key_type.clone(),
                    credential.usage_count as i64,
                    credential.last_used,
                    credential.created_at,
                    credential.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn get_credential(&self, user_id: &str, credential_id: &str) -> Result<Option<Credential>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, user_id, name, description, folder, tags, auth_type, username, password, private_key, public_key, key_passphrase, detected_key_type, usage_count, last_used, created_at, updated_at FROM credentials WHERE id = ?",
                libsql::params![credential_id],
            )
            .await?;
        let row = match rows.next().await? {
            Some(r) => r,
            None => return Ok(None),
        };
        let credential = self.row_to_credential(row).await?;
        if credential.user_id != user_id {
            return Err(StoreError::NotOwned);
        }
        Ok(Some(credential))
    }

    pub async fn list_credentials_for_user(&self, user_id: &str) -> Result<Vec<Credential>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, user_id, name, description, folder, tags, auth_type, username, password, private_key, public_key, key_passphrase, detected_key_type, usage_count, last_used, created_at, updated_at FROM credentials WHERE user_id = ?",
                libsql::params![user_id],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(self.row_to_credential(row).await?);
        }
        Ok(out)
    }

    pub async fn touch_credential_usage(&self, credential_id: &str, used_at: i64) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE credentials SET usage_count = usage_count + 1, last_used = ? WHERE id = ?",
                libsql::params![used_at, credential_id],
            )
            .await?;
        Ok(())
    }

    pub async fn delete_credential(&self, user_id: &str, credential_id: &str) -> Result<(), StoreError> {
        if self.get_credential(user_id, credential_id).await?.is_none() {
            return Err(StoreError::NotFound(credential_id.to_string()));
        }
        self.conn
            .execute("DELETE FROM credentials WHERE id = ?", libsql::params![credential_id])
            .await?;
        Ok(())
    }

    /// Overwrite every mutable column of an existing credential owned by
    /// `user_id`. `usage_count`/`last_used` are included so callers that
    /// fetched, mutated, and write back a whole `Credential` don't silently
    /// reset them; `touch_credential_usage` remains the narrower, preferred
    /// path for just bumping usage.
    pub async fn update_credential(&self, user_id: &str, credential: &Credential) -> Result<(), StoreError> {
        if self.get_credential(user_id, &credential.id).await?.is_none() {
            return Err(StoreError::NotFound(credential.id.clone()));
        }

        let sealed_password = self
            .seal_opt("credentials", "password", user_id, &credential.id, &credential.password)
            .await?;
        let sealed_key = self
            .seal_opt("credentials", "private_key", user_id, &credential.id, &credential.private_key)
            .await?;
        let sealed_passphrase = self
            .seal_opt(
                "credentials",
                "key_passphrase",
                user_id,
                &credential.id,
                &credential.key_passphrase,
            )
            .await?;

        self.conn
            .execute(
                "UPDATE credentials SET name = ?, description = ?, folder = ?, tags = ?, auth_type = ?, username = ?, \
                 password = ?, private_key = ?, public_key = ?, key_passphrase = ?, detected_key_type = ?, \
                 usage_count = ?, last_used = ?, updated_at = ? WHERE id = ?",
                libsql::params![
                    credential.name.clone(),
                    credential.description.clone(),
                    credential.folder.clone(),
                    serde_json::to_string(&credential.tags)?,
                    auth_type_str(credential.auth_type).to_string(),
                    credential.username.clone(),
                    sealed_password,
                    sealed_key,
                    credential.public_key.clone(),
                    sealed_passphrase,
                    credential.detected_key_type.clone(),
                    credential.usage_count as i64,
                    credential.last_used,
                    credential.updated_at,
                    credential.id.clone(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn row_to_credential(&self, row: libsql::Row) -> Result<Credential, StoreError> {
        let id: String = row.get(0)?;
        let user_id: String = row.get(1)?;
        let tags_s: String = row.get(5)?;
        let auth_type_s: String = row.get(6)?;
        let sealed_password: Option<String> = row.get(8)?;
        let sealed_key: Option<String> = row.get(9)?;
        let sealed_passphrase: Option<String> = row.get(11)?;

        let password = self
            .open_opt("credentials", "password", &user_id, &id, &sealed_password)
            .await?;
        let private_key = self
            .open_opt("credentials", "private_key", &user_id, &id, &sealed_key)
            .await?;
        let key_passphrase = self
            .open_opt("credentials", "key_passphrase", &user_id, &id, &sealed_passphrase)
            .await?;

        Ok(Credential {
            id,
            user_id,
            name: row.get(2)?,
            description: row.get(3)?,
            folder: row.get(4)?,
            tags: serde_json::from_str(&tags_s)?,
            auth_type: parse_auth_type(&auth_type_s),
            username: row.get(7)?,
            password,
            private_key,
            public_key: row.get(10)?,
            key_passphrase,
            detected_key_type: row.get(12)?,
            usage_count: row.get::<i64>(13)? as u64,
            last_used: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }

    // ==================== Settings ====================

    pub async fn get_settings(&self, user_id: &str) -> Result<Settings, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT key, value FROM settings WHERE user_id = ?",
                libsql::params![user_id],
            )
            .await?;
        let mut settings = Settings::default();
        while let Some(row) = rows.next().await? {
            let key: String = row.get(0)?;
            let value_str: String = row.get(1)?;
            settings.entries.insert(key, serde_json::from_str(&value_str)?);
        }
        Ok(settings)
    }

    pub async fn save_setting(
        &self,
        user_id: &str,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO settings (user_id, key, value) VALUES (?,?,?) ON CONFLICT(user_id, key) DO UPDATE SET value = excluded.value",
                libsql::params![user_id.to_string(), key.to_string(), serde_json::to_string(value)?],
            )
            .await?;
        Ok(())
    }

    // ==================== File manager recents ====================

    /// Record use of a file-manager item, keeping only the newest `limit`
    /// `Recent` entries per `(user, host)`.
    pub async fn record_file_manager_item(
        &self,
        item: &FileManagerItem,
        limit: usize,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO file_manager_items (id, user_id, host_id, name, path, kind, timestamp) VALUES (?,?,?,?,?,?,?)",
                libsql::params![
                    item.id.clone(),
                    item.user_id.clone(),
                    item.host_id.clone(),
                    item.name.clone(),
                    item.path.clone(),
                    kind_str(item.kind).to_string(),
                    item.timestamp,
                ],
            )
            .await?;

        if matches!(item.kind, FileManagerItemKind::Recent) {
            self.conn
                .execute(
                    "DELETE FROM file_manager_items WHERE id IN ( \
                        SELECT id FROM file_manager_items \
                        WHERE user_id = ? AND host_id = ? AND kind = 'recent' \
                        ORDER BY timestamp DESC LIMIT -1 OFFSET ? \
                    )",
                    libsql::params![item.user_id.clone(), item.host_id.clone(), limit as i64],
                )
                .await?;
        }
        Ok(())
    }

    pub async fn list_file_manager_items(
        &self,
        user_id: &str,
        host_id: &str,
    ) -> Result<Vec<FileManagerItem>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, user_id, host_id, name, path, kind, timestamp FROM file_manager_items WHERE user_id = ? AND host_id = ? ORDER BY timestamp DESC",
                libsql::params![user_id, host_id],
            )
            .await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            let kind_s: String = row.get(5)?;
            items.push(FileManagerItem {
                id: row.get(0)?,
                user_id: row.get(1)?,
                host_id: row.get(2)?,
                name: row.get(3)?,
                path: row.get(4)?,
                kind: parse_kind(&kind_s),
                timestamp: row.get(6)?,
            });
        }
        Ok(items)
    }

    // ==================== Dismissed alerts ====================

    /// Record that `user_id` dismissed `alert_id`, upserting the timestamp
    /// if it was already dismissed.
    pub async fn dismiss_alert(&self, user_id: &str, alert_id: &str, dismissed_at: i64) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO dismissed_alerts (alert_id, user_id, dismissed_at) VALUES (?,?,?) \
                 ON CONFLICT(alert_id, user_id) DO UPDATE SET dismissed_at = excluded.dismissed_at",
                libsql::params![alert_id.to_string(), user_id.to_string(), dismissed_at],
            )
            .await?;
        Ok(())
    }

    pub async fn list_dismissed_alerts(&self, user_id: &str) -> Result<Vec<DismissedAlert>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT alert_id, user_id, dismissed_at FROM dismissed_alerts WHERE user_id = ?",
                libsql::params![user_id],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(DismissedAlert {
                alert_id: row.get(0)?,
                user_id: row.get(1)?,
                dismissed_at: row.get(2)?,
            });
        }
        Ok(out)
    }

    /// Un-dismiss an alert, e.g. once its underlying condition is resolved
    /// and should be eligible to surface again.
    pub async fn undismiss_alert(&self, user_id: &str, alert_id: &str) -> Result<(), StoreError> {
        self.conn
            .execute(
                "DELETE FROM dismissed_alerts WHERE alert_id = ? AND user_id = ?",
                libsql::params![alert_id, user_id],
            )
            .await?;
        Ok(())
    }

    // ==================== helpers ====================

    async fn seal_opt(
        &self,
        table: &str,
        column: &str,
        user_id: &str,
        record_id: &str,
        value: &Option<String>,
    ) -> Result<Option<String>, StoreError> {
        match value {
            Some(v) => Ok(Some(
                self.envelope
                    .seal(table, column, user_id, record_id, v.as_bytes())
                    .await?,
            )),
            None => Ok(None),
        }
    }

    async fn open_opt(
        &self,
        table: &str,
        column: &str,
        user_id: &str,
        record_id: &str,
        sealed: &Option<String>,
    ) -> Result<Option<String>, StoreError> {
        match sealed {
            Some(s) => {
                let plaintext = self.envelope.open(table, column, user_id, record_id, s).await?;
                Ok(Some(String::from_utf8_lossy(&plaintext).into_owned()))
            }
            None => Ok(None),
        }
    }

    async fn row_to_host(&self, row: libsql::Row) -> Result<Host, StoreError> {
        let id: String = row.get(0)?;
        let user_id: String = row.get(1)?;
        let tags_s: String = row.get(7)?;
        let auth_type_s: String = row.get(9)?;
        let sealed_password: Option<String> = row.get(10)?;
        let sealed_key: Option<String> = row.get(11)?;
        let sealed_passphrase: Option<String> = row.get(12)?;
        let tunnels_s: String = row.get(17)?;
        let sealed_autostart_password: Option<String> = row.get(18)?;
        let sealed_autostart_key: Option<String> = row.get(19)?;
        let sealed_autostart_passphrase: Option<String> = row.get(20)?;

        let password = self.open_opt("hosts", "password", &user_id, &id, &sealed_password).await?;
        let private_key = self.open_opt("hosts", "private_key", &user_id, &id, &sealed_key).await?;
        let key_passphrase = self
            .open_opt("hosts", "key_passphrase", &user_id, &id, &sealed_passphrase)
            .await?;
        let autostart_password = self
            .open_opt("hosts", "autostart_password", &user_id, &id, &sealed_autostart_password)
            .await?;
        let autostart_key = self
            .open_opt("hosts", "autostart_key", &user_id, &id, &sealed_autostart_key)
            .await?;
        let autostart_key_passphrase = self
            .open_opt(
                "hosts",
                "autostart_key_passphrase",
                &user_id,
                &id,
                &sealed_autostart_passphrase,
            )
            .await?;

        Ok(Host {
            id,
            user_id,
            name: row.get(2)?,
            ip: row.get(3)?,
            port: row.get::<i64>(4)? as u16,
            username: row.get(5)?,
            folder: row.get(6)?,
            tags: serde_json::from_str(&tags_s)?,
            pin: row.get::<i64>(8)? != 0,
            auth_type: parse_auth_type(&auth_type_s),
            password,
            private_key,
            key_passphrase,
            enable_terminal: row.get::<i64>(13)? != 0,
            enable_tunnel: row.get::<i64>(14)? != 0,
            enable_file_manager: row.get::<i64>(15)? != 0,
            default_path: row.get(16)?,
            tunnel_connections: serde_json::from_str(&tunnels_s)?,
            autostart: AutostartSecrets {
                password: autostart_password,
                key: autostart_key,
                key_passphrase: autostart_key_passphrase,
            },
            credential_id: row.get(21)?,
            created_at: row.get(22)?,
            updated_at: row.get(23)?,
        })
    }
}

fn row_to_user(row: libsql::Row) -> Result<User, StoreError> {
    let dek_salt_v: Vec<u8> = row.get(3)?;
    let wrapped_nonce_v: Vec<u8> = row.get(4)?;
    let mut dek_salt = [0u8; 32];
    dek_salt.copy_from_slice(&dek_salt_v);
    let mut wrapped_dek_nonce = [0u8; 12];
    wrapped_dek_nonce.copy_from_slice(&wrapped_nonce_v);
    let backup_codes_s: String = row.get(9)?;

    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        dek_salt,
        wrapped_dek_nonce,
        wrapped_dek_ciphertext: row.get(5)?,
        is_admin: row.get::<i64>(6)? != 0,
        oidc_subject: row.get(7)?,
        totp_secret: row.get(8)?,
        totp_backup_codes: serde_json::from_str(&backup_codes_s)?,
        created_at: row.get(10)?,
    })
}

fn auth_type_str(t: AuthType) -> &'static str {
    match t {
        AuthType::Password => "password",
        AuthType::Key => "key",
        AuthType::Credential => "credential",
    }
}

fn parse_auth_type(s: &str) -> AuthType {
    match s {
        "key" => AuthType::Key,
        "credential" => AuthType::Credential,
        _ => AuthType::Password,
    }
}

fn kind_str(k: FileManagerItemKind) -> &'static str {
    match k {
        FileManagerItemKind::Recent => "recent",
        FileManagerItemKind::Pinned => "pinned",
        FileManagerItemKind::Shortcut => "shortcut",
    }
}

fn parse_kind(s: &str) -> FileManagerItemKind {
    match s {
        "pinned" => FileManagerItemKind::Pinned,
        "shortcut" => FileManagerItemKind::Shortcut,
        _ => FileManagerItemKind::Recent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CryptoEnvelope;
    use std::sync::Arc;
    use std::time::Duration;

    fn envelope() -> SharedEnvelope {
        Arc::new(CryptoEnvelope::with_master_key([3u8; 32], Duration::from_secs(1800)))
    }

    #[tokio::test]
    async fn test_create_and_fetch_user() {
        let store = Store::open_in_memory(envelope()).await.unwrap();
        let user = User {
            id: "u1".into(),
            username: "alice".into(),
            password_hash: "phc-hash".into(),
            dek_salt: [1u8; 32],
            wrapped_dek_nonce: [2u8; 12],
            wrapped_dek_ciphertext: vec![1, 2, 3],
            is_admin: false,
            oidc_subject: None,
            totp_secret: None,
            totp_backup_codes: vec![],
            created_at: now(),
        };
        store.create_user(&user).await.unwrap();
        let fetched = store.get_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(fetched.id, "u1");
        assert!(store.get_user_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_host_secret_round_trips_through_seal() {
        let env = envelope();
        let salt = crate::crypto::kdf::generate_salt();
        let wrapped = env.create_wrapped_dek("pw", &salt).unwrap();
        env.unlock("u1", "pw", &salt, &wrapped).await.unwrap();

        let store = Store::open_in_memory(env).await.unwrap();
        let host = Host {
            id: "h1".into(),
            user_id: "u1".into(),
            name: Some("box1".into()),
            ip: "10.0.0.5".into(),
            port: 22,
            username: "root".into(),
            folder: None,
            tags: vec![],
            pin: false,
            auth_type: AuthType::Password,
            password: Some("hunter2".into()),
            private_key: None,
            key_passphrase: None,
            enable_terminal: true,
            enable_tunnel: true,
            enable_file_manager: true,
            default_path: None,
            tunnel_connections: vec![],
            autostart: AutostartSecrets {
                password: None,
                key: None,
                key_passphrase: None,
            },
            credential_id: None,
            created_at: now(),
            updated_at: now(),
        };
        store.create_host("u1", &host).await.unwrap();
        let fetched = store.get_host("u1", "h1").await.unwrap().unwrap();
        assert_eq!(fetched.password.as_deref(), Some("hunter2"));
        assert!(store.get_host("u2", "h1").await.is_err());
    }

    async fn seed_user(store: &Store, id: &str) -> User {
        let user = User {
            id: id.to_string(),
            username: format!("{id}-name"),
            password_hash: "phc-hash".into(),
            dek_salt: [1u8; 32],
            wrapped_dek_nonce: [2u8; 12],
            wrapped_dek_ciphertext: vec![1, 2, 3],
            is_admin: false,
            oidc_subject: None,
            totp_secret: None,
            totp_backup_codes: vec![],
            created_at: now(),
        };
        store.create_user(&user).await.unwrap();
        user
    }

    fn sample_host(id: &str, user_id: &str) -> Host {
        Host {
            id: id.into(),
            user_id: user_id.into(),
            name: Some("box1".into()),
            ip: "10.0.0.5".into(),
            port: 22,
            username: "root".into(),
            folder: None,
            tags: vec![],
            pin: false,
            auth_type: AuthType::Password,
            password: Some("hunter2".into()),
            private_key: None,
            key_passphrase: None,
            enable_terminal: true,
            enable_tunnel: true,
            enable_file_manager: true,
            default_path: None,
            tunnel_connections: vec![],
            autostart: AutostartSecrets { password: None, key: None, key_passphrase: None },
            credential_id: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[tokio::test]
    async fn test_update_host_round_trips_changed_fields() {
        let env = envelope();
        let salt = crate::crypto::kdf::generate_salt();
        let wrapped = env.create_wrapped_dek("pw", &salt).unwrap();
        env.unlock("u1", "pw", &salt, &wrapped).await.unwrap();

        let store = Store::open_in_memory(env).await.unwrap();
        seed_user(&store, "u1").await;
        let mut host = sample_host("h1", "u1");
        store.create_host("u1", &host).await.unwrap();

        host.name = Some("renamed".into());
        host.password = Some("new-secret".into());
        host.updated_at = host.created_at + 1;
        store.update_host("u1", &host).await.unwrap();

        let fetched = store.get_host("u1", "h1").await.unwrap().unwrap();
        assert_eq!(fetched.name.as_deref(), Some("renamed"));
        assert_eq!(fetched.password.as_deref(), Some("new-secret"));
        assert_eq!(fetched.updated_at, host.updated_at);

        assert!(store.update_host("u2", &host).await.is_err());
    }

    #[tokio::test]
    async fn test_update_credential_round_trips_changed_fields() {
        let env = envelope();
        let salt = crate::crypto::kdf::generate_salt();
        let wrapped = env.create_wrapped_dek("pw", &salt).unwrap();
        env.unlock("u1", "pw", &salt, &wrapped).await.unwrap();

        let store = Store::open_in_memory(env).await.unwrap();
        seed_user(&store, "u1").await;
        let mut credential = Credential {
            id: "c1".into(),
            user_id: "u1".into(),
            name: "prod-key".into(),
            description: None,
            folder: None,
            tags: vec![],
            auth_type: AuthType::Password,
            username: "deploy".into(),
            password: Some("hunter2".into()),
            private_key: None,
            public_key: None,
            key_passphrase: None,
            detected_key_type: None,
            usage_count: 0,
            last_used: None,
            created_at: now(),
            updated_at: now(),
        };
        store.create_credential("u1", &credential).await.unwrap();

        credential.name = "prod-key-renamed".into();
        credential.password = Some("rotated".into());
        store.update_credential("u1", &credential).await.unwrap();

        let fetched = store.get_credential("u1", "c1").await.unwrap().unwrap();
        assert_eq!(fetched.name, "prod-key-renamed");
        assert_eq!(fetched.password.as_deref(), Some("rotated"));
    }

    #[tokio::test]
    async fn test_delete_user_cascades_to_hosts() {
        let env = envelope();
        let salt = crate::crypto::kdf::generate_salt();
        let wrapped = env.create_wrapped_dek("pw", &salt).unwrap();
        env.unlock("u1", "pw", &salt, &wrapped).await.unwrap();

        let store = Store::open_in_memory(env).await.unwrap();
        seed_user(&store, "u1").await;
        let host = sample_host("h1", "u1");
        store.create_host("u1", &host).await.unwrap();

        store.delete_user("u1").await.unwrap();
        assert!(store.get_user_by_id("u1").await.unwrap().is_none());
        // cascade via PRAGMA foreign_keys: the host row is gone too, not orphaned.
        assert!(store.get_host("u1", "h1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dismissed_alerts_roundtrip() {
        let store = Store::open_in_memory(envelope()).await.unwrap();
        seed_user(&store, "u1").await;

        store.dismiss_alert("u1", "disk-full", 1000).await.unwrap();
        let alerts = store.list_dismissed_alerts("u1").await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_id, "disk-full");

        store.undismiss_alert("u1", "disk-full").await.unwrap();
        assert!(store.list_dismissed_alerts("u1").await.unwrap().is_empty());
    }
}

//! CryptoEnvelope (C1): master key lifecycle, per-user DEK wrap/unwrap, and
//! per-record AEAD seal/open bound to `(table, column, userId, recordId)`.
//!
//! Three layers, matching the specified design:
//! 1. **Master key** — loaded from the OS keyring, or from the
//!    `CONTROL_PLANE_MASTER_KEY` env var when no keyring is available
//!    (headless/test deployment), or generated and persisted on first boot.
//! 2. **User DEK** — random 256-bit key, wrapped under a password-derived KEK.
//! 3. **Record encryption** — AES-256-GCM with random 96-bit nonces and AAD
//!    binding the ciphertext to its row and column so swapping encrypted
//!    blobs between records fails authentication.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use thiserror::Error;
use tokio::sync::RwLock;
use zeroize::Zeroize;

use super::kdf::derive_kek;
use super::types::{Dek, Kek, WrappedDek};

const SEALED_PREFIX: &str = "v2:";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid password")]
    InvalidPassword,
    #[error("user is locked")]
    Locked,
    #[error("data integrity violation: authentication tag mismatch")]
    Tampered,
    #[error("master key unavailable: {0}")]
    MasterKeyUnavailable(String),
    #[error("malformed sealed value")]
    MalformedSealedValue,
}

/// Binds a ciphertext to the row/column it belongs to so it cannot be
/// silently moved to a different record.
fn associated_data(table: &str, column: &str, user_id: &str, record_id: &str) -> Vec<u8> {
    format!("{table}\0{column}\0{user_id}\0{record_id}").into_bytes()
}

struct UnlockEntry {
    dek: Dek,
    last_touched: Instant,
}

/// In-memory userId -> DEK association, evicted on logout or idle TTL.
struct UnlockSessionTable {
    sessions: HashMap<String, UnlockEntry>,
    idle_ttl: Duration,
}

impl UnlockSessionTable {
    fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            idle_ttl,
        }
    }

    fn get(&mut self, user_id: &str) -> Option<Dek> {
        let now = Instant::now();
        let expired = self
            .sessions
            .get(user_id)
            .map(|e| now.duration_since(e.last_touched) > self.idle_ttl)
            .unwrap_or(false);
        if expired {
            self.sessions.remove(user_id);
            return None;
        }
        if let Some(entry) = self.sessions.get_mut(user_id) {
            entry.last_touched = now;
            return Some(entry.dek.clone());
        }
        None
    }
}

/// Master key lifecycle plus the unlock-session table. One instance is
/// shared process-wide behind an `Arc`.
pub struct CryptoEnvelope {
    master_key: Dek,
    sessions: RwLock<UnlockSessionTable>,
}

impl CryptoEnvelope {
    /// Load (or generate) the master key and construct the envelope.
    ///
    /// Tries the OS keyring first; falls back to `CONTROL_PLANE_MASTER_KEY`
    /// for headless deployments; generates and stores a fresh key in the
    /// keyring otherwise.
    pub fn init(unlock_idle_ttl: Duration) -> Result<Self, CryptoError> {
        let master_key = load_or_create_master_key()?;
        Ok(Self {
            master_key: Dek::new(master_key),
            sessions: RwLock::new(UnlockSessionTable::new(unlock_idle_ttl)),
        })
    }

    /// Construct with an explicit master key, for tests.
    #[cfg(test)]
    pub fn with_master_key(master_key: [u8; 32], unlock_idle_ttl: Duration) -> Self {
        Self {
            master_key: Dek::new(master_key),
            sessions: RwLock::new(UnlockSessionTable::new(unlock_idle_ttl)),
        }
    }

    /// Derive an HMAC signing subkey for AuthGate's JWTs via HKDF-Expand
    /// over the master key, so regenerating the master key invalidates all
    /// outstanding JWTs without touching user DEKs.
    pub fn jwt_signing_key(&self) -> [u8; 32] {
        let hk = hkdf::Hkdf::<sha2::Sha256>::new(None, self.master_key.expose());
        let mut out = [0u8; 32];
        hk.expand(b"sshcp-jwt-hmac-subkey", &mut out)
            .expect("32 bytes is a valid HKDF output length");
        out
    }

    /// Unwrap a user's DEK with their password-derived KEK and place it in
    /// the unlock session table. Returns `InvalidPassword` if unwrapping
    /// fails (wrong password or corrupted wrapped DEK).
    pub async fn unlock(
        &self,
        user_id: &str,
        password: &str,
        salt: &[u8; 32],
        wrapped: &WrappedDek,
    ) -> Result<(), CryptoError> {
        let kek = derive_kek(password, salt).map_err(|_| CryptoError::InvalidPassword)?;
        let dek = unwrap_dek(&kek, wrapped).ok_or(CryptoError::InvalidPassword)?;

        let mut sessions = self.sessions.write().await;
        sessions.sessions.insert(
            user_id.to_string(),
            UnlockEntry {
                dek,
                last_touched: Instant::now(),
            },
        );
        Ok(())
    }

    /// Remove a user's in-memory unlock session.
    pub async fn lock(&self, user_id: &str) {
        self.sessions.write().await.sessions.remove(user_id);
    }

    pub async fn is_unlocked(&self, user_id: &str) -> bool {
        self.sessions.write().await.get(user_id).is_some()
    }

    /// Wrap a freshly generated DEK under a freshly derived KEK, for new
    /// user creation or password changes (re-wrap).
    pub fn create_wrapped_dek(&self, password: &str, salt: &[u8; 32]) -> Result<WrappedDek, CryptoError> {
        let kek = derive_kek(password, salt).map_err(|_| CryptoError::InvalidPassword)?;
        let dek = generate_dek();
        Ok(wrap_dek(&kek, &dek))
    }

    /// Seal a plaintext field for `(table, column, userId, recordId)` using
    /// the caller's currently-unlocked DEK.
    pub async fn seal(
        &self,
        table: &str,
        column: &str,
        user_id: &str,
        record_id: &str,
        plaintext: &[u8],
    ) -> Result<String, CryptoError> {
        let dek = {
            let mut sessions = self.sessions.write().await;
            sessions.get(user_id).ok_or(CryptoError::Locked)?
        };
        let aad = associated_data(table, column, user_id, record_id);
        Ok(seal_with_dek(&dek, plaintext, &aad))
    }

    /// Open a sealed field for `(table, column, userId, recordId)`.
    pub async fn open(
        &self,
        table: &str,
        column: &str,
        user_id: &str,
        record_id: &str,
        sealed: &str,
    ) -> Result<Vec<u8>, CryptoError> {
        let dek = {
            let mut sessions = self.sessions.write().await;
            sessions.get(user_id).ok_or(CryptoError::Locked)?
        };
        let aad = associated_data(table, column, user_id, record_id);
        open_with_dek(&dek, sealed, &aad)
    }
}

fn load_or_create_master_key() -> Result<[u8; 32], CryptoError> {
    const SERVICE: &str = "sshcp";
    const ACCOUNT: &str = "master-key";

    if let Ok(entry) = keyring::Entry::new(SERVICE, ACCOUNT) {
        if let Ok(existing) = entry.get_password() {
            if let Ok(bytes) = BASE64.decode(existing.trim()) {
                if bytes.len() == 32 {
                    let mut arr = [0u8; 32];
                    arr.copy_from_slice(&bytes);
                    return Ok(arr);
                }
            }
        }
    }

    if let Ok(env_key) = std::env::var("CONTROL_PLANE_MASTER_KEY") {
        let bytes = BASE64
            .decode(env_key.trim())
            .map_err(|e| CryptoError::MasterKeyUnavailable(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(CryptoError::MasterKeyUnavailable(
                "CONTROL_PLANE_MASTER_KEY must decode to 32 bytes".to_string(),
            ));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        return Ok(arr);
    }

    let mut fresh = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut fresh);
    if let Ok(entry) = keyring::Entry::new(SERVICE, ACCOUNT) {
        if let Err(e) = entry.set_password(&BASE64.encode(fresh)) {
            tracing::warn!("failed to persist master key to OS keyring: {e}");
        }
    }
    Ok(fresh)
}

pub fn generate_dek() -> Dek {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    Dek::new(bytes)
}

fn random_nonce() -> [u8; 12] {
    let mut nonce = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

pub fn wrap_dek(kek: &Kek, dek: &Dek) -> WrappedDek {
    let cipher = Aes256Gcm::new_from_slice(kek.expose()).expect("kek is 32 bytes");
    let nonce_bytes = random_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, dek.expose().as_slice())
        .expect("encryption with valid key cannot fail");
    WrappedDek {
        nonce: nonce_bytes,
        ciphertext,
    }
}

pub fn unwrap_dek(kek: &Kek, wrapped: &WrappedDek) -> Option<Dek> {
    let cipher = Aes256Gcm::new_from_slice(kek.expose()).ok()?;
    let nonce = Nonce::from_slice(&wrapped.nonce);
    let mut plaintext = cipher.decrypt(nonce, wrapped.ciphertext.as_slice()).ok()?;
    if plaintext.len() != 32 {
        plaintext.zeroize();
        return None;
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&plaintext);
    plaintext.zeroize();
    Some(Dek::new(arr))
}

fn seal_with_dek(dek: &Dek, plaintext: &[u8], aad: &[u8]) -> String {
    let cipher = Aes256Gcm::new_from_slice(dek.expose()).expect("dek is 32 bytes");
    let nonce_bytes = random_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .expect("encryption with valid key cannot fail");

    let mut combined = Vec::with_capacity(12 + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    format!("{SEALED_PREFIX}{}", BASE64.encode(combined))
}

fn open_with_dek(dek: &Dek, sealed: &str, aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let encoded = sealed
        .strip_prefix(SEALED_PREFIX)
        .ok_or(CryptoError::MalformedSealedValue)?;
    let combined = BASE64
        .decode(encoded)
        .map_err(|_| CryptoError::MalformedSealedValue)?;
    if combined.len() < 12 {
        return Err(CryptoError::MalformedSealedValue);
    }
    let (nonce_bytes, ciphertext) = combined.split_at(12);
    let cipher = Aes256Gcm::new_from_slice(dek.expose()).expect("dek is 32 bytes");
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Tampered)
}

/// Detects legacy (pre-`v2:`) plaintext values so the Store can lazily
/// re-encrypt them on next write, per §4.1.
pub fn is_legacy_plaintext(value: &str) -> bool {
    !value.starts_with(SEALED_PREFIX)
}

pub type SharedEnvelope = Arc<CryptoEnvelope>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap_dek_roundtrip() {
        let kek = Kek::new([9u8; 32]);
        let dek = generate_dek();
        let wrapped = wrap_dek(&kek, &dek);
        let unwrapped = unwrap_dek(&kek, &wrapped).expect("unwrap should succeed");
        assert_eq!(unwrapped.expose(), dek.expose());
    }

    #[test]
    fn test_unwrap_dek_wrong_kek_fails() {
        let dek = generate_dek();
        let wrapped = wrap_dek(&Kek::new([1u8; 32]), &dek);
        assert!(unwrap_dek(&Kek::new([2u8; 32]), &wrapped).is_none());
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let dek = generate_dek();
        let aad = associated_data("credentials", "password", "user-1", "cred-1");
        let sealed = seal_with_dek(&dek, b"s3cret", &aad);
        assert!(sealed.starts_with("v2:"));
        let opened = open_with_dek(&dek, &sealed, &aad).unwrap();
        assert_eq!(opened, b"s3cret");
    }

    #[test]
    fn test_seal_open_wrong_record_id_tampered() {
        let dek = generate_dek();
        let aad = associated_data("credentials", "password", "user-1", "cred-1");
        let sealed = seal_with_dek(&dek, b"s3cret", &aad);
        let wrong_aad = associated_data("credentials", "password", "user-1", "cred-2");
        let result = open_with_dek(&dek, &sealed, &wrong_aad);
        assert!(matches!(result, Err(CryptoError::Tampered)));
    }

    #[tokio::test]
    async fn test_unlock_session_requires_correct_password() {
        let envelope = CryptoEnvelope::with_master_key([0u8; 32], Duration::from_secs(1800));
        let salt = super::super::kdf::generate_salt();
        let wrapped = envelope.create_wrapped_dek("hunter2", &salt).unwrap();

        assert!(envelope
            .unlock("user-1", "wrong-password", &salt, &wrapped)
            .await
            .is_err());
        assert!(!envelope.is_unlocked("user-1").await);

        envelope
            .unlock("user-1", "hunter2", &salt, &wrapped)
            .await
            .unwrap();
        assert!(envelope.is_unlocked("user-1").await);

        envelope.lock("user-1").await;
        assert!(!envelope.is_unlocked("user-1").await);
    }

    #[tokio::test]
    async fn test_seal_open_via_envelope_requires_unlock() {
        let envelope = CryptoEnvelope::with_master_key([0u8; 32], Duration::from_secs(1800));
        let salt = super::super::kdf::generate_salt();
        let wrapped = envelope.create_wrapped_dek("hunter2", &salt).unwrap();

        let err = envelope
            .seal("credentials", "password", "user-1", "cred-1", b"s3cret")
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::Locked));

        envelope
            .unlock("user-1", "hunter2", &salt, &wrapped)
            .await
            .unwrap();
        let sealed = envelope
            .seal("credentials", "password", "user-1", "cred-1", b"s3cret")
            .await
            .unwrap();
        let opened = envelope
            .open("credentials", "password", "user-1", "cred-1", &sealed)
            .await
            .unwrap();
        assert_eq!(opened, b"s3cret");
    }
}

//! C3 AuthGate: password + optional TOTP login, JWT issue/verify, admin and
//! data-access checks, and the password-reset flow.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::crypto::SharedEnvelope;
use crate::error::{ControlPlaneError, ErrorKind};
use crate::store::models::User;
use crate::store::{Store, StoreError};

use super::{jwt, password, totp};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("TOTP code required")]
    TotpRequired,
    #[error("invalid TOTP code")]
    InvalidTotp,
    #[error("session expired, unlock required")]
    SessionExpired,
    #[error("not authorized")]
    NotAuthorized,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("password processing failed: {0}")]
    PasswordHash(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<AuthError> for ControlPlaneError {
    fn from(e: AuthError) -> Self {
        let kind = match &e {
            AuthError::InvalidCredentials
            | AuthError::TotpRequired
            | AuthError::InvalidTotp
            | AuthError::InvalidToken => ErrorKind::Authentication,
            AuthError::SessionExpired => ErrorKind::Authentication,
            AuthError::NotAuthorized => ErrorKind::Authorization,
            AuthError::PasswordHash(_) => ErrorKind::Internal,
            AuthError::Store(_) => ErrorKind::Internal,
        };
        ControlPlaneError::new(kind, e.to_string())
    }
}

pub struct LoginResult {
    pub jwt: String,
    pub requires_totp: bool,
}

/// In-memory password-reset codes: userId -> (code, issued at). Never
/// persisted; logged to the operator per the design's explicit choice not
/// to email them from the core.
struct ResetCode {
    code: String,
    issued_at: Instant,
}

pub struct AuthGate {
    store: Arc<Store>,
    envelope: SharedEnvelope,
    reset_codes: Mutex<HashMap<String, ResetCode>>,
}

const RESET_CODE_TTL: Duration = Duration::from_secs(15 * 60);

impl AuthGate {
    pub fn new(store: Arc<Store>, envelope: SharedEnvelope) -> Self {
        Self {
            store,
            envelope,
            reset_codes: Mutex::new(HashMap::new()),
        }
    }

    /// `login(username, password) -> {jwt, requiresTOTP?}`.
    ///
    /// If the user has TOTP enrolled, `totp_code` must be `Some` and valid;
    /// otherwise `requires_totp: true` is surfaced on a first password-only
    /// attempt without raising an error, matching the contract's optional
    /// two-step shape.
    pub async fn login(
        &self,
        username: &str,
        password_attempt: &str,
        totp_code: Option<&str>,
    ) -> Result<LoginResult, AuthError> {
        let user = self
            .store
            .get_user_by_username(username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !password::verify_password(password_attempt, &user.password_hash)
            .unwrap_or(false)
        {
            return Err(AuthError::InvalidCredentials);
        }

        if let Some(secret) = &user.totp_secret {
            match totp_code {
                None => return Ok(LoginResult { jwt: String::new(), requires_totp: true }),
                Some(code) => {
                    let ok = totp::verify_code(secret, code).unwrap_or(false)
                        || totp::consume_backup_code(code, &user.totp_backup_codes)
                            .unwrap_or(None)
                            .is_some();
                    if !ok {
                        return Err(AuthError::InvalidTotp);
                    }
                }
            }
        }

        let wrapped = crate::crypto::WrappedDek {
            nonce: user.wrapped_dek_nonce,
            ciphertext: user.wrapped_dek_ciphertext.clone(),
        };
        self.envelope
            .unlock(&user.id, password_attempt, &user.dek_salt, &wrapped)
            .await
            .map_err(|_| AuthError::InvalidCredentials)?;

        let jwt = jwt::issue(&user.id, &self.envelope.jwt_signing_key());
        Ok(LoginResult { jwt, requires_totp: false })
    }

    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        jwt::verify(token, &self.envelope.jwt_signing_key()).map_err(|_| AuthError::InvalidToken)
    }

    /// Middleware-style check: the token must verify *and* the user must
    /// currently have an unlocked DEK.
    pub async fn require_data_access(&self, token: &str) -> Result<String, AuthError> {
        let user_id = self.verify(token)?;
        if !self.envelope.is_unlocked(&user_id).await {
            return Err(AuthError::SessionExpired);
        }
        Ok(user_id)
    }

    pub async fn require_admin(&self, token: &str) -> Result<String, AuthError> {
        let user_id = self.verify(token)?;
        let user = self
            .store
            .get_user_by_id(&user_id)
            .await?
            .ok_or(AuthError::NotAuthorized)?;
        if !user.is_admin {
            return Err(AuthError::NotAuthorized);
        }
        Ok(user_id)
    }

    /// Issue a 6-digit reset code, returned here for the caller to log at
    /// the operator console — never emailed by the core.
    pub async fn initiate_password_reset(&self, user: &User) -> String {
        let code: u32 = rand::thread_rng().gen_range(0..1_000_000);
        let code = format!("{code:06}");
        self.reset_codes.lock().await.insert(
            user.id.clone(),
            ResetCode {
                code: code.clone(),
                issued_at: Instant::now(),
            },
        );
        code
    }

    pub async fn verify_reset_code(&self, user_id: &str, code: &str) -> bool {
        let codes = self.reset_codes.lock().await;
        match codes.get(user_id) {
            Some(entry) => entry.code == code && entry.issued_at.elapsed() < RESET_CODE_TTL,
            None => false,
        }
    }

    pub async fn clear_reset_code(&self, user_id: &str) {
        self.reset_codes.lock().await.remove(user_id);
    }

    /// Complete a password reset: re-derive a KEK from `new_password` and
    /// wrap a freshly generated DEK under it, then persist the new password
    /// hash and wrapped DEK.
    ///
    /// A reset cannot re-wrap the *existing* DEK, since unwrapping it needs
    /// the old password, which by definition the caller no longer has.
    /// Completing a reset therefore starts a fresh DEK: every record sealed
    /// under the old one becomes permanently unreadable after this call.
    /// Callers should clear the reset code and log the user out of any
    /// other active session once this returns.
    pub async fn complete_password_reset(&self, user_id: &str, new_password: &str) -> Result<(), AuthError> {
        let salt = crate::crypto::kdf::generate_salt();
        let wrapped = self
            .envelope
            .create_wrapped_dek(new_password, &salt)
            .map_err(|e| AuthError::PasswordHash(e.to_string()))?;
        let password_hash = password::hash_password(new_password).map_err(|e| AuthError::PasswordHash(e.to_string()))?;

        self.store
            .update_user_credentials(user_id, &password_hash, &salt, &wrapped)
            .await?;
        self.envelope.lock(user_id).await;
        Ok(())
    }
}

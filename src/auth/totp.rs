//! RFC 6238 TOTP for AuthGate's optional second factor, plus one-shot
//! backup codes (hashed at rest via [`super::password`]).

use rand::RngCore;
use thiserror::Error;
use totp_rs::{Algorithm, Secret, TOTP};

use super::password::{hash_password, verify_password, PasswordError};

#[derive(Debug, Error)]
pub enum TotpError {
    #[error("invalid TOTP configuration: {0}")]
    Config(String),
    #[error("code mismatch")]
    CodeMismatch,
}

/// Generate a fresh base32 TOTP secret for a user enrolling a second factor.
pub fn generate_secret() -> String {
    Secret::generate_secret().to_encoded().to_string()
}

fn build(secret_b32: &str) -> Result<TOTP, TotpError> {
    let secret = Secret::Encoded(secret_b32.to_string())
        .to_bytes()
        .map_err(|e| TotpError::Config(format!("{e:?}")))?;
    TOTP::new(Algorithm::SHA1, 6, 1, 30, secret).map_err(|e| TotpError::Config(e.to_string()))
}

/// Verify a 6-digit code against the user's enrolled secret, allowing the
/// standard +/-1 step skew.
pub fn verify_code(secret_b32: &str, code: &str) -> Result<bool, TotpError> {
    let totp = build(secret_b32)?;
    totp.check_current(code).map_err(|e| TotpError::Config(e.to_string()))
}

/// Generate `count` one-shot backup codes plus their hashed (PHC) forms for
/// storage. Callers show the plaintext codes to the user exactly once.
pub fn generate_backup_codes(count: usize) -> Result<Vec<(String, String)>, PasswordError> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let mut bytes = [0u8; 5];
        rand::thread_rng().fill_bytes(&mut bytes);
        let code = bytes.iter().map(|b| format!("{:02x}", b)).collect::<String>();
        let hash = hash_password(&code)?;
        out.push((code, hash));
    }
    Ok(out)
}

/// Consume a backup code if it matches one of the stored hashes, returning
/// the index consumed so the caller can remove it.
pub fn consume_backup_code(code: &str, hashes: &[String]) -> Result<Option<usize>, PasswordError> {
    for (i, hash) in hashes.iter().enumerate() {
        if verify_password(code, hash)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_verify_current_code() {
        let secret = generate_secret();
        let totp = build(&secret).unwrap();
        let code = totp.generate_current().unwrap();
        assert!(verify_code(&secret, &code).unwrap());
        assert!(!verify_code(&secret, "000000").unwrap() || code == "000000");
    }

    #[test]
    fn test_backup_codes_are_one_shot_by_caller_removal() {
        let codes = generate_backup_codes(3).unwrap();
        let hashes: Vec<String> = codes.iter().map(|(_, h)| h.clone()).collect();
        let (plain, _) = &codes[1];
        let idx = consume_backup_code(plain, &hashes).unwrap();
        assert_eq!(idx, Some(1));
        assert_eq!(consume_backup_code("not-a-code", &hashes).unwrap(), None);
    }
}

//! JWT issue/verify for AuthGate, signed with an HMAC subkey derived from
//! the system master key (or `JWT_SECRET` when overridden for testing).

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("token is invalid or expired")]
    Invalid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub iat: i64,
    pub exp: i64,
}

const TOKEN_TTL_SECS: i64 = 60 * 60 * 12;

pub fn issue(user_id: &str, signing_key: &[u8]) -> String {
    let now = now_unix();
    let claims = Claims {
        user_id: user_id.to_string(),
        iat: now,
        exp: now + TOKEN_TTL_SECS,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(signing_key),
    )
    .expect("encoding with a valid key cannot fail")
}

pub fn verify(token: &str, signing_key: &[u8]) -> Result<String, JwtError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(signing_key),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| JwtError::Invalid)?;
    Ok(data.claims.user_id)
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify_roundtrip() {
        let key = [4u8; 32];
        let token = issue("user-1", &key);
        assert_eq!(verify(&token, &key).unwrap(), "user-1");
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let token = issue("user-1", &[4u8; 32]);
        assert!(verify(&token, &[5u8; 32]).is_err());
    }

    #[test]
    fn test_verify_rejects_garbage() {
        assert!(verify("not-a-jwt", &[4u8; 32]).is_err());
    }
}

//! Password-based key derivation for the per-user Key Encryption Key (KEK).

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;

use super::types::Kek;
use crate::error::{ControlPlaneError, ErrorKind};

const MEMORY_COST: u32 = 262_144; // 256 MiB
const TIME_COST: u32 = 4;
const PARALLELISM: u32 = 4;
const OUTPUT_LEN: usize = 32;

/// Derive a 256-bit KEK from a user's password and per-user salt using
/// Argon2id with parameters meeting the ">= 200,000 iterations or
/// equivalent" requirement.
pub fn derive_kek(password: &str, salt: &[u8; 32]) -> Result<Kek, ControlPlaneError> {
    let params = Params::new(MEMORY_COST, TIME_COST, PARALLELISM, Some(OUTPUT_LEN))
        .map_err(|e| ControlPlaneError::new(ErrorKind::Internal, format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut out = [0u8; OUTPUT_LEN];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut out)
        .map_err(|e| ControlPlaneError::new(ErrorKind::Internal, format!("kdf failed: {e}")))?;

    Ok(Kek::new(out))
}

/// Generate a fresh random 32-byte salt for a new user.
pub fn generate_salt() -> [u8; 32] {
    let mut salt = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_kek_deterministic() {
        let salt = [7u8; 32];
        let a = derive_kek("correct horse battery staple", &salt).unwrap();
        let b = derive_kek("correct horse battery staple", &salt).unwrap();
        assert_eq!(a.expose(), b.expose());
    }

    #[test]
    fn test_derive_kek_different_salts_differ() {
        let a = derive_kek("same-password", &[1u8; 32]).unwrap();
        let b = derive_kek("same-password", &[2u8; 32]).unwrap();
        assert_ne!(a.expose(), b.expose());
    }
}

//! C1 CryptoEnvelope: master key lifecycle, per-user DEK derivation,
//! per-record AEAD encrypt/decrypt, and the in-memory unlock-session table.

pub mod envelope;
pub mod kdf;
pub mod types;

pub use envelope::{generate_dek, is_legacy_plaintext, unwrap_dek, wrap_dek, CryptoError, CryptoEnvelope, SharedEnvelope};
pub use types::{Dek, Kek, WrappedDek};

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::error::{ControlPlaneError, ErrorKind};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not owned by user")]
    NotOwned,
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl From<libsql::Error> for StoreError {
    fn from(e: libsql::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for ControlPlaneError {
    fn from(e: StoreError) -> Self {
        let kind = match &e {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::NotOwned => ErrorKind::Authorization,
            StoreError::Crypto(CryptoError::Locked) => ErrorKind::Authentication,
            StoreError::Crypto(CryptoError::Tampered) => ErrorKind::Integrity,
            StoreError::Crypto(_) => ErrorKind::Internal,
            StoreError::Database(_) | StoreError::Serialization(_) => ErrorKind::Internal,
        };
        ControlPlaneError::new(kind, e.to_string())
    }
}

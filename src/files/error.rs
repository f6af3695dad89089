use thiserror::Error;

use crate::error::{ControlPlaneError, ErrorKind};
use crate::ssh::client::SshError;
use crate::ssh::pool::PoolError;

#[derive(Debug, Error)]
pub enum FileError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Ssh(#[from] SshError),
    #[error("remote path not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("file too large ({size} bytes, max {max})")]
    TooLarge { size: u64, max: u64 },
    #[error("remote command failed: {0}")]
    RemoteCommand(String),
    #[error("path contains a NUL byte")]
    InvalidPath,
    #[error("file is not valid UTF-8 text")]
    NotUtf8,
}

impl From<FileError> for ControlPlaneError {
    fn from(e: FileError) -> Self {
        let message = e.to_string();
        let kind = match &e {
            FileError::Pool(PoolError::Capacity) => ErrorKind::Capacity,
            FileError::Pool(PoolError::ShuttingDown) => ErrorKind::Shutdown,
            FileError::Pool(PoolError::Ssh(_)) => ErrorKind::NetworkTransient,
            FileError::Ssh(_) => ErrorKind::NetworkTransient,
            FileError::NotFound(_) => ErrorKind::NotFound,
            FileError::PermissionDenied(_) => ErrorKind::Authorization,
            FileError::TooLarge { .. } => ErrorKind::Validation,
            FileError::RemoteCommand(_) => ErrorKind::RemoteCommandFailure,
            FileError::InvalidPath => ErrorKind::Validation,
            FileError::NotUtf8 => ErrorKind::Validation,
        };
        ControlPlaneError::new(kind, message)
    }
}

//! C9 FileManager: SFTP-first remote file operations, falling back to a
//! shell-exec idiom on any SFTP error. Grounded in the `marlin` example's
//! SFTP session handling for the SFTP path and in the teacher's old
//! `sftp/browser.rs` + `sftp/transfer.rs` for the shell-exec fallback.

pub mod error;
pub mod sftp;
pub mod shell;

pub use error::FileError;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ssh::client::SshClient;
use crate::ssh::pool::{PoolTarget, SshPool};

pub(crate) const MAX_TEXT_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    pub size: u64,
    pub modified: u64,
    pub permissions: String,
}

fn validate_path(path: &str) -> Result<(), FileError> {
    if path.contains('\0') {
        return Err(FileError::InvalidPath);
    }
    Ok(())
}

async fn read_text_via_sftp(client: &SshClient, path: &str) -> Result<String, FileError> {
    let size = sftp::stat_size(client, path).await?;
    if size > MAX_TEXT_SIZE {
        return Err(FileError::TooLarge { size, max: MAX_TEXT_SIZE });
    }
    let bytes = sftp::read_file(client, path).await?;
    String::from_utf8(bytes).map_err(|_| FileError::NotUtf8)
}

/// SFTP-first remote file operations bound to a shared [`SshPool`]. Every
/// method acquires a pooled control connection, tries the SFTP path, and
/// falls back to the shell-exec path on any SFTP failure — except
/// [`FileError::TooLarge`]/[`FileError::NotUtf8`], which mean the same thing
/// either way and are returned directly.
pub struct FileManager {
    pool: Arc<SshPool>,
}

impl FileManager {
    pub fn new(pool: Arc<SshPool>) -> Self {
        Self { pool }
    }

    pub async fn list_directory(&self, target: &PoolTarget, path: &str) -> Result<Vec<RemoteEntry>, FileError> {
        validate_path(path)?;
        let pooled = self.pool.acquire(target).await?;
        let result = match sftp::list_directory(&pooled, path).await {
            Ok(entries) => Ok(entries),
            Err(e) => {
                tracing::debug!(error = %e, "sftp list_directory failed, falling back to shell");
                shell::list_directory(&pooled, path).await
            }
        };
        self.pool.release(pooled).await;
        result
    }

    pub async fn make_directory(&self, target: &PoolTarget, path: &str) -> Result<(), FileError> {
        validate_path(path)?;
        let pooled = self.pool.acquire(target).await?;
        let result = match sftp::make_directory(&pooled, path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::debug!(error = %e, "sftp mkdir failed, falling back to shell");
                shell::make_directory(&pooled, path).await
            }
        };
        self.pool.release(pooled).await;
        result
    }

    pub async fn delete_entry(&self, target: &PoolTarget, path: &str, is_directory: bool) -> Result<(), FileError> {
        validate_path(path)?;
        let pooled = self.pool.acquire(target).await?;
        let result = match sftp::delete_entry(&pooled, path, is_directory).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::debug!(error = %e, "sftp remove failed, falling back to shell");
                shell::delete_entry(&pooled, path).await
            }
        };
        self.pool.release(pooled).await;
        result
    }

    pub async fn touch_file(&self, target: &PoolTarget, path: &str) -> Result<(), FileError> {
        validate_path(path)?;
        let pooled = self.pool.acquire(target).await?;
        let result = match sftp::touch_file(&pooled, path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::debug!(error = %e, "sftp create failed, falling back to shell");
                shell::touch_file(&pooled, path).await
            }
        };
        self.pool.release(pooled).await;
        result
    }

    pub async fn rename_entry(&self, target: &PoolTarget, old_path: &str, new_path: &str) -> Result<(), FileError> {
        validate_path(old_path)?;
        validate_path(new_path)?;
        let pooled = self.pool.acquire(target).await?;
        let result = match sftp::rename_entry(&pooled, old_path, new_path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::debug!(error = %e, "sftp rename failed, falling back to shell");
                shell::rename_entry(&pooled, old_path, new_path).await
            }
        };
        self.pool.release(pooled).await;
        result
    }

    pub async fn read_text_file(&self, target: &PoolTarget, path: &str) -> Result<String, FileError> {
        validate_path(path)?;
        let pooled = self.pool.acquire(target).await?;
        let result = match read_text_via_sftp(&pooled, path).await {
            ok @ Ok(_) => ok,
            Err(e @ FileError::TooLarge { .. }) | Err(e @ FileError::NotUtf8) => Err(e),
            Err(e) => {
                tracing::debug!(error = %e, "sftp read failed, falling back to shell");
                shell::read_text_file(&pooled, path).await
            }
        };
        self.pool.release(pooled).await;
        result
    }

    pub async fn write_text_file(&self, target: &PoolTarget, path: &str, content: &str) -> Result<(), FileError> {
        validate_path(path)?;
        let pooled = self.pool.acquire(target).await?;
        let result = match sftp::write_file(&pooled, path, content.as_bytes()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::debug!(error = %e, "sftp write failed, falling back to shell");
                shell::write_text_file(&pooled, path, content).await
            }
        };
        self.pool.release(pooled).await;
        result
    }

    pub async fn download_file(&self, target: &PoolTarget, remote_path: &str, local_path: &str) -> Result<u64, FileError> {
        validate_path(remote_path)?;
        let pooled = self.pool.acquire(target).await?;
        let result = match sftp::download_file(&pooled, remote_path, local_path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                tracing::debug!(error = %e, "sftp download failed, falling back to shell");
                shell::download_file(&pooled, remote_path, local_path).await
            }
        };
        self.pool.release(pooled).await;
        result
    }

    pub async fn upload_file(&self, target: &PoolTarget, local_path: &str, remote_path: &str) -> Result<u64, FileError> {
        validate_path(remote_path)?;
        let pooled = self.pool.acquire(target).await?;
        let result = match sftp::upload_file(&pooled, local_path, remote_path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                tracing::debug!(error = %e, "sftp upload failed, falling back to shell");
                shell::upload_file(&pooled, local_path, remote_path).await
            }
        };
        self.pool.release(pooled).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path_rejects_nul() {
        assert!(validate_path("/tmp/ok").is_ok());
        assert!(matches!(validate_path("/tmp/\0bad"), Err(FileError::InvalidPath)));
    }
}

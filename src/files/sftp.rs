//! SFTP-first remote file operations, via
//! [`crate::ssh::client::SshClient::open_sftp`]. Every function here returns
//! a [`FileError`] on any failure; [`super`] catches that and falls back to
//! the shell-exec path rather than propagating it to the caller directly.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::ssh::client::SshClient;

use super::error::FileError;
use super::RemoteEntry;

pub async fn list_directory(client: &SshClient, path: &str) -> Result<Vec<RemoteEntry>, FileError> {
    let sftp = client.open_sftp().await?;
    let base = if path.ends_with('/') { path.to_string() } else { format!("{path}/") };

    let dir = sftp
        .read_dir(path)
        .await
        .map_err(|e| FileError::RemoteCommand(format!("sftp readdir: {e}")))?;

    let mut entries = Vec::new();
    for entry in dir {
        let name = entry.file_name();
        if name == "." || name == ".." {
            continue;
        }
        let meta = entry.metadata();
        entries.push(RemoteEntry {
            path: format!("{base}{name}"),
            name,
            is_directory: meta.is_dir(),
            size: meta.size.unwrap_or(0),
            modified: meta.mtime.unwrap_or(0) as u64,
            permissions: format_permissions(meta.permissions, meta.is_dir()),
        });
    }

    entries.sort_by(|a, b| b.is_directory.cmp(&a.is_directory).then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase())));
    Ok(entries)
}

pub async fn make_directory(client: &SshClient, path: &str) -> Result<(), FileError> {
    let sftp = client.open_sftp().await?;
    sftp.create_dir(path).await.map_err(|e| FileError::RemoteCommand(format!("sftp mkdir: {e}")))
}

pub async fn touch_file(client: &SshClient, path: &str) -> Result<(), FileError> {
    let sftp = client.open_sftp().await?;
    sftp.create(path).await.map_err(|e| FileError::RemoteCommand(format!("sftp create: {e}")))?;
    Ok(())
}

pub async fn rename_entry(client: &SshClient, old_path: &str, new_path: &str) -> Result<(), FileError> {
    let sftp = client.open_sftp().await?;
    sftp.rename(old_path, new_path).await.map_err(|e| FileError::RemoteCommand(format!("sftp rename: {e}")))
}

/// `is_directory` picks `remove_dir` vs `remove_file`; a non-empty directory
/// fails here (SFTP has no recursive remove) and [`super`] falls back to
/// `rm -rf` for that case, same as any other SFTP error.
pub async fn delete_entry(client: &SshClient, path: &str, is_directory: bool) -> Result<(), FileError> {
    let sftp = client.open_sftp().await?;
    let result = if is_directory { sftp.remove_dir(path).await } else { sftp.remove_file(path).await };
    result.map_err(|e| FileError::RemoteCommand(format!("sftp remove: {e}")))
}

pub async fn stat_size(client: &SshClient, path: &str) -> Result<u64, FileError> {
    let sftp = client.open_sftp().await?;
    let meta = sftp.metadata(path).await.map_err(|e| FileError::RemoteCommand(format!("sftp stat: {e}")))?;
    Ok(meta.size.unwrap_or(0))
}

pub async fn read_file(client: &SshClient, path: &str) -> Result<Vec<u8>, FileError> {
    let sftp = client.open_sftp().await?;
    let mut file = sftp.open(path).await.map_err(|e| FileError::RemoteCommand(format!("sftp open: {e}")))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await.map_err(|e| FileError::RemoteCommand(format!("sftp read: {e}")))?;
    Ok(buf)
}

pub async fn write_file(client: &SshClient, path: &str, data: &[u8]) -> Result<(), FileError> {
    let sftp = client.open_sftp().await?;
    let mut file = sftp.create(path).await.map_err(|e| FileError::RemoteCommand(format!("sftp create: {e}")))?;
    file.write_all(data).await.map_err(|e| FileError::RemoteCommand(format!("sftp write: {e}")))?;
    file.shutdown().await.map_err(|e| FileError::RemoteCommand(format!("sftp close: {e}")))?;
    Ok(())
}

pub async fn download_file(client: &SshClient, remote_path: &str, local_path: &str) -> Result<u64, FileError> {
    let sftp = client.open_sftp().await?;
    let mut remote = sftp
        .open(remote_path)
        .await
        .map_err(|e| FileError::RemoteCommand(format!("sftp open: {e}")))?;
    let mut local = tokio::fs::File::create(local_path)
        .await
        .map_err(|e| FileError::RemoteCommand(format!("local create: {e}")))?;
    tokio::io::copy(&mut remote, &mut local)
        .await
        .map_err(|e| FileError::RemoteCommand(format!("sftp download: {e}")))
}

pub async fn upload_file(client: &SshClient, local_path: &str, remote_path: &str) -> Result<u64, FileError> {
    let sftp = client.open_sftp().await?;
    let mut local = tokio::fs::File::open(local_path)
        .await
        .map_err(|e| FileError::RemoteCommand(format!("local open: {e}")))?;
    let mut remote = sftp
        .create(remote_path)
        .await
        .map_err(|e| FileError::RemoteCommand(format!("sftp create: {e}")))?;
    let bytes = tokio::io::copy(&mut local, &mut remote)
        .await
        .map_err(|e| FileError::RemoteCommand(format!("sftp upload: {e}")))?;
    remote.shutdown().await.map_err(|e| FileError::RemoteCommand(format!("sftp close: {e}")))?;
    Ok(bytes)
}

fn format_permissions(mode: Option<u32>, is_dir: bool) -> String {
    let mode = mode.unwrap_or(0);
    let kind = if is_dir { 'd' } else { '-' };
    let triad = |shift: u32| {
        let r = if mode & (0o4 << shift) != 0 { 'r' } else { '-' };
        let w = if mode & (0o2 << shift) != 0 { 'w' } else { '-' };
        let x = if mode & (0o1 << shift) != 0 { 'x' } else { '-' };
        [r, w, x]
    };
    let u = triad(6);
    let g = triad(3);
    let o = triad(0);
    format!("{kind}{}{}{}{}{}{}{}{}{}", u[0], u[1], u[2], g[0], g[1], g[2], o[0], o[1], o[2])
}

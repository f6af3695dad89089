//! Shell-exec fallback, adapted from the teacher's old `sftp/browser.rs` and
//! `sftp/transfer.rs`: `ls`/`mkdir`/`rm`/`mv`/`touch`/`stat` for metadata,
//! chunked base64 round-trips for content too large or binary to pass as a
//! single exec argument.

use base64::Engine;

use crate::ssh::client::SshClient;

use super::error::FileError;
use super::{RemoteEntry, MAX_TEXT_SIZE};

const CHUNK_SIZE: usize = 48 * 1024;

pub async fn list_directory(client: &SshClient, path: &str) -> Result<Vec<RemoteEntry>, FileError> {
    let command = format!(
        "ls -lA --time-style=+%s {} 2>/dev/null || ls -lA {}",
        shell_escape(path),
        shell_escape(path)
    );
    let output = client.exec(&command).await?;
    parse_ls_output(&output.stdout_string(), path)
}

pub async fn make_directory(client: &SshClient, path: &str) -> Result<(), FileError> {
    run_ok(client, &format!("mkdir -p {} && echo {}", shell_escape(path), SUCCESS_MARKER)).await
}

pub async fn delete_entry(client: &SshClient, path: &str) -> Result<(), FileError> {
    run_ok(client, &format!("rm -rf {} && echo {}", shell_escape(path), SUCCESS_MARKER)).await
}

pub async fn touch_file(client: &SshClient, path: &str) -> Result<(), FileError> {
    run_ok(client, &format!("touch {} && echo {}", shell_escape(path), SUCCESS_MARKER)).await
}

pub async fn rename_entry(client: &SshClient, old_path: &str, new_path: &str) -> Result<(), FileError> {
    run_ok(
        client,
        &format!("mv {} {} && echo {}", shell_escape(old_path), shell_escape(new_path), SUCCESS_MARKER),
    )
    .await
}

/// Shell-fallback success marker: the commands `run_ok` runs append
/// `&& echo SUCCESS`, and success is the literal string appearing on
/// stdout, not just a zero exit code (a command can exit 0 and still not
/// have done what it claims, e.g. `mv` silently no-op'ing on some `sh`s).
const SUCCESS_MARKER: &str = "SUCCESS";

async fn run_ok(client: &SshClient, command: &str) -> Result<(), FileError> {
    let output = client.exec(command).await?;
    if output.success() && output.stdout_string().contains(SUCCESS_MARKER) {
        return Ok(());
    }
    let stderr = output.stderr_string();
    if stderr.to_lowercase().contains("permission denied") {
        return Err(FileError::PermissionDenied(stderr.trim().to_string()));
    }
    Err(FileError::RemoteCommand(if stderr.trim().is_empty() {
        format!("exited {} without success marker", output.exit_code)
    } else {
        stderr.trim().to_string()
    }))
}

pub async fn stat_size(client: &SshClient, path: &str) -> Result<u64, FileError> {
    let command = format!("stat -c%s {} 2>/dev/null || stat -f%z {}", shell_escape(path), shell_escape(path));
    let output = client.exec(&command).await?;
    output.stdout_string().trim().parse().map_err(|_| FileError::NotFound(path.to_string()))
}

pub async fn read_text_file(client: &SshClient, path: &str) -> Result<String, FileError> {
    let size = stat_size(client, path).await?;
    if size > MAX_TEXT_SIZE {
        return Err(FileError::TooLarge { size, max: MAX_TEXT_SIZE });
    }
    let output = client.exec(&format!("base64 {}", shell_escape(path))).await?;
    let clean: String = output.stdout_string().chars().filter(|c| !c.is_whitespace()).collect();
    if clean.is_empty() {
        return Ok(String::new());
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&clean)
        .map_err(|e| FileError::RemoteCommand(format!("base64 decode: {e}")))?;
    String::from_utf8(bytes).map_err(|_| FileError::NotUtf8)
}

pub async fn write_text_file(client: &SshClient, path: &str, content: &str) -> Result<(), FileError> {
    write_file(client, path, content.as_bytes()).await
}

pub async fn write_file(client: &SshClient, path: &str, data: &[u8]) -> Result<(), FileError> {
    if data.is_empty() {
        return run_ok(client, &format!(": > {} && echo {}", shell_escape(path), SUCCESS_MARKER)).await;
    }
    let command = format!("base64 -d > {} && echo {}", shell_escape(path), SUCCESS_MARKER);
    let mut chunks = data.chunks(CHUNK_SIZE);
    let output = client
        .exec_streaming_stdin(&command, move || {
            chunks.next().map(|chunk| {
                let mut b64 = base64::engine::general_purpose::STANDARD.encode(chunk);
                b64.push('\n');
                b64.into_bytes()
            })
        })
        .await?;
    if output.success() && output.stdout_string().contains(SUCCESS_MARKER) {
        return Ok(());
    }
    let stderr = output.stderr_string();
    if stderr.to_lowercase().contains("permission denied") {
        return Err(FileError::PermissionDenied(path.to_string()));
    }
    Err(FileError::RemoteCommand(if stderr.trim().is_empty() {
        "write exited without success marker".to_string()
    } else {
        stderr.trim().to_string()
    }))
}

pub async fn download_file(client: &SshClient, remote_path: &str, local_path: &str) -> Result<u64, FileError> {
    use std::io::Write;

    let size = stat_size(client, remote_path).await.unwrap_or(0);
    if size == 0 {
        let exists = client.exec(&format!("test -f {} && echo EXISTS", shell_escape(remote_path))).await?;
        if !exists.stdout_string().contains("EXISTS") {
            return Err(FileError::NotFound(remote_path.to_string()));
        }
        std::fs::write(local_path, b"").map_err(|e| FileError::RemoteCommand(format!("local write: {e}")))?;
        return Ok(0);
    }

    let mut file = std::fs::File::create(local_path).map_err(|e| FileError::RemoteCommand(format!("local create: {e}")))?;
    let mut carry = String::new();
    let mut written: u64 = 0;
    let mut decode_err: Option<String> = None;

    let command = format!("base64 {}", shell_escape(remote_path));
    client
        .exec_streaming_stdout(&command, |chunk| {
            if decode_err.is_some() {
                return;
            }
            carry.push_str(&String::from_utf8_lossy(chunk));
            while let Some(pos) = carry.find('\n') {
                let line: String = carry[..pos].chars().filter(|c| !c.is_whitespace()).collect();
                carry = carry[pos + 1..].to_string();
                if line.is_empty() {
                    continue;
                }
                match base64::engine::general_purpose::STANDARD.decode(&line) {
                    Ok(bytes) => {
                        if file.write_all(&bytes).is_ok() {
                            written += bytes.len() as u64;
                        }
                    }
                    Err(e) => decode_err = Some(e.to_string()),
                }
            }
        })
        .await?;

    if let Some(e) = decode_err {
        return Err(FileError::RemoteCommand(format!("base64 decode: {e}")));
    }

    let remaining: String = carry.chars().filter(|c| !c.is_whitespace()).collect();
    if !remaining.is_empty() {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&remaining)
            .map_err(|e| FileError::RemoteCommand(format!("base64 decode tail: {e}")))?;
        file.write_all(&bytes).map_err(|e| FileError::RemoteCommand(format!("local write: {e}")))?;
        written += bytes.len() as u64;
    }
    file.flush().map_err(|e| FileError::RemoteCommand(format!("local flush: {e}")))?;
    Ok(written)
}

pub async fn upload_file(client: &SshClient, local_path: &str, remote_path: &str) -> Result<u64, FileError> {
    let data = std::fs::read(local_path).map_err(|e| FileError::RemoteCommand(format!("local read: {e}")))?;
    write_file(client, remote_path, &data).await?;
    Ok(data.len() as u64)
}

fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\"'\"'"))
}

fn parse_ls_output(output: &str, base_path: &str) -> Result<Vec<RemoteEntry>, FileError> {
    let mut entries = Vec::new();
    let base = if base_path.ends_with('/') { base_path.to_string() } else { format!("{base_path}/") };

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("total") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 7 {
            continue;
        }
        let permissions = parts[0].to_string();
        if !permissions.starts_with(|c: char| "d-lcbps".contains(c)) {
            continue;
        }
        let is_directory = permissions.starts_with('d');
        let size: u64 = parts[4].parse().unwrap_or(0);

        let (modified, name) = if parts[5].parse::<u64>().is_ok() {
            let ts = parts[5].parse::<u64>().unwrap_or(0);
            (ts, parts[6..].join(" "))
        } else if parts.len() >= 9 {
            (0u64, parts[8..].join(" "))
        } else {
            (0u64, parts[parts.len() - 1].to_string())
        };

        if name == "." || name == ".." || name.is_empty() {
            continue;
        }
        let clean_name = name.find(" -> ").map(|idx| name[..idx].to_string()).unwrap_or(name);

        entries.push(RemoteEntry {
            path: format!("{base}{clean_name}"),
            name: clean_name,
            is_directory,
            size,
            modified,
            permissions,
        });
    }

    entries.sort_by(|a, b| b.is_directory.cmp(&a.is_directory).then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase())));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ls_epoch_format() {
        let output = "drwxr-xr-x 2 user user 4096 1700000000 subdir\n-rw-r--r-- 1 user user 123 1700000001 file.txt\n";
        let entries = parse_ls_output(output, "/home/user").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_directory);
        assert_eq!(entries[0].name, "subdir");
        assert_eq!(entries[0].path, "/home/user/subdir");
        assert!(!entries[1].is_directory);
        assert_eq!(entries[1].size, 123);
    }

    #[test]
    fn test_parse_ls_skips_dot_entries() {
        let output = "total 8\ndrwxr-xr-x 2 user user 4096 1700000000 .\ndrwxr-xr-x 2 user user 4096 1700000000 ..\n";
        let entries = parse_ls_output(output, "/home/user").unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_parse_ls_strips_symlink_target() {
        let output = "lrwxrwxrwx 1 user user 7 1700000000 link -> target\n";
        let entries = parse_ls_output(output, "/home/user").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "link");
    }

    #[test]
    fn test_shell_escape_single_quote() {
        assert_eq!(shell_escape("it's"), "'it'\"'\"'s'");
    }
}

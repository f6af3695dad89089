//! Thin russh wrapper: handshake, authentication, command execution, and a
//! PTY channel for [`crate::terminal`]. No pooling lives here — that is
//! [`super::pool`]'s job.

use std::sync::Arc;

use async_trait::async_trait;
use russh::{client, ChannelMsg};
use thiserror::Error;
use tokio::time::{timeout, Duration};

use crate::credential_resolver::AuthMode;

#[derive(Debug, Error)]
pub enum SshError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("authentication failed")]
    AuthFailed,
    #[error("channel error: {0}")]
    ChannelError(String),
    #[error("connect timed out")]
    Timeout,
}

/// Authentication parameters accepted by [`SshClient::connect`]. Mirrors
/// [`AuthMode`] but is local to the SSH layer so it does not have to depend
/// on the credential resolver for its own compilation unit boundary.
#[derive(Debug, Clone)]
pub enum AuthParams {
    Password(String),
    /// `private_key` is PEM text (already normalized), not a filesystem path.
    Key { private_key: String, passphrase: Option<String> },
}

impl From<AuthMode> for AuthParams {
    fn from(mode: AuthMode) -> Self {
        match mode {
            AuthMode::Password(p) => AuthParams::Password(p),
            AuthMode::Key { private_key, passphrase } => AuthParams::Key { private_key, passphrase },
        }
    }
}

pub struct SshClientHandler;

#[async_trait]
impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    /// No known_hosts verification: the control plane connects to
    /// operator-managed hosts identified by the stored host record, not by
    /// a browser-style trust-on-first-use prompt.
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// A single, unpooled SSH connection. Holds the russh handle; channels are
/// opened per operation since russh's `Handle` supports concurrent channels.
pub struct SshClient {
    handle: client::Handle<SshClientHandler>,
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const EXEC_TIMEOUT: Duration = Duration::from_secs(30);

impl SshClient {
    /// Open a control SSH connection and authenticate. Timed out at the
    /// caller's discretion (the pool applies its own 30 s creation timeout;
    /// the tunnel engine applies its own 60 s connect timeout around the
    /// whole establish sequence).
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        auth: &AuthParams,
    ) -> Result<Self, SshError> {
        let connect_fut = async {
            let config = Arc::new(client::Config::default());
            let mut handle = client::connect(config, (host, port), SshClientHandler)
                .await
                .map_err(|e| SshError::ConnectionFailed(e.to_string()))?;

            let authenticated = match auth {
                AuthParams::Password(password) => handle
                    .authenticate_password(username, password)
                    .await
                    .map_err(|e| SshError::ConnectionFailed(e.to_string()))?,
                AuthParams::Key { private_key, passphrase } => {
                    let key = russh_keys::decode_secret_key(private_key, passphrase.as_deref())
                        .map_err(|e| SshError::ConnectionFailed(format!("key load error: {e}")))?;
                    handle
                        .authenticate_publickey(username, Arc::new(key))
                        .await
                        .map_err(|e| SshError::ConnectionFailed(e.to_string()))?
                }
            };

            if !authenticated {
                return Err(SshError::AuthFailed);
            }
            Ok(handle)
        };

        let handle = timeout(CONNECT_TIMEOUT, connect_fut)
            .await
            .map_err(|_| SshError::Timeout)??;

        Ok(Self { handle })
    }

    /// Run a command to completion, collecting stdout/stderr separately and
    /// the exit code. Used by the metrics collector and the file manager's
    /// shell fallback.
    pub async fn exec(&self, command: &str) -> Result<ExecOutput, SshError> {
        self.exec_with_timeout(command, EXEC_TIMEOUT).await
    }

    pub async fn exec_with_timeout(
        &self,
        command: &str,
        command_timeout: Duration,
    ) -> Result<ExecOutput, SshError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::ChannelError(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::ChannelError(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code: i32 = -1;
        let mut got_eof = false;
        let mut got_exit = false;

        loop {
            let msg = timeout(command_timeout, channel.wait())
                .await
                .map_err(|_| SshError::Timeout)?;
            match msg {
                Some(ChannelMsg::Data { ref data }) => stdout.extend_from_slice(data),
                Some(ChannelMsg::ExtendedData { ref data, .. }) => stderr.extend_from_slice(data),
                Some(ChannelMsg::Eof) => {
                    got_eof = true;
                    if got_exit {
                        break;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = exit_status as i32;
                    got_exit = true;
                    if got_eof {
                        break;
                    }
                }
                None => break,
                _ => {}
            }
        }

        Ok(ExecOutput { stdout, stderr, exit_code })
    }

    /// Write raw bytes to a channel's stdin and close it, returning the
    /// final exit status. Used by the file manager's chunked-base64 write
    /// path, which needs to stream data into a running command.
    pub async fn exec_streaming_stdin(
        &self,
        command: &str,
        mut chunks: impl FnMut() -> Option<Vec<u8>>,
    ) -> Result<ExecOutput, SshError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::ChannelError(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::ChannelError(e.to_string()))?;

        while let Some(chunk) = chunks() {
            channel
                .data(chunk.as_slice())
                .await
                .map_err(|e| SshError::ChannelError(e.to_string()))?;
        }
        channel.eof().await.map_err(|e| SshError::ChannelError(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code: i32 = -1;
        let mut got_eof = false;
        let mut got_exit = false;
        loop {
            let msg = timeout(EXEC_TIMEOUT, channel.wait())
                .await
                .map_err(|_| SshError::Timeout)?;
            match msg {
                Some(ChannelMsg::Data { ref data }) => stdout.extend_from_slice(data),
                Some(ChannelMsg::ExtendedData { ref data, .. }) => stderr.extend_from_slice(data),
                Some(ChannelMsg::Eof) => {
                    got_eof = true;
                    if got_exit {
                        break;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = exit_status as i32;
                    got_exit = true;
                    if got_eof {
                        break;
                    }
                }
                None => break,
                _ => {}
            }
        }
        Ok(ExecOutput { stdout, stderr, exit_code })
    }

    /// Run a command, handing each stdout chunk to `on_data` as it arrives
    /// instead of buffering it all in memory. Used by the file manager's
    /// shell-fallback download path for files too large to buffer whole.
    pub async fn exec_streaming_stdout(
        &self,
        command: &str,
        mut on_data: impl FnMut(&[u8]),
    ) -> Result<ExecOutput, SshError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::ChannelError(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::ChannelError(e.to_string()))?;

        let mut stderr = Vec::new();
        let mut exit_code: i32 = -1;
        let mut got_eof = false;
        let mut got_exit = false;

        loop {
            let msg = timeout(EXEC_TIMEOUT, channel.wait())
                .await
                .map_err(|_| SshError::Timeout)?;
            match msg {
                Some(ChannelMsg::Data { ref data }) => on_data(data),
                Some(ChannelMsg::ExtendedData { ref data, .. }) => stderr.extend_from_slice(data),
                Some(ChannelMsg::Eof) => {
                    got_eof = true;
                    if got_exit {
                        break;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = exit_status as i32;
                    got_exit = true;
                    if got_eof {
                        break;
                    }
                }
                None => break,
                _ => {}
            }
        }

        Ok(ExecOutput { stdout: Vec::new(), stderr, exit_code })
    }

    /// Open an SFTP subsystem channel for [`crate::files`]'s SFTP-first path.
    pub async fn open_sftp(&self) -> Result<russh_sftp::client::SftpSession, SshError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::ChannelError(e.to_string()))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| SshError::ChannelError(e.to_string()))?;
        russh_sftp::client::SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SshError::ChannelError(format!("sftp init failed: {e}")))
    }

    /// Open an interactive PTY + shell channel for [`crate::terminal`].
    pub async fn open_pty(
        &self,
        cols: u16,
        rows: u16,
    ) -> Result<russh::Channel<client::Msg>, SshError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::ChannelError(e.to_string()))?;
        channel
            .request_pty(false, "xterm-256color", cols as u32, rows as u32, 0, 0, &[])
            .await
            .map_err(|e| SshError::ChannelError(e.to_string()))?;
        channel
            .request_shell(false)
            .await
            .map_err(|e| SshError::ChannelError(e.to_string()))?;
        Ok(channel)
    }

    pub async fn disconnect(self) {
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await;
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

//! C10 TerminalSession: an interactive PTY bridged to plain byte channels,
//! so the (sketched) transport layer only has to move bytes in and out, not
//! know anything about russh. Grounded in the teacher's old
//! `ssh_session_task` PTY pump, generalized from `tauri::AppHandle::emit`
//! to an `mpsc` channel pair any transport can drive.

use russh::{client, ChannelMsg};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ssh::client::{AuthParams, SshClient, SshError};

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error(transparent)]
    Ssh(#[from] SshError),
    #[error("terminal session already closed")]
    Closed,
}

/// Bytes-in/bytes-out handle to a running terminal. `write`/`resize`
/// backpressure against the pump task's bounded channels rather than
/// buffering unboundedly; `recv` returns `None` once the session has ended,
/// from either side closing or the connection dropping.
pub struct TerminalSession {
    input: mpsc::Sender<Vec<u8>>,
    output: mpsc::Receiver<Vec<u8>>,
    resize: mpsc::Sender<(u16, u16)>,
    task: JoinHandle<()>,
}

const INPUT_BACKPRESSURE: usize = 32;
const OUTPUT_BACKPRESSURE: usize = 256;
const RESIZE_BACKPRESSURE: usize = 8;

impl TerminalSession {
    /// Open a dedicated (unpooled) SSH connection and PTY. A terminal holds
    /// its channel for the whole interactive session, which doesn't fit the
    /// pool's short-checkout model, so it owns its own connection rather
    /// than borrowing one from [`crate::ssh::pool::SshPool`].
    pub async fn open(
        host: &str,
        port: u16,
        username: &str,
        auth: &AuthParams,
        cols: u16,
        rows: u16,
    ) -> Result<Self, TerminalError> {
        let client = SshClient::connect(host, port, username, auth).await?;
        let channel = client.open_pty(cols, rows).await?;

        let (input_tx, input_rx) = mpsc::channel::<Vec<u8>>(INPUT_BACKPRESSURE);
        let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(OUTPUT_BACKPRESSURE);
        let (resize_tx, resize_rx) = mpsc::channel::<(u16, u16)>(RESIZE_BACKPRESSURE);

        let task = tokio::spawn(pump(client, channel, input_rx, output_tx, resize_rx));

        Ok(Self { input: input_tx, output: output_rx, resize: resize_tx, task })
    }

    pub async fn write(&self, data: Vec<u8>) -> Result<(), TerminalError> {
        self.input.send(data).await.map_err(|_| TerminalError::Closed)
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), TerminalError> {
        self.resize.send((cols, rows)).await.map_err(|_| TerminalError::Closed)
    }

    /// Read the next chunk of terminal output, `None` once the session has
    /// ended.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.output.recv().await
    }

    pub async fn close(self) {
        drop(self.input);
        let _ = self.task.await;
    }
}

async fn pump(
    client: SshClient,
    mut channel: russh::Channel<client::Msg>,
    mut input_rx: mpsc::Receiver<Vec<u8>>,
    output_tx: mpsc::Sender<Vec<u8>>,
    mut resize_rx: mpsc::Receiver<(u16, u16)>,
) {
    // `client` has no other owner once `open` returns; keeping it alive here
    // keeps the underlying russh connection (and this channel) open for the
    // session's lifetime.
    let _client = client;

    loop {
        tokio::select! {
            data = input_rx.recv() => {
                match data {
                    Some(bytes) => {
                        if channel.data(bytes.as_slice()).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = channel.eof().await;
                        break;
                    }
                }
            }
            size = resize_rx.recv() => {
                if let Some((cols, rows)) = size {
                    let _ = channel.window_change(cols as u32, rows as u32, 0, 0).await;
                }
            }
            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { ref data }) | Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                        if output_tx.send(data.to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | Some(ChannelMsg::ExitStatus { .. }) | None => break,
                    _ => {}
                }
            }
        }
    }
}

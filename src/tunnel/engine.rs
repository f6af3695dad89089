//! C8 TunnelEngine: one actor task per tunnel, owning its own
//! `mpsc::Receiver<TunnelCommand>` so state transitions serialize without a
//! lock outside the actor. Reuses [`crate::ssh::pool`] for the control
//! connection to the source host; the spawned remote `ssh -R` process is
//! launched over that connection's exec channel and is not itself pooled
//! (long-lived, not reusable across tunnels).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::Config;
use crate::ssh::client::{AuthParams, SshError};
use crate::ssh::pool::{PoolError, PoolTarget, PooledClient, SshPool};

use super::reap::reap_marker;
use super::types::{TunnelConnectConfig, TunnelError, TunnelErrorKind, TunnelState, TunnelStatus};

/// Launching the remote `ssh -R` process itself has no dedicated `Config`
/// field (it's a one-shot exec, not a held timing budget); the other three
/// come straight from `Config` so a non-default deployment's tunnel tuning
/// actually takes effect.
const LAUNCH_EXEC_TIMEOUT: Duration = Duration::from_secs(15);

/// The subset of `Config` the actor loop needs, resolved once at spawn time.
#[derive(Debug, Clone, Copy)]
pub struct TunnelTiming {
    pub connect_timeout: Duration,
    pub connected_grace: Duration,
    pub ping_interval: Duration,
}

impl TunnelTiming {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.tunnel_connect_timeout_secs),
            connected_grace: Duration::from_secs(config.tunnel_connected_grace_secs),
            ping_interval: Duration::from_secs(config.tunnel_ping_interval_secs),
        }
    }
}

enum TunnelCommand {
    Disconnect,
}

/// Name-keyed status table the HTTP layer polls for tunnel list views.
pub type TunnelStatusMap = Arc<Mutex<HashMap<String, TunnelStatus>>>;

/// Handle to a spawned tunnel actor. Dropping it leaves the actor running;
/// call [`TunnelHandle::disconnect`] for an orderly stop.
pub struct TunnelHandle {
    name: String,
    commands: mpsc::Sender<TunnelCommand>,
    task: JoinHandle<()>,
}

impl TunnelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request an orderly disconnect: reaps the remote marked process and
    /// releases the control connection before the actor exits.
    pub async fn disconnect(&self) {
        let _ = self.commands.send(TunnelCommand::Disconnect).await;
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

pub struct TunnelEngine;

impl TunnelEngine {
    /// Spawn the actor task for `config`, publishing every state transition
    /// into `statuses`. `timing` carries the connect/grace/ping tunables
    /// from the process `Config`.
    pub fn spawn(
        config: TunnelConnectConfig,
        timing: TunnelTiming,
        pool: Arc<SshPool>,
        statuses: TunnelStatusMap,
    ) -> TunnelHandle {
        let (tx, rx) = mpsc::channel(8);
        let name = config.name.clone();
        let task = tokio::spawn(run_actor(config, timing, pool, statuses, rx));
        TunnelHandle { name, commands: tx, task }
    }
}

struct Established {
    control: PooledClient,
}

async fn run_actor(
    config: TunnelConnectConfig,
    timing: TunnelTiming,
    pool: Arc<SshPool>,
    statuses: TunnelStatusMap,
    mut commands: mpsc::Receiver<TunnelCommand>,
) {
    let name = config.name.clone();
    publish(&statuses, TunnelStatus::idle(&name)).await;

    let mut retry_count: u32 = 0;

    loop {
        publish(
            &statuses,
            TunnelStatus { name: name.clone(), connected: false, state: TunnelState::Connecting, retry_count },
        )
        .await;

        let outcome = tokio::select! {
            res = timeout(timing.connect_timeout, establish_tunnel(&config, &pool)) => res,
            cmd = commands.recv() => {
                if let Some(TunnelCommand::Disconnect) = cmd {
                    publish(&statuses, disconnected(&name)).await;
                }
                return;
            }
        };

        let established = match outcome {
            Ok(Ok(established)) => established,
            Ok(Err(err)) => {
                match retry_once(&config, &statuses, &mut retry_count, err, &mut commands).await {
                    RetryOutcome::Retry => continue,
                    RetryOutcome::Stop => return,
                }
            }
            Err(_) => {
                let err = TunnelError::new(TunnelErrorKind::Timeout, "connect timed out");
                match retry_once(&config, &statuses, &mut retry_count, err, &mut commands).await {
                    RetryOutcome::Retry => continue,
                    RetryOutcome::Stop => return,
                }
            }
        };

        // A short grace period before declaring the tunnel stable resets
        // the retry counter only once the remote process has had a chance
        // to fail fast (e.g. immediate `ExitOnForwardFailure`).
        tokio::time::sleep(timing.connected_grace).await;
        retry_count = 0;
        publish(
            &statuses,
            TunnelStatus { name: name.clone(), connected: true, state: TunnelState::Connected, retry_count },
        )
        .await;

        let failure = hold_connected(&config, &timing, &established, &mut commands).await;
        match failure {
            None => {
                // Manual disconnect or sender drop: actor exits after
                // hold_connected has already reaped and published status.
                pool.release(established.control).await;
                return;
            }
            Some(reason) => {
                reap_marker(
                    &config.source.host,
                    config.source.port,
                    &config.source.username,
                    &config.source.auth,
                    &config.marker(),
                    config.endpoint_port,
                    config.source_port,
                )
                .await;
                pool.release(established.control).await;
                match retry_once(&config, &statuses, &mut retry_count, reason, &mut commands).await {
                    RetryOutcome::Retry => continue,
                    RetryOutcome::Stop => return,
                }
            }
        }
    }
}

/// Hold the Connected state, periodically pinging the control connection,
/// until either the link drops (returns `Some(reason)`) or a manual
/// disconnect / handle drop arrives (returns `None`, after reaping and
/// publishing `Disconnected` itself).
async fn hold_connected(
    config: &TunnelConnectConfig,
    timing: &TunnelTiming,
    established: &Established,
    commands: &mut mpsc::Receiver<TunnelCommand>,
) -> Option<TunnelError> {
    let mut ping_ticker = tokio::time::interval(timing.ping_interval);
    ping_ticker.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            _ = ping_ticker.tick() => {
                if let Err(e) = established.control.exec_with_timeout("true", Duration::from_secs(5)).await {
                    return Some(TunnelError::new(TunnelErrorKind::NetworkError, format!("liveness ping failed: {e}")));
                }
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(TunnelCommand::Disconnect) | None => {
                        reap_marker(
                            &config.source.host,
                            config.source.port,
                            &config.source.username,
                            &config.source.auth,
                            &config.marker(),
                            config.endpoint_port,
                            config.source_port,
                        )
                        .await;
                        return None;
                    }
                }
            }
        }
    }
}

/// Outcome of one failure-handling pass: whether the actor loop should go
/// around again, or stop for good (either exhausted/non-retryable, or
/// cancelled by a disconnect during the countdown).
enum RetryOutcome {
    Retry,
    Stop,
}

/// Apply one failure: publish `Failed`, and if retries remain and the error
/// is retryable, count down through `Waiting` to `Retrying`. The countdown
/// selects against `commands` so a disconnect arriving mid-wait is honored
/// immediately rather than sitting unconsumed until the next connect
/// attempt's own `select!`.
async fn retry_once(
    config: &TunnelConnectConfig,
    statuses: &TunnelStatusMap,
    retry_count: &mut u32,
    err: TunnelError,
    commands: &mut mpsc::Receiver<TunnelCommand>,
) -> RetryOutcome {
    *retry_count += 1;
    let exhausted = *retry_count > config.max_retries;

    publish(
        statuses,
        TunnelStatus {
            name: config.name.clone(),
            connected: false,
            state: TunnelState::Failed {
                reason: err.message.clone(),
                retry_exhausted: exhausted || !err.kind.is_retryable(),
                error_type: Some(err.kind),
            },
            retry_count: *retry_count,
        },
    )
    .await;

    if exhausted || !err.kind.is_retryable() {
        return RetryOutcome::Stop;
    }

    let mut remaining = backoff_secs(*retry_count, config.retry_interval_ms);
    while remaining > 0 {
        publish(
            statuses,
            TunnelStatus {
                name: config.name.clone(),
                connected: false,
                state: TunnelState::Waiting { next_in_sec: remaining },
                retry_count: *retry_count,
            },
        )
        .await;

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                remaining -= 1;
            }
            cmd = commands.recv() => {
                if let Some(TunnelCommand::Disconnect) | None = cmd {
                    publish(statuses, disconnected(&config.name)).await;
                    return RetryOutcome::Stop;
                }
            }
        }
    }

    publish(
        statuses,
        TunnelStatus { name: config.name.clone(), connected: false, state: TunnelState::Retrying, retry_count: *retry_count },
    )
    .await;
    RetryOutcome::Retry
}

fn backoff_secs(retry_count: u32, base_ms: u64) -> u32 {
    let base_secs = (base_ms / 1000).max(1) as u32;
    let capped_exp = retry_count.min(6);
    base_secs.saturating_mul(1 << capped_exp).min(300)
}

async fn establish_tunnel(config: &TunnelConnectConfig, pool: &SshPool) -> Result<Established, TunnelError> {
    if let AuthParams::Key { passphrase: Some(_), .. } = &config.endpoint_auth {
        return Err(TunnelError::new(
            TunnelErrorKind::AuthenticationFailed,
            "passphrase-protected endpoint keys are not supported for the spawned remote process",
        ));
    }

    let target = PoolTarget {
        ip: config.source.host.clone(),
        port: config.source.port,
        username: config.source.username.clone(),
        auth: config.source.auth.clone(),
    };
    let control = pool.acquire(&target).await.map_err(|e| classify_pool_error(&e))?;

    let command = build_launch_command(config);
    let output = control
        .exec_with_timeout(&command, LAUNCH_EXEC_TIMEOUT)
        .await
        .map_err(|e| TunnelError::new(TunnelErrorKind::ConnectionFailed, format!("launch exec failed: {e}")))?;

    if !output.success() {
        pool.release(control).await;
        return Err(TunnelError::new(
            TunnelErrorKind::ConnectionFailed,
            format!("remote launch exited {}: {}", output.exit_code, output.stderr_string().trim()),
        ));
    }

    Ok(Established { control })
}

fn classify_pool_error(e: &PoolError) -> TunnelError {
    match e {
        PoolError::Ssh(SshError::AuthFailed) => {
            TunnelError::new(TunnelErrorKind::AuthenticationFailed, "authentication failed")
        }
        PoolError::Ssh(SshError::Timeout) => TunnelError::new(TunnelErrorKind::Timeout, "connect timed out"),
        PoolError::Ssh(other) => TunnelError::new(TunnelErrorKind::ConnectionFailed, other.to_string()),
        PoolError::Capacity => TunnelError::new(TunnelErrorKind::NetworkError, "pool saturated"),
        PoolError::ShuttingDown => TunnelError::new(TunnelErrorKind::Unknown, "pool shutting down"),
    }
}

/// Build the single exec'd command that launches the detached `ssh -R`
/// process on the source host, tagged with `config.marker()` as argv[0] via
/// `exec -a` so [`reap_marker`] can find it later.
fn build_launch_command(config: &TunnelConnectConfig) -> String {
    let marker = config.marker();
    let ssh_opts = format!(
        "-N -o StrictHostKeyChecking=no -o ExitOnForwardFailure=yes -o ServerAliveInterval=30 -o ServerAliveCountMax=3 -o GatewayPorts=yes -R {}:localhost:{}",
        config.endpoint_port, config.source_port
    );
    let target = format!("{}@{}", config.endpoint_username, config.endpoint_host);

    match &config.endpoint_auth {
        AuthParams::Password(password) => format!(
            "(nohup sshpass -p {} env -i exec -a {} ssh {} {} >/dev/null 2>&1 &); disown; echo launched",
            shell_escape(password),
            shell_escape(&marker),
            ssh_opts,
            shell_escape(&target),
        ),
        AuthParams::Key { private_key, .. } => format!(
            "KEYFILE=$(mktemp) && printf '%s\\n' {} > \"$KEYFILE\" && chmod 600 \"$KEYFILE\" && \
             (nohup env -i exec -a {} ssh {} -i \"$KEYFILE\" {} >/dev/null 2>&1 &) && \
             (sleep 2; rm -f \"$KEYFILE\") >/dev/null 2>&1 & disown; echo launched",
            shell_escape(private_key),
            shell_escape(&marker),
            ssh_opts,
            shell_escape(&target),
        ),
    }
}

fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\"'\"'"))
}

async fn publish(statuses: &TunnelStatusMap, status: TunnelStatus) {
    tracing::debug!(name = %status.name, state = ?status.state, "tunnel status transition");
    statuses.lock().await.insert(status.name.clone(), status);
}

fn disconnected(name: &str) -> TunnelStatus {
    TunnelStatus { name: name.to_string(), connected: false, state: TunnelState::Disconnected, retry_count: 0 }
}

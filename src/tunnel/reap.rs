//! §4.8 step 7, remote reap: open a fresh control SSH, enumerate the
//! marker-tagged process, then escalate `pkill` signals, re-verifying and
//! logging any survivor at warn.

use crate::ssh::client::{AuthParams, SshClient};

/// Reap any orphaned `ssh -R ...` process on `source` tagged with `marker`.
/// Opens its own control connection rather than reusing the tunnel's (the
/// tunnel's own control client may already be gone by the time this runs).
pub async fn reap_marker(
    source_host: &str,
    source_port: u16,
    source_username: &str,
    source_auth: &AuthParams,
    marker: &str,
    endpoint_port: u16,
    forward_source_port: u16,
) {
    let client = match SshClient::connect(source_host, source_port, source_username, source_auth).await {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(marker, error = %e, "reap: could not open control SSH to enumerate orphans");
            return;
        }
    };

    let enumerate = format!("ps aux | grep {} | grep -v grep", shell_escape(marker));
    if let Ok(out) = client.exec(&enumerate).await {
        if !out.stdout_string().trim().is_empty() {
            tracing::debug!(marker, listing = %out.stdout_string().trim(), "reap: found marked process(es)");
        }
    }

    let _ = client.exec(&format!("pkill -TERM -f {}", shell_escape(marker))).await;
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;

    let targeted = format!(
        "pkill -f 'ssh.*-R.*{}:localhost:{}'",
        endpoint_port, forward_source_port
    );
    let _ = client.exec(&targeted).await;
    let _ = client.exec(&format!("pkill -9 -f {}", shell_escape(marker))).await;

    if let Ok(verify) = client.exec(&enumerate).await {
        let survivors = verify.stdout_string();
        if !survivors.trim().is_empty() {
            tracing::warn!(marker, survivors = %survivors.trim(), "reap: survivors remain after escalated pkill");
        }
    }

    client.disconnect().await;
}

fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\"'\"'"))
}

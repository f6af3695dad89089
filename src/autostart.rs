//! C11 AutoStart: spins up every `tunnelConnection` marked `autoStart` for
//! a user's hosts, staggered by 1s.
//!
//! Resolution of an open question: the distilled spec describes this as a
//! boot-time scan, but a host's `autostart*` secrets are sealed under the
//! user's per-session DEK (see [`crate::crypto::CryptoEnvelope`]), which
//! only exists once that user has unlocked — there is no session to unlock
//! at process boot. This runs `run_for_user` right after a user's unlock
//! succeeds instead, which is the earliest point their secrets are
//! decryptable, and is functionally equivalent for a control plane that is
//! already running before any user logs in (see DESIGN.md).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::Config;
use crate::credential_resolver::CredentialResolver;
use crate::ssh::client::AuthParams;
use crate::ssh::pool::SshPool;
use crate::store::models::{AuthType, Host, TunnelConnection};
use crate::store::Store;
use crate::tunnel::{TunnelConnectConfig, TunnelEngine, TunnelHandle, TunnelStatusMap, TunnelTiming};
use crate::tunnel::types::{SshEndpoint, TunnelOrigin};
use crate::credential_resolver::ResolveVariant;

const STAGGER: Duration = Duration::from_secs(1);

/// Running tunnel handles keyed by tunnel name, shared with the (sketched)
/// HTTP layer's manual connect/disconnect endpoints.
pub type TunnelHandles = Arc<Mutex<HashMap<String, TunnelHandle>>>;

pub struct AutoStart {
    store: Arc<Store>,
    resolver: Arc<CredentialResolver>,
    pool: Arc<SshPool>,
    timing: TunnelTiming,
}

impl AutoStart {
    pub fn new(store: Arc<Store>, resolver: Arc<CredentialResolver>, pool: Arc<SshPool>, config: &Config) -> Self {
        let timing = TunnelTiming::from_config(config);
        Self { store, resolver, pool, timing }
    }

    /// Enumerate `user_id`'s hosts and spawn a [`TunnelEngine`] for every
    /// `auto_start` tunnel connection, 1s apart.
    pub async fn run_for_user(&self, user_id: &str, statuses: TunnelStatusMap, handles: TunnelHandles) {
        let hosts = match self.store.list_hosts_for_user(user_id).await {
            Ok(hosts) => hosts,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "autostart: failed to list hosts");
                return;
            }
        };

        for host in hosts {
            if !host.enable_tunnel {
                continue;
            }
            for tunnel in host.tunnel_connections.iter().filter(|t| t.auto_start) {
                match self.build_config(user_id, &host, tunnel).await {
                    Ok(config) => {
                        let name = config.name.clone();
                        let handle = TunnelEngine::spawn(config, self.timing, self.pool.clone(), statuses.clone());
                        handles.lock().await.insert(name, handle);
                    }
                    Err(reason) => {
                        tracing::warn!(
                            host_id = %host.id,
                            source_port = tunnel.source_port,
                            reason,
                            "autostart: skipping tunnel, could not resolve credentials"
                        );
                    }
                }
                tokio::time::sleep(STAGGER).await;
            }
        }
    }

    async fn build_config(
        &self,
        user_id: &str,
        host: &Host,
        tunnel: &TunnelConnection,
    ) -> Result<TunnelConnectConfig, String> {
        let source = self
            .resolver
            .resolve(user_id, &host.id, ResolveVariant::Autostart)
            .await
            .map_err(|e| e.to_string())?;

        let (endpoint_username, endpoint_auth) = self.resolve_endpoint_auth(user_id, tunnel).await?;
        let host_name = host.name.clone().unwrap_or_else(|| host.ip.clone());

        Ok(TunnelConnectConfig {
            name: tunnel.tunnel_name(&host_name),
            source: SshEndpoint {
                host: source.host,
                port: source.port,
                username: source.username,
                auth: AuthParams::from(source.auth),
            },
            endpoint_host: tunnel.endpoint_host.clone(),
            endpoint_port: tunnel.endpoint_port,
            endpoint_username,
            endpoint_auth,
            source_port: tunnel.source_port,
            max_retries: tunnel.max_retries,
            retry_interval_ms: tunnel.retry_interval_sec.saturating_mul(1000),
            origin: TunnelOrigin::Autostart,
        })
    }

    /// Endpoint credentials come either from a referenced credential record
    /// or from the tunnel connection's own `endpoint_secrets` field,
    /// mirroring [`CredentialResolver`]'s host-vs-credential split.
    async fn resolve_endpoint_auth(
        &self,
        user_id: &str,
        tunnel: &TunnelConnection,
    ) -> Result<(String, AuthParams), String> {
        if let Some(credential_id) = &tunnel.endpoint_credential_id {
            let credential = self
                .store
                .get_credential(user_id, credential_id)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| "endpoint credential not found".to_string())?;

            let auth = match credential.auth_type {
                AuthType::Password => {
                    AuthParams::Password(credential.password.ok_or("credential missing password")?)
                }
                AuthType::Key => AuthParams::Key {
                    private_key: credential.private_key.ok_or("credential missing private key")?,
                    passphrase: credential.key_passphrase,
                },
                AuthType::Credential => return Err("endpoint credential cannot itself reference a credential".into()),
            };
            return Ok((credential.username, auth));
        }

        let secrets = tunnel
            .endpoint_secrets
            .clone()
            .ok_or("tunnel connection has no endpoint secrets or credential reference")?;

        let auth = match tunnel.endpoint_auth_type {
            AuthType::Password => AuthParams::Password(secrets),
            AuthType::Key => AuthParams::Key { private_key: secrets, passphrase: None },
            AuthType::Credential => return Err("endpointAuthType cannot be credential without a credentialId".into()),
        };
        Ok((tunnel.endpoint_username.clone(), auth))
    }
}

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::credential_resolver::{AuthMode, ResolveVariant};
use crate::error::{ControlPlaneError, ErrorKind};
use crate::ssh::client::AuthParams;
use crate::ssh::pool::PoolTarget;
use crate::state::ControlPlane;
use crate::store::models::AuthType;
use crate::tunnel::{TunnelConnectConfig, TunnelEngine, TunnelTiming};
use crate::tunnel::types::{SshEndpoint, TunnelOrigin, TunnelStatus};

use super::error::ApiError;

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError(ControlPlaneError::new(ErrorKind::Authentication, "missing bearer token")))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
    totp_code: Option<String>,
}

#[derive(Serialize)]
pub struct LoginResponse {
    jwt: String,
    requires_totp: bool,
}

pub async fn login(
    State(plane): State<Arc<ControlPlane>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let result = plane
        .auth
        .login(&body.username, &body.password, body.totp_code.as_deref())
        .await
        .map_err(ControlPlaneError::from)?;

    if !result.requires_totp {
        if let Ok(user_id) = plane.auth.verify(&result.jwt) {
            let (plane, statuses, handles) = (plane.clone(), plane.tunnel_statuses.clone(), plane.tunnel_handles.clone());
            tokio::spawn(async move { plane.autostart.run_for_user(&user_id, statuses, handles).await });
        }
    }

    Ok(Json(LoginResponse { jwt: result.jwt, requires_totp: result.requires_totp }))
}

#[derive(Serialize)]
pub struct HostSummary {
    id: String,
    name: Option<String>,
    ip: String,
    port: u16,
    username: String,
}

pub async fn list_hosts(
    State(plane): State<Arc<ControlPlane>>,
    headers: HeaderMap,
) -> Result<Json<Vec<HostSummary>>, ApiError> {
    let user_id = plane.auth.require_data_access(bearer_token(&headers)?).await.map_err(ControlPlaneError::from)?;
    let hosts = plane.store.list_hosts_for_user(&user_id).await.map_err(ControlPlaneError::from)?;
    Ok(Json(
        hosts
            .into_iter()
            .map(|h| HostSummary { id: h.id, name: h.name, ip: h.ip, port: h.port, username: h.username })
            .collect(),
    ))
}

pub async fn host_metrics(
    State(plane): State<Arc<ControlPlane>>,
    Path(host_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<crate::monitoring::MetricsSnapshot>, ApiError> {
    let user_id = plane.auth.require_data_access(bearer_token(&headers)?).await.map_err(ControlPlaneError::from)?;
    let snapshot = plane.metrics.collect(&user_id, &host_id).await.map_err(ControlPlaneError::from)?;
    Ok(Json(snapshot))
}

#[derive(Deserialize)]
pub struct ListDirectoryQuery {
    host_id: String,
    path: String,
}

/// `GET /ssh/file_manager/listFiles`.
pub async fn list_directory(
    State(plane): State<Arc<ControlPlane>>,
    Query(query): Query<ListDirectoryQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<crate::files::RemoteEntry>>, ApiError> {
    let user_id = plane.auth.require_data_access(bearer_token(&headers)?).await.map_err(ControlPlaneError::from)?;
    let target = pool_target(&plane, &user_id, &query.host_id).await?;
    let entries = plane.files.list_directory(&target, &query.path).await.map_err(ControlPlaneError::from)?;
    Ok(Json(entries))
}

async fn pool_target(plane: &ControlPlane, user_id: &str, host_id: &str) -> Result<PoolTarget, ApiError> {
    let connect = plane
        .resolver
        .resolve(user_id, host_id, ResolveVariant::Normal)
        .await
        .map_err(ControlPlaneError::from)?;
    Ok(PoolTarget {
        ip: connect.host,
        port: connect.port,
        username: connect.username,
        auth: AuthParams::from(connect.auth),
    })
}

#[derive(Deserialize)]
pub struct ConnectTunnelRequest {
    host_id: String,
    tunnel_name: String,
}

#[derive(Serialize)]
pub struct ConnectTunnelResponse {
    message: String,
    tunnel_name: String,
}

/// `POST /ssh/tunnel/connect`, taking `{hostId, tunnelName}` rather than a
/// full `TunnelConfig` body — the host's own stored `tunnelConnections`
/// entry (matched by name) supplies the rest, since this sketch doesn't
/// expose a create-tunnel-connection endpoint of its own.
pub async fn connect_tunnel(
    State(plane): State<Arc<ControlPlane>>,
    headers: HeaderMap,
    Json(body): Json<ConnectTunnelRequest>,
) -> Result<Json<ConnectTunnelResponse>, ApiError> {
    let user_id = plane.auth.require_data_access(bearer_token(&headers)?).await.map_err(ControlPlaneError::from)?;

    let host = plane
        .store
        .get_host(&user_id, &body.host_id)
        .await
        .map_err(ControlPlaneError::from)?
        .ok_or_else(|| ApiError(ControlPlaneError::new(ErrorKind::NotFound, "host not found")))?;

    let host_name = host.name.clone().unwrap_or_else(|| host.ip.clone());
    let tunnel_name = body.tunnel_name;
    let tunnel = host
        .tunnel_connections
        .iter()
        .find(|t| t.tunnel_name(&host_name) == tunnel_name)
        .ok_or_else(|| ApiError(ControlPlaneError::new(ErrorKind::NotFound, "tunnel connection not found")))?;

    let source = plane
        .resolver
        .resolve(&user_id, &host.id, ResolveVariant::Normal)
        .await
        .map_err(ControlPlaneError::from)?;

    let endpoint_auth = match tunnel.endpoint_auth_type {
        AuthType::Password => AuthMode::Password(
            tunnel
                .endpoint_secrets
                .clone()
                .ok_or_else(|| ApiError(ControlPlaneError::new(ErrorKind::CredentialResolution, "tunnel missing endpoint password")))?,
        ),
        AuthType::Key => AuthMode::Key {
            private_key: tunnel
                .endpoint_secrets
                .clone()
                .ok_or_else(|| ApiError(ControlPlaneError::new(ErrorKind::CredentialResolution, "tunnel missing endpoint key")))?,
            passphrase: None,
        },
        AuthType::Credential => {
            return Err(ApiError(ControlPlaneError::new(
                ErrorKind::Validation,
                "credential-referencing tunnels are resolved via AutoStart only in this sketch",
            )))
        }
    };

    let config = TunnelConnectConfig {
        name: tunnel_name.clone(),
        source: SshEndpoint { host: source.host, port: source.port, username: source.username, auth: AuthParams::from(source.auth) },
        endpoint_host: tunnel.endpoint_host.clone(),
        endpoint_port: tunnel.endpoint_port,
        endpoint_username: tunnel.endpoint_username.clone(),
        endpoint_auth: AuthParams::from(endpoint_auth),
        source_port: tunnel.source_port,
        max_retries: tunnel.max_retries,
        retry_interval_ms: tunnel.retry_interval_sec.saturating_mul(1000),
        origin: TunnelOrigin::Manual,
    };

    let timing = TunnelTiming::from_config(&plane.config);
    let handle = TunnelEngine::spawn(config, timing, plane.pool.clone(), plane.tunnel_statuses.clone());

    // A prior handle for the same name (left running from an earlier
    // connect) must be torn down, not just overwritten — otherwise its
    // actor, remote `ssh -R` process, and pool slot all leak.
    let previous = plane.tunnel_handles.lock().await.insert(tunnel_name.clone(), handle);
    if let Some(previous) = previous {
        previous.disconnect().await;
        previous.join().await;
    }

    Ok(Json(ConnectTunnelResponse { message: "tunnel connect started".to_string(), tunnel_name }))
}

#[derive(Deserialize)]
pub struct DisconnectTunnelRequest {
    tunnel_name: String,
}

pub async fn disconnect_tunnel(
    State(plane): State<Arc<ControlPlane>>,
    headers: HeaderMap,
    Json(body): Json<DisconnectTunnelRequest>,
) -> Result<(), ApiError> {
    plane.auth.require_data_access(bearer_token(&headers)?).await.map_err(ControlPlaneError::from)?;

    let handle = plane.tunnel_handles.lock().await.remove(&body.tunnel_name);
    match handle {
        Some(handle) => {
            handle.disconnect().await;
            handle.join().await;
            Ok(())
        }
        None => Err(ApiError(ControlPlaneError::new(ErrorKind::NotFound, "tunnel not running"))),
    }
}

pub async fn tunnel_statuses(
    State(plane): State<Arc<ControlPlane>>,
    headers: HeaderMap,
) -> Result<Json<Vec<TunnelStatus>>, ApiError> {
    plane.auth.require_data_access(bearer_token(&headers)?).await.map_err(ControlPlaneError::from)?;
    Ok(Json(plane.tunnel_statuses.lock().await.values().cloned().collect()))
}

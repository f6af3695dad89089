//! The control plane's process-lifecycle type: owns every long-lived
//! component (C1-C11) behind `Arc`, wires constructors from [`Config`], and
//! drains tunnels and the SSH pool on shutdown. Generalizes the teacher's
//! `AppState` (a `tauri::Manager`-managed bag of `Arc<Mutex<...>>` fields)
//! from a desktop app's single-process lifetime to a headless daemon's.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthGate;
use crate::autostart::{AutoStart, TunnelHandles};
use crate::config::Config;
use crate::credential_resolver::CredentialResolver;
use crate::crypto::{CryptoEnvelope, SharedEnvelope};
use crate::error::{ControlPlaneError, ErrorKind};
use crate::files::FileManager;
use crate::monitoring::MetricsCollector;
use crate::queue::RequestQueue;
use crate::ssh::pool::SshPool;
use crate::store::Store;
use crate::tunnel::TunnelStatusMap;

/// Every long-lived component, `Arc`-wrapped so HTTP handlers (and
/// background tasks like autostart) can each hold their own clone.
pub struct ControlPlane {
    pub config: Config,
    pub envelope: SharedEnvelope,
    pub store: Arc<Store>,
    pub auth: Arc<AuthGate>,
    pub resolver: Arc<CredentialResolver>,
    pub pool: Arc<SshPool>,
    pub queue: Arc<RequestQueue>,
    pub metrics: Arc<MetricsCollector>,
    pub files: Arc<FileManager>,
    pub autostart: Arc<AutoStart>,
    /// Live tunnel handles, keyed by tunnel name. Shared between the
    /// (sketched) HTTP connect/disconnect endpoints and [`AutoStart`].
    pub tunnel_handles: TunnelHandles,
    /// Latest published [`crate::tunnel::TunnelStatus`] per tunnel name,
    /// read by the (sketched) HTTP status endpoint without touching the
    /// handles map.
    pub tunnel_statuses: TunnelStatusMap,
}

impl ControlPlane {
    /// Construct every component from `config`, opening (or creating) the
    /// store database at `config.data_dir`. Does not itself start any
    /// autostart tunnels — the (sketched) HTTP layer runs
    /// `autostart.run_for_user` right after a user's `login` unlocks their
    /// DEK (see [`crate::autostart`]'s module doc comment for why boot-time
    /// enumeration doesn't fit the crypto design).
    pub async fn init(config: Config) -> Result<Arc<Self>, ControlPlaneError> {
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| ControlPlaneError::new(ErrorKind::Internal, format!("could not create data dir: {e}")))?;

        let unlock_idle_ttl = Duration::from_secs(config.unlock_session_idle_mins * 60);
        let envelope: SharedEnvelope = Arc::new(
            CryptoEnvelope::init(unlock_idle_ttl)
                .map_err(|e| ControlPlaneError::new(ErrorKind::Internal, format!("master key init failed: {e}")))?,
        );

        let db_path = config.data_dir.join("sshcp.db");
        let store = Arc::new(
            Store::open(&db_path, envelope.clone())
                .await
                .map_err(|e| ControlPlaneError::new(ErrorKind::Internal, format!("store open failed: {e}")))?,
        );

        let auth = Arc::new(AuthGate::new(store.clone(), envelope.clone()));
        let resolver = Arc::new(CredentialResolver::new(store.clone()));

        let pool = SshPool::new(
            config.max_connections_per_host,
            Duration::from_secs(config.pool_idle_ttl_secs),
            Duration::from_secs(config.pool_create_timeout_secs),
            Duration::from_secs(config.pool_janitor_interval_secs),
        );

        let queue = RequestQueue::new();

        let metrics = Arc::new(MetricsCollector::new(
            resolver.clone(),
            pool.clone(),
            queue.clone(),
            Duration::from_secs(config.metrics_cache_ttl_secs),
            Duration::from_secs(config.liveness_probe_timeout_secs),
            Duration::from_secs(config.metrics_collect_timeout_secs),
        ));

        let files = Arc::new(FileManager::new(pool.clone()));
        let autostart = Arc::new(AutoStart::new(store.clone(), resolver.clone(), pool.clone(), &config));

        Ok(Arc::new(Self {
            config,
            envelope,
            store,
            auth,
            resolver,
            pool,
            queue,
            metrics,
            files,
            autostart,
            tunnel_handles: TunnelHandles::default(),
            tunnel_statuses: TunnelStatusMap::default(),
        }))
    }

    /// Disconnect every live tunnel and drain the SSH pool. Called once,
    /// from `main`'s signal handler, before the process exits.
    pub async fn shutdown(&self) {
        tracing::info!("control plane shutting down");

        let handles: Vec<_> = self.tunnel_handles.lock().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.disconnect().await;
            handle.join().await;
        }

        self.pool.destroy().await;
        tracing::info!("control plane shutdown complete");
    }
}

//! Binary entry point: load config, build the control plane, serve HTTP,
//! and drain cleanly on SIGINT/SIGTERM. Generalizes the teacher's
//! `tauri::Builder::default().setup(...)` bootstrap (load config, manage
//! state, run) to a headless daemon with no window to own the event loop.

use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use sshcp::config::Config;
use sshcp::state::ControlPlane;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    tracing::info!(data_dir = %config.data_dir.display(), "starting control plane");

    let plane = match ControlPlane::init(config).await {
        Ok(plane) => plane,
        Err(e) => {
            tracing::error!(error = %e, "control plane failed to start");
            std::process::exit(1);
        }
    };

    let port = plane.config.ssl_port.unwrap_or(8443);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let router = sshcp::http::router(plane.clone());

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind HTTP listener");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "listening");

    tokio::select! {
        result = axum::serve(listener, router) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server exited with error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    plane.shutdown().await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler").recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

//! Connector HTTP Server

use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, task};
use tracing::{error, info};

use axum::{
    Router,
    routing::{get, post},
};
use common::Serial;
use device::{Proxy, UsbBackend};

use super::handlers;
use super::middleware::{self, HostAllowlist};

/// Shared by every request handler
pub struct AppState<B: UsbBackend> {
    pub proxy: Arc<Proxy<B>>,
    /// Serial the connector was started for, reported by the status page
    pub serial: Serial,
    /// Configured listen address, reported by the status page
    pub listen: Arc<str>,
    pub allowlist: HostAllowlist,
}

impl<B: UsbBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            proxy: self.proxy.clone(),
            serial: self.serial.clone(),
            listen: self.listen.clone(),
            allowlist: self.allowlist.clone(),
        }
    }
}

/// Create and configure the Axum router
pub fn create_router<B: UsbBackend>(state: AppState<B>) -> Router {
    let allowlist = state.allowlist.clone();
    Router::new()
        .route("/connector/api", post(handlers::api::<B>))
        .route("/connector/status", get(handlers::status::<B>))
        .layer(axum::middleware::from_fn_with_state(
            allowlist,
            middleware::wrap,
        ))
        .with_state(state)
}

/// Serve until `shutdown` resolves, then close the device session
pub async fn run<B: UsbBackend>(
    listener: TcpListener,
    state: AppState<B>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let proxy = state.proxy.clone();
    let app = create_router(state);

    info!(address = %listener.local_addr()?, "hsm-connector listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    info!("closing usb session");
    task::spawn_blocking(move || proxy.shutdown("shutdown")).await?;
    Ok(())
}

/// Wait for SIGTERM or SIGINT signal
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Starting graceful shutdown...");
}

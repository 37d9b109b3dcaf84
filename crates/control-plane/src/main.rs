//! Control Plane
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Validate configuration and build the server
//! 3. Bind HTTP, gRPC and secure gRPC listeners
//! 4. Wait for shutdown signal, then cancel every serving task

#![warn(clippy::pedantic)]

use std::time::Duration;

use control_plane::{Config, Server};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time allowed for serving tasks to drain after cancellation.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "control_plane=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Control Plane");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        namespace = %config.namespace,
        http_bind_address = %config.http_bind_address,
        grpc_bind_address = %config.grpc_bind_address,
        secure_grpc_bind_address = %config.secure_grpc_bind_address,
        cert_dir = %config.cert_dir.display(),
        refresh_delay_ms = config.refresh_delay_ms,
        "Configuration loaded successfully"
    );

    let mut server = Server::new(config).map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    let shutdown_token = CancellationToken::new();
    server.start(shutdown_token.child_token()).await.map_err(|e| {
        error!(error = %e, "Failed to start control plane");
        e
    })?;

    info!("Control Plane running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    server.health_state().set_not_ready();
    shutdown_token.cancel();

    tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;

    info!("Control Plane shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. Without them the process
/// cannot shut down gracefully.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

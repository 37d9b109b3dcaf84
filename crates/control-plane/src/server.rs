//! Control plane server.
//!
//! Owns the three listeners (HTTP, plain gRPC, TLS gRPC) and the config sync
//! task. `start` returns as soon as every listener is bound; serving happens
//! on spawned tasks that stop when the shutdown token is cancelled.

use crate::config::Config;
use crate::config_sync::{run_config_sync, SyncStatus, DISCOVERY_SERVICE};
use crate::errors::ServerError;
use crate::observability::HealthState;
use crate::registry::ServiceRegistry;
use crate::routes::{build_routes, AppState};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Router as GrpcRouter;
use tonic::transport::{Identity, Server as GrpcServer, ServerTlsConfig};
use tonic_health::ServingStatus;
use tracing::{error, info};

/// Certificate chain file name inside `Config::cert_dir`.
pub const CERT_CHAIN_FILE: &str = "cert-chain.pem";

/// Private key file name inside `Config::cert_dir`.
pub const KEY_FILE: &str = "key.pem";

/// The listeners a control plane exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Listener {
    Http,
    Grpc,
    SecureGrpc,
}

impl Listener {
    pub const ALL: [Listener; 3] = [Listener::Http, Listener::Grpc, Listener::SecureGrpc];
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Listener::Http => f.write_str("HTTP"),
            Listener::Grpc => f.write_str("gRPC"),
            Listener::SecureGrpc => f.write_str("secure gRPC"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BoundAddrs {
    http: SocketAddr,
    grpc: SocketAddr,
    secure_grpc: SocketAddr,
}

/// A control plane instance.
#[derive(Debug)]
pub struct Server {
    config: Config,
    registry: ServiceRegistry,
    health_state: Arc<HealthState>,
    sync_status: Arc<SyncStatus>,
    bound: Option<BoundAddrs>,
}

impl Server {
    /// Validate `config` and build a server. Nothing is bound yet.
    pub fn new(config: Config) -> Result<Self, ServerError> {
        for (listener, addr) in [
            (Listener::Http, &config.http_bind_address),
            (Listener::Grpc, &config.grpc_bind_address),
            (Listener::SecureGrpc, &config.secure_grpc_bind_address),
        ] {
            addr.parse::<SocketAddr>().map_err(|e| {
                ServerError::Config(format!("Invalid {listener} bind address {addr:?}: {e}"))
            })?;
        }

        if config.refresh_delay_ms == 0 {
            return Err(ServerError::Config(
                "Refresh delay must be greater than zero".to_string(),
            ));
        }

        if config.max_message_size == 0 {
            return Err(ServerError::Config(
                "Max message size must be greater than zero".to_string(),
            ));
        }

        if let Some(dir) = &config.config_dir {
            if !dir.is_dir() {
                return Err(ServerError::Config(format!(
                    "Config directory {} does not exist",
                    dir.display()
                )));
            }
        }

        let registry = ServiceRegistry::from_names(&config.registries, &config.namespace)?;

        Ok(Self {
            config,
            registry,
            health_state: Arc::new(HealthState::new()),
            sync_status: Arc::new(SyncStatus::new()),
            bound: None,
        })
    }

    /// Bind all listeners and spawn the serving tasks.
    ///
    /// Must be called from within a Tokio runtime. Returns once every
    /// listener is bound; the control plane becomes ready later, when the
    /// initial config sync completes. Cancelling `shutdown` stops the accept
    /// loops and releases the listeners.
    pub async fn start(&mut self, shutdown: CancellationToken) -> Result<(), ServerError> {
        if self.bound.is_some() {
            return Err(ServerError::AlreadyStarted);
        }

        let identity = load_identity(&self.config.cert_dir).await?;
        let tls_builder = GrpcServer::builder()
            .tls_config(ServerTlsConfig::new().identity(identity))
            .map_err(|e| ServerError::Tls(e.to_string()))?;

        let http_listener = bind_listener(Listener::Http, &self.config.http_bind_address).await?;
        let grpc_listener = bind_listener(Listener::Grpc, &self.config.grpc_bind_address).await?;
        let secure_listener =
            bind_listener(Listener::SecureGrpc, &self.config.secure_grpc_bind_address).await?;

        let bound = BoundAddrs {
            http: local_addr(Listener::Http, &self.config.http_bind_address, &http_listener)?,
            grpc: local_addr(Listener::Grpc, &self.config.grpc_bind_address, &grpc_listener)?,
            secure_grpc: local_addr(
                Listener::SecureGrpc,
                &self.config.secure_grpc_bind_address,
                &secure_listener,
            )?,
        };

        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_service_status(DISCOVERY_SERVICE, ServingStatus::NotServing)
            .await;
        let health_service = health_service.max_decoding_message_size(self.config.max_message_size);

        let app = build_routes(
            Arc::new(AppState {
                config: self.config.clone(),
                registry: self.registry.clone(),
                sync_status: Arc::clone(&self.sync_status),
            }),
            Arc::clone(&self.health_state),
        );

        let http_token = shutdown.child_token();
        let http_addr = bound.http;
        tokio::spawn(async move {
            info!(addr = %http_addr, "HTTP server starting");
            let server = axum::serve(http_listener, app).with_graceful_shutdown(async move {
                http_token.cancelled().await;
                info!("HTTP server shutting down");
            });
            if let Err(e) = server.await {
                error!(error = %e, "HTTP server failed");
            }
        });

        spawn_grpc_server(
            Listener::Grpc,
            bound.grpc,
            GrpcServer::builder().add_service(health_service.clone()),
            grpc_listener,
            shutdown.child_token(),
        );

        let mut tls_builder = tls_builder;
        spawn_grpc_server(
            Listener::SecureGrpc,
            bound.secure_grpc,
            tls_builder.add_service(health_service),
            secure_listener,
            shutdown.child_token(),
        );

        tokio::spawn(run_config_sync(
            self.config.config_dir.clone(),
            self.config.refresh_delay(),
            Arc::clone(&self.sync_status),
            Arc::clone(&self.health_state),
            health_reporter,
            shutdown.child_token(),
        ));

        info!(
            http = %bound.http,
            grpc = %bound.grpc,
            secure_grpc = %bound.secure_grpc,
            "Control plane listeners bound"
        );
        self.bound = Some(bound);
        Ok(())
    }

    /// Address actually bound by `listener`, once started.
    #[must_use]
    pub fn listening_addr(&self, listener: Listener) -> Option<SocketAddr> {
        self.bound.map(|bound| match listener {
            Listener::Http => bound.http,
            Listener::Grpc => bound.grpc,
            Listener::SecureGrpc => bound.secure_grpc,
        })
    }

    #[must_use]
    pub fn http_listening_addr(&self) -> Option<SocketAddr> {
        self.listening_addr(Listener::Http)
    }

    #[must_use]
    pub fn grpc_listening_addr(&self) -> Option<SocketAddr> {
        self.listening_addr(Listener::Grpc)
    }

    #[must_use]
    pub fn secure_grpc_listening_addr(&self) -> Option<SocketAddr> {
        self.listening_addr(Listener::SecureGrpc)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    #[must_use]
    pub fn health_state(&self) -> &Arc<HealthState> {
        &self.health_state
    }

    #[must_use]
    pub fn sync_status(&self) -> &Arc<SyncStatus> {
        &self.sync_status
    }
}

async fn load_identity(cert_dir: &Path) -> Result<Identity, ServerError> {
    let cert_path = cert_dir.join(CERT_CHAIN_FILE);
    let key_path = cert_dir.join(KEY_FILE);

    let cert = tokio::fs::read(&cert_path)
        .await
        .map_err(|e| ServerError::Tls(format!("Failed to read {}: {e}", cert_path.display())))?;
    let key = tokio::fs::read(&key_path)
        .await
        .map_err(|e| ServerError::Tls(format!("Failed to read {}: {e}", key_path.display())))?;

    Ok(Identity::from_pem(cert, key))
}

async fn bind_listener(listener: Listener, addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).await.map_err(|source| {
        error!(error = %source, addr = %addr, "Failed to bind {listener} listener");
        ServerError::Bind {
            listener,
            addr: addr.to_string(),
            source,
        }
    })
}

fn local_addr(
    listener: Listener,
    addr: &str,
    socket: &TcpListener,
) -> Result<SocketAddr, ServerError> {
    socket.local_addr().map_err(|source| ServerError::Bind {
        listener,
        addr: addr.to_string(),
        source,
    })
}

fn spawn_grpc_server(
    listener: Listener,
    addr: SocketAddr,
    router: GrpcRouter,
    socket: TcpListener,
    token: CancellationToken,
) {
    let incoming = TcpListenerStream::new(socket);
    tokio::spawn(async move {
        info!(addr = %addr, "{listener} server starting");
        let server = router.serve_with_incoming_shutdown(incoming, async move {
            token.cancelled().await;
            info!("{listener} server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "{listener} server failed");
        }
    });
}

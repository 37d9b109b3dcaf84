//! The control plane as a managed test server.
//!
//! Test defaults: namespace `testing`, the mock service registry, a 10 ms
//! refresh delay, a static config directory with a couple of resources and
//! a freshly generated self-signed identity for the secure gRPC listener.

use crate::errors::HarnessError;
use crate::harness::{ConfigOverride, Harness, ManagedServer, RunningServer};
use crate::settings::ListenAddrs;
use crate::shutdown::Closer;
use control_plane::config::DEFAULT_MAX_MESSAGE_SIZE;
use control_plane::server::{CERT_CHAIN_FILE, KEY_FILE};
use control_plane::{Config, Listener, Server, ServerError};
use std::path::Path;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Namespace the test control plane runs in.
pub const TEST_NAMESPACE: &str = "testing";

/// Refresh delay of the test control plane, in milliseconds.
pub const TEST_REFRESH_DELAY_MS: u64 = 10;

/// Static config files written into the test config directory.
pub const TEST_CONFIG_FILES: [(&str, &str); 2] = [
    (
        "gateway.yaml",
        "kind: Gateway\nmetadata:\n  name: ingress\nspec:\n  servers:\n  - port: 80\n",
    ),
    (
        "virtual-service.yaml",
        "kind: VirtualService\nmetadata:\n  name: hello\nspec:\n  hosts:\n  - hello\n",
    ),
];

impl ManagedServer for Server {
    type Config = Config;
    type Error = ServerError;

    fn test_config(listen: &ListenAddrs, work_dir: &Path) -> Result<Config, ServerError> {
        let cert_dir = work_dir.join("certs");
        write_test_identity(&cert_dir)?;

        let config_dir = work_dir.join("config");
        write_static_config(&config_dir)?;

        Ok(Config {
            namespace: TEST_NAMESPACE.to_string(),
            http_bind_address: listen.http.clone(),
            grpc_bind_address: listen.grpc.clone(),
            secure_grpc_bind_address: listen.secure_grpc.clone(),
            config_dir: Some(config_dir),
            cert_dir,
            registries: vec!["Mock".to_string()],
            refresh_delay_ms: TEST_REFRESH_DELAY_MS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        })
    }

    fn new(config: Config) -> Result<Self, ServerError> {
        Server::new(config)
    }

    async fn start(&mut self, shutdown: CancellationToken) -> Result<(), ServerError> {
        Server::start(self, shutdown).await
    }

    fn listening_addr(&self, listener: Listener) -> Option<String> {
        Server::listening_addr(self, listener).map(|addr| addr.to_string())
    }

    fn config(&self) -> &Config {
        Server::config(self)
    }
}

/// Write a self-signed `localhost` certificate and key into `cert_dir`.
pub fn write_test_identity(cert_dir: &Path) -> Result<(), ServerError> {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| ServerError::Tls(format!("Failed to generate test certificate: {e}")))?;

    std::fs::create_dir_all(cert_dir).map_err(fixture_error)?;
    std::fs::write(cert_dir.join(CERT_CHAIN_FILE), certified.cert.pem()).map_err(fixture_error)?;
    std::fs::write(cert_dir.join(KEY_FILE), certified.key_pair.serialize_pem())
        .map_err(fixture_error)?;
    Ok(())
}

/// Write [`TEST_CONFIG_FILES`] into `config_dir`.
pub fn write_static_config(config_dir: &Path) -> Result<(), ServerError> {
    std::fs::create_dir_all(config_dir).map_err(fixture_error)?;
    for (name, contents) in TEST_CONFIG_FILES {
        std::fs::write(config_dir.join(name), contents).map_err(fixture_error)?;
    }
    Ok(())
}

fn fixture_error(e: std::io::Error) -> ServerError {
    ServerError::Config(format!("Failed to write test fixture: {e}"))
}

static TEST_HARNESS: OnceLock<Harness<Server>> = OnceLock::new();

/// The process-wide control plane harness.
///
/// # Panics
///
/// Panics if `CONTROL_PLANE_HTTP_PORT` is set to something that is not a
/// port number.
pub fn test_harness() -> &'static Harness<Server> {
    TEST_HARNESS.get_or_init(|| match Harness::from_env() {
        Ok(harness) => harness,
        Err(e) => panic!("Invalid control plane harness settings: {e}"),
    })
}

/// Ensure the process-wide control plane is running and return it.
///
/// Overrides only take effect for the call that starts the server; see
/// [`Harness::ensure_running_with`].
///
/// # Panics
///
/// Panics if the control plane cannot be started. A test suite whose shared
/// fixture is broken cannot produce meaningful results.
pub fn ensure_test_server(
    overrides: impl IntoIterator<Item = ConfigOverride<Config>>,
) -> (RunningServer<Server>, Closer) {
    match test_harness().ensure_running_with(overrides) {
        Ok(running) => running,
        Err(e) => {
            error!(error = %e, "Failed to start in-process control plane");
            panic!("Failed to start in-process control plane: {e}");
        }
    }
}

/// Like [`ensure_test_server`], but returns the error instead of panicking.
pub fn try_ensure_test_server(
    overrides: impl IntoIterator<Item = ConfigOverride<Config>>,
) -> Result<(RunningServer<Server>, Closer), HarnessError> {
    test_harness().ensure_running_with(overrides)
}

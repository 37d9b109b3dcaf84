//! Harness error types.

use control_plane::Listener;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while bringing up or tearing down the shared server.
///
/// Any of these returned from the initializing `ensure_running` call is
/// fatal for the test run: the harness never retries.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The server (or the harness itself) rejected the configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The server was constructed but failed to start.
    #[error("Server failed to start: {0}")]
    Start(String),

    /// A bound listener address could not be split into host and port.
    #[error("Invalid {listener} listener address {addr:?}: {reason}")]
    AddressFormat {
        listener: Listener,
        addr: String,
        reason: String,
    },

    /// The readiness probe never returned 200 within the wait budget.
    #[error("Server at {url} not ready after {waited:?}")]
    ReadinessTimeout { url: String, waited: Duration },

    /// Shutdown was signaled, or could not be signaled, unexpectedly.
    #[error("Shutdown signal error: {0}")]
    ShutdownSignal(String),

    /// The dedicated harness runtime could not be created or exited early.
    #[error("Harness runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

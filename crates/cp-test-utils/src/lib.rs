//! # Control Plane Test Utilities
//!
//! A shared, in-process control plane for integration tests.
//!
//! This crate provides:
//! - [`Harness`]: "ensure running" singleton semantics over any [`ManagedServer`]
//! - [`EndpointDescriptor`]: bound-address resolution for ephemeral ports
//! - [`ReadinessPoller`]: bounded `/ready` polling
//! - [`Closer`]: idempotent, cancellation-based shutdown
//! - [`ensure_test_server`]: the process-wide control plane instance
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cp_test_utils::ensure_test_server;
//!
//! #[tokio::test]
//! async fn test_registry_lists_mock_services() -> anyhow::Result<()> {
//!     let (server, _closer) = ensure_test_server([]);
//!
//!     let services: serde_json::Value =
//!         reqwest::get(format!("{}/debug/registryz", server.http_url()))
//!             .await?
//!             .json()
//!             .await?;
//!
//!     assert_eq!(services.as_array().map(Vec::len), Some(2));
//!     Ok(())
//! }
//! ```
//!
//! The first caller starts the server and its configuration overrides win;
//! later callers get the same instance and their overrides are ignored.

pub mod endpoint;
pub mod errors;
pub mod harness;
pub mod readiness;
pub mod settings;
pub mod shutdown;
pub mod test_server;

// Re-export commonly used items
pub use endpoint::{EndpointDescriptor, Endpoints};
pub use errors::HarnessError;
pub use harness::{ConfigOverride, Harness, ManagedServer, RunningServer};
pub use readiness::{Readiness, ReadinessPoller};
pub use settings::{HarnessSettings, ListenAddrs, HTTP_PORT_ENV};
pub use shutdown::{Closer, ShutdownCoordinator};
pub use test_server::{ensure_test_server, test_harness, try_ensure_test_server};

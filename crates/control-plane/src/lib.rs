//! Control Plane Library
//!
//! A small service-mesh control plane that serves three listeners:
//!
//! - HTTP: liveness/readiness probes and `/debug/*` introspection endpoints
//! - gRPC: plain-text discovery endpoint (gRPC health service)
//! - Secure gRPC: the same endpoint behind TLS, identity loaded from `cert_dir`
//!
//! # Lifecycle
//!
//! 1. [`Server::new`] validates the [`Config`]
//! 2. [`Server::start`] binds all listeners and spawns the serving tasks
//! 3. The config sync task scans the static config directory and marks the
//!    control plane ready (`GET /ready` returns 200)
//! 4. Cancelling the `CancellationToken` passed to `start` stops every
//!    accept loop and releases the listeners
//!
//! # Modules
//!
//! - [`config`] - Configuration from environment
//! - [`server`] - Listener ownership and task spawning
//! - [`config_sync`] - Static config directory synchronization
//! - [`registry`] - Service registries
//! - [`routes`] - HTTP router
//! - [`observability`] - Health endpoints

pub mod config;
pub mod config_sync;
pub mod errors;
pub mod observability;
pub mod registry;
pub mod routes;
pub mod server;

pub use config::Config;
pub use errors::ServerError;
pub use server::{Listener, Server};

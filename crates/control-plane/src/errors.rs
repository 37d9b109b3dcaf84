//! Control plane error types.

use crate::server::Listener;
use thiserror::Error;

/// Control plane error type.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The supplied configuration was rejected.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A listener could not be bound.
    #[error("Failed to bind {listener} listener to {addr}: {source}")]
    Bind {
        listener: Listener,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The TLS identity for the secure gRPC listener could not be loaded.
    #[error("TLS error: {0}")]
    Tls(String),

    /// `start` was called on a server that is already running.
    #[error("Server already started")]
    AlreadyStarted,
}

impl From<crate::config::ConfigError> for ServerError {
    fn from(e: crate::config::ConfigError) -> Self {
        ServerError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_names_listener_and_addr() {
        let err = ServerError::Bind {
            listener: Listener::SecureGrpc,
            addr: "127.0.0.1:1".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };

        let message = err.to_string();
        assert!(message.contains("secure gRPC"));
        assert!(message.contains("127.0.0.1:1"));
    }

    #[test]
    fn test_config_error_conversion() {
        let err: ServerError =
            crate::config::ConfigError::InvalidValue("bad".to_string()).into();
        assert!(matches!(err, ServerError::Config(msg) if msg.contains("bad")));
    }
}

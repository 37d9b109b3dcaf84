//! Control plane configuration.
//!
//! Configuration is loaded from environment variables. Every field is
//! plain data, so the whole struct is serialized as-is by the
//! `/debug/configz` endpoint.

use serde::Serialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default namespace the control plane runs in.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default HTTP (health/debug) bind address.
pub const DEFAULT_HTTP_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default plain-text gRPC discovery bind address.
pub const DEFAULT_GRPC_BIND_ADDRESS: &str = "0.0.0.0:15010";

/// Default TLS gRPC discovery bind address.
pub const DEFAULT_SECURE_GRPC_BIND_ADDRESS: &str = "0.0.0.0:15012";

/// Default directory holding `cert-chain.pem` and `key.pem`.
pub const DEFAULT_CERT_DIR: &str = "/etc/certs";

/// Default service registry.
pub const DEFAULT_REGISTRY: &str = "Mock";

/// Default interval between config directory rescans, in milliseconds.
pub const DEFAULT_REFRESH_DELAY_MS: u64 = 1000;

/// Default maximum gRPC message size (4 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Control plane configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    /// Namespace reported by the debug endpoints.
    pub namespace: String,

    /// HTTP server bind address (default: "0.0.0.0:8080").
    pub http_bind_address: String,

    /// Plain-text gRPC bind address (default: "0.0.0.0:15010").
    pub grpc_bind_address: String,

    /// TLS gRPC bind address (default: "0.0.0.0:15012").
    pub secure_grpc_bind_address: String,

    /// Directory of static config files. `None` disables file-based config.
    pub config_dir: Option<PathBuf>,

    /// Directory containing the TLS identity for the secure gRPC listener.
    pub cert_dir: PathBuf,

    /// Service registries to serve, by name (e.g. "Mock").
    pub registries: Vec<String>,

    /// Interval between config directory rescans, in milliseconds.
    pub refresh_delay_ms: u64,

    /// Maximum decoded gRPC message size in bytes.
    pub max_message_size: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let namespace = vars
            .get("CP_NAMESPACE")
            .cloned()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let http_bind_address = vars
            .get("CP_HTTP_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HTTP_BIND_ADDRESS.to_string());

        let grpc_bind_address = vars
            .get("CP_GRPC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_GRPC_BIND_ADDRESS.to_string());

        let secure_grpc_bind_address = vars
            .get("CP_SECURE_GRPC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SECURE_GRPC_BIND_ADDRESS.to_string());

        let config_dir = vars
            .get("CP_CONFIG_DIR")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let cert_dir = vars
            .get("CP_CERT_DIR")
            .map_or_else(|| PathBuf::from(DEFAULT_CERT_DIR), PathBuf::from);

        let registries = vars
            .get("CP_REGISTRIES")
            .map_or(DEFAULT_REGISTRY, String::as_str)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let refresh_delay_ms = parse_or_default(vars, "CP_REFRESH_DELAY_MS", DEFAULT_REFRESH_DELAY_MS)?;
        let max_message_size =
            parse_or_default(vars, "CP_MAX_MESSAGE_SIZE", DEFAULT_MAX_MESSAGE_SIZE)?;

        Ok(Config {
            namespace,
            http_bind_address,
            grpc_bind_address,
            secure_grpc_bind_address,
            config_dir,
            cert_dir,
            registries,
            refresh_delay_ms,
            max_message_size,
        })
    }

    /// Interval between config directory rescans.
    #[must_use]
    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }
}

fn parse_or_default<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw:?} is not a valid number"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load successfully");

        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.http_bind_address, DEFAULT_HTTP_BIND_ADDRESS);
        assert_eq!(config.grpc_bind_address, DEFAULT_GRPC_BIND_ADDRESS);
        assert_eq!(
            config.secure_grpc_bind_address,
            DEFAULT_SECURE_GRPC_BIND_ADDRESS
        );
        assert_eq!(config.config_dir, None);
        assert_eq!(config.cert_dir, PathBuf::from(DEFAULT_CERT_DIR));
        assert_eq!(config.registries, vec!["Mock".to_string()]);
        assert_eq!(config.refresh_delay(), Duration::from_secs(1));
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let vars = HashMap::from([
            ("CP_NAMESPACE".to_string(), "testing".to_string()),
            (
                "CP_HTTP_BIND_ADDRESS".to_string(),
                "127.0.0.1:0".to_string(),
            ),
            (
                "CP_GRPC_BIND_ADDRESS".to_string(),
                "127.0.0.1:15000".to_string(),
            ),
            (
                "CP_SECURE_GRPC_BIND_ADDRESS".to_string(),
                "127.0.0.1:15001".to_string(),
            ),
            ("CP_CONFIG_DIR".to_string(), "/tmp/config".to_string()),
            ("CP_CERT_DIR".to_string(), "/tmp/certs".to_string()),
            ("CP_REGISTRIES".to_string(), "Mock, Kubernetes".to_string()),
            ("CP_REFRESH_DELAY_MS".to_string(), "10".to_string()),
            ("CP_MAX_MESSAGE_SIZE".to_string(), "1024".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.namespace, "testing");
        assert_eq!(config.http_bind_address, "127.0.0.1:0");
        assert_eq!(config.grpc_bind_address, "127.0.0.1:15000");
        assert_eq!(config.secure_grpc_bind_address, "127.0.0.1:15001");
        assert_eq!(config.config_dir, Some(PathBuf::from("/tmp/config")));
        assert_eq!(config.cert_dir, PathBuf::from("/tmp/certs"));
        assert_eq!(
            config.registries,
            vec!["Mock".to_string(), "Kubernetes".to_string()]
        );
        assert_eq!(config.refresh_delay(), Duration::from_millis(10));
        assert_eq!(config.max_message_size, 1024);
    }

    #[test]
    fn test_empty_config_dir_disables_file_config() {
        let vars = HashMap::from([("CP_CONFIG_DIR".to_string(), String::new())]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert_eq!(config.config_dir, None);
    }

    #[test]
    fn test_from_vars_invalid_refresh_delay() {
        let vars = HashMap::from([("CP_REFRESH_DELAY_MS".to_string(), "soon".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("CP_REFRESH_DELAY_MS"))
        );
    }

    #[test]
    fn test_config_serializes_for_debug_endpoint() {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        let json = serde_json::to_value(&config).unwrap();

        assert_eq!(json["namespace"], DEFAULT_NAMESPACE);
        assert_eq!(json["refresh_delay_ms"], DEFAULT_REFRESH_DELAY_MS);
        assert!(json["config_dir"].is_null());
    }
}

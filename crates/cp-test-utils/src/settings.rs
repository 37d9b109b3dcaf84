//! Harness settings.
//!
//! Loaded from environment variables the same way the control plane loads
//! its own configuration. Only the HTTP debug port comes from the
//! environment; the polling parameters are plain fields for tests to tune.

use crate::errors::HarnessError;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Environment variable pinning the HTTP listener to a fixed port.
///
/// Handy when debugging locally (`curl localhost:$PORT/debug/configz`).
/// Absent or empty means an ephemeral port.
pub const HTTP_PORT_ENV: &str = "CONTROL_PLANE_HTTP_PORT";

/// Host every test listener binds to.
pub const DEFAULT_BIND_HOST: &str = "127.0.0.1";

/// Delay between readiness probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Total readiness wait budget.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5);

/// Timeout for a single readiness probe. Must stay below the poll interval.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(400);

/// Readiness probe path on the HTTP listener.
pub const DEFAULT_PROBE_PATH: &str = "/ready";

/// Listen addresses handed to the server's test configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddrs {
    pub http: String,
    pub grpc: String,
    pub secure_grpc: String,
}

/// Harness settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessSettings {
    /// HTTP listener port; 0 requests an ephemeral port.
    pub http_port: u16,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub attempt_timeout: Duration,
    pub probe_path: String,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            http_port: 0,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            probe_path: DEFAULT_PROBE_PATH.to_string(),
        }
    }
}

impl HarnessSettings {
    /// Load settings from environment variables.
    pub fn from_env() -> Result<Self, HarnessError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load settings from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, HarnessError> {
        let http_port = match vars.get(HTTP_PORT_ENV).map(|s| s.trim()) {
            None | Some("") => 0,
            Some(raw) => raw.parse().map_err(|_| {
                HarnessError::Configuration(format!("{HTTP_PORT_ENV}={raw:?} is not a valid port"))
            })?,
        };

        Ok(Self {
            http_port,
            ..Self::default()
        })
    }

    /// Listen addresses for the three listeners: HTTP on `http_port`, both
    /// gRPC listeners on ephemeral ports.
    #[must_use]
    pub fn listen_addrs(&self) -> ListenAddrs {
        ListenAddrs {
            http: format!("{DEFAULT_BIND_HOST}:{}", self.http_port),
            grpc: format!("{DEFAULT_BIND_HOST}:0"),
            secure_grpc: format!("{DEFAULT_BIND_HOST}:0"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_request_ephemeral_ports() {
        let settings = HarnessSettings::from_vars(&HashMap::new()).unwrap();

        assert_eq!(settings, HarnessSettings::default());
        assert_eq!(
            settings.listen_addrs(),
            ListenAddrs {
                http: "127.0.0.1:0".to_string(),
                grpc: "127.0.0.1:0".to_string(),
                secure_grpc: "127.0.0.1:0".to_string(),
            }
        );
    }

    #[test]
    fn test_empty_port_override_is_ephemeral() {
        let vars = HashMap::from([(HTTP_PORT_ENV.to_string(), String::new())]);
        let settings = HarnessSettings::from_vars(&vars).unwrap();
        assert_eq!(settings.http_port, 0);
    }

    #[test]
    fn test_port_override_pins_http_only() {
        let vars = HashMap::from([(HTTP_PORT_ENV.to_string(), "15014".to_string())]);
        let addrs = HarnessSettings::from_vars(&vars).unwrap().listen_addrs();

        assert_eq!(addrs.http, "127.0.0.1:15014");
        assert_eq!(addrs.grpc, "127.0.0.1:0");
        assert_eq!(addrs.secure_grpc, "127.0.0.1:0");
    }

    #[test]
    fn test_invalid_port_override_rejected() {
        let vars = HashMap::from([(HTTP_PORT_ENV.to_string(), "http".to_string())]);
        let result = HarnessSettings::from_vars(&vars);
        assert!(matches!(result, Err(HarnessError::Configuration(msg)) if msg.contains(HTTP_PORT_ENV)));
    }

    #[test]
    fn test_default_attempt_timeout_below_poll_interval() {
        assert!(DEFAULT_ATTEMPT_TIMEOUT < DEFAULT_POLL_INTERVAL);
    }
}

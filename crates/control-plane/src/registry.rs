//! Service registries.
//!
//! Only the in-memory mock registry is available. It serves two fixed
//! services, `hello` and `world`, which is what tests against a running
//! control plane expect to discover.

use crate::errors::ServerError;
use serde::Serialize;
use std::str::FromStr;

/// Registry backends recognized by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegistryKind {
    Mock,
}

impl FromStr for RegistryKind {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Mock" | "mock" => Ok(RegistryKind::Mock),
            other => Err(ServerError::Config(format!(
                "Unsupported service registry: {other}"
            ))),
        }
    }
}

/// A service known to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEntry {
    pub hostname: String,
    pub namespace: String,
    pub port: u16,
    pub registry: RegistryKind,
}

/// Aggregate of all configured registries.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: Vec<ServiceEntry>,
}

impl ServiceRegistry {
    /// Build the registry from configured names.
    ///
    /// Fails if the list is empty or names an unsupported registry.
    pub fn from_names(names: &[String], namespace: &str) -> Result<Self, ServerError> {
        if names.is_empty() {
            return Err(ServerError::Config(
                "At least one service registry must be configured".to_string(),
            ));
        }

        let mut kinds = Vec::with_capacity(names.len());
        for name in names {
            let kind: RegistryKind = name.parse()?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }

        let services = kinds
            .into_iter()
            .flat_map(|kind| match kind {
                RegistryKind::Mock => mock_services(namespace),
            })
            .collect();

        Ok(Self { services })
    }

    /// All services, in registry order.
    #[must_use]
    pub fn services(&self) -> &[ServiceEntry] {
        &self.services
    }
}

fn mock_services(namespace: &str) -> Vec<ServiceEntry> {
    ["hello", "world"]
        .into_iter()
        .map(|name| ServiceEntry {
            hostname: format!("{name}.{namespace}.svc.cluster.local"),
            namespace: namespace.to_string(),
            port: 80,
            registry: RegistryKind::Mock,
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_registry_serves_hello_and_world() {
        let registry = ServiceRegistry::from_names(&["Mock".to_string()], "testing").unwrap();

        let hostnames: Vec<_> = registry
            .services()
            .iter()
            .map(|s| s.hostname.as_str())
            .collect();
        assert_eq!(
            hostnames,
            vec![
                "hello.testing.svc.cluster.local",
                "world.testing.svc.cluster.local"
            ]
        );
    }

    #[test]
    fn test_duplicate_registry_names_collapse() {
        let registry =
            ServiceRegistry::from_names(&["Mock".to_string(), "mock".to_string()], "default")
                .unwrap();
        assert_eq!(registry.services().len(), 2);
    }

    #[test]
    fn test_unknown_registry_rejected() {
        let result = ServiceRegistry::from_names(&["Consul".to_string()], "default");
        assert!(matches!(result, Err(ServerError::Config(msg)) if msg.contains("Consul")));
    }

    #[test]
    fn test_empty_registry_list_rejected() {
        let result = ServiceRegistry::from_names(&[], "default");
        assert!(matches!(result, Err(ServerError::Config(_))));
    }
}

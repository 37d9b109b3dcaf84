//! Endpoint resolution.
//!
//! Turns the address a listener actually bound (which differs from the
//! requested one when port 0 was requested) into something a test client
//! can dial.

use crate::errors::HarnessError;
use control_plane::Listener;
use std::net::IpAddr;

/// Client-usable address of one listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    address: String,
    port: u16,
}

impl EndpointDescriptor {
    /// Resolve the bound address of `listener`.
    ///
    /// Wildcard and loopback hosts become `localhost`; any other host is kept.
    pub fn resolve(listener: Listener, bound: &str) -> Result<Self, HarnessError> {
        let format_error = |reason: &str| HarnessError::AddressFormat {
            listener,
            addr: bound.to_string(),
            reason: reason.to_string(),
        };

        let (host, port) = split_host_port(bound).map_err(format_error)?;
        let port: u16 = port
            .parse()
            .map_err(|_| format_error("invalid port"))?;
        if port == 0 {
            return Err(format_error("port 0 is not a bound port"));
        }

        Ok(Self {
            address: format!("{}:{port}", client_host(host)),
            port,
        })
    }

    /// `host:port` form, for gRPC clients.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `http://host:port` form.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.address)
    }
}

/// The three published endpoints of a running server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub http: EndpointDescriptor,
    pub grpc: EndpointDescriptor,
    pub secure_grpc: EndpointDescriptor,
}

impl Endpoints {
    /// Resolve all three listeners, failing on the first bad address.
    pub fn resolve(
        mut bound: impl FnMut(Listener) -> Option<String>,
    ) -> Result<Self, HarnessError> {
        let mut resolve_one = |listener: Listener| match bound(listener) {
            Some(addr) => EndpointDescriptor::resolve(listener, &addr),
            None => Err(HarnessError::AddressFormat {
                listener,
                addr: String::new(),
                reason: "listener is not bound".to_string(),
            }),
        };

        Ok(Self {
            http: resolve_one(Listener::Http)?,
            grpc: resolve_one(Listener::Grpc)?,
            secure_grpc: resolve_one(Listener::SecureGrpc)?,
        })
    }

    /// Endpoint of `listener`.
    #[must_use]
    pub fn get(&self, listener: Listener) -> &EndpointDescriptor {
        match listener {
            Listener::Http => &self.http,
            Listener::Grpc => &self.grpc,
            Listener::SecureGrpc => &self.secure_grpc,
        }
    }
}

fn split_host_port(addr: &str) -> Result<(&str, &str), &'static str> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or("missing ']' in address")?;
        let port = after.strip_prefix(':').ok_or("missing port in address")?;
        return Ok((host, port));
    }

    let (host, port) = addr.rsplit_once(':').ok_or("missing port in address")?;
    if host.contains(':') {
        return Err("too many colons in address");
    }
    if port.is_empty() {
        return Err("missing port in address");
    }
    Ok((host, port))
}

fn client_host(host: &str) -> String {
    if host.is_empty() || host == "localhost" {
        return "localhost".to_string();
    }
    match host.parse::<IpAddr>() {
        Ok(ip) if ip.is_unspecified() || ip.is_loopback() => "localhost".to_string(),
        Ok(IpAddr::V6(ip)) => format!("[{ip}]"),
        _ => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(bound: &str) -> Result<EndpointDescriptor, HarnessError> {
        EndpointDescriptor::resolve(Listener::Http, bound)
    }

    #[test]
    fn test_loopback_and_wildcard_become_localhost() {
        for bound in ["127.0.0.1:15010", "0.0.0.0:15010", "[::1]:15010", "[::]:15010", ":15010"] {
            let endpoint = resolve(bound).unwrap();
            assert_eq!(endpoint.address(), "localhost:15010", "bound = {bound}");
            assert_eq!(endpoint.port(), 15010);
        }
    }

    #[test]
    fn test_explicit_host_is_kept() {
        let endpoint = resolve("10.1.2.3:8080").unwrap();
        assert_eq!(endpoint.address(), "10.1.2.3:8080");
        assert_eq!(endpoint.url(), "http://10.1.2.3:8080");

        let endpoint = resolve("[fd00::1]:8080").unwrap();
        assert_eq!(endpoint.address(), "[fd00::1]:8080");
    }

    #[test]
    fn test_url_uses_http_scheme() {
        assert_eq!(resolve("127.0.0.1:40000").unwrap().url(), "http://localhost:40000");
    }

    #[test]
    fn test_malformed_addresses_rejected() {
        for (bound, reason) in [
            ("localhost", "missing port"),
            ("127.0.0.1:", "missing port"),
            ("::1:80", "too many colons"),
            ("[::1", "missing ']'"),
            ("[::1]", "missing port"),
            ("127.0.0.1:http", "invalid port"),
            ("127.0.0.1:70000", "invalid port"),
            ("127.0.0.1:0", "port 0"),
        ] {
            match resolve(bound) {
                Err(HarnessError::AddressFormat { addr, reason: got, .. }) => {
                    assert_eq!(addr, bound);
                    assert!(got.contains(reason), "{bound}: {got}");
                }
                other => panic!("expected AddressFormat for {bound}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_endpoints_resolve_all_listeners() {
        let endpoints = Endpoints::resolve(|listener| {
            Some(match listener {
                Listener::Http => "127.0.0.1:1001".to_string(),
                Listener::Grpc => "127.0.0.1:1002".to_string(),
                Listener::SecureGrpc => "127.0.0.1:1003".to_string(),
            })
        })
        .unwrap();

        assert_eq!(endpoints.get(Listener::Http).port(), 1001);
        assert_eq!(endpoints.grpc.address(), "localhost:1002");
        assert_eq!(endpoints.secure_grpc.address(), "localhost:1003");
    }

    #[test]
    fn test_endpoints_unbound_listener_fails() {
        let result = Endpoints::resolve(|listener| {
            (listener != Listener::SecureGrpc).then(|| "127.0.0.1:1000".to_string())
        });
        assert!(matches!(
            result,
            Err(HarnessError::AddressFormat {
                listener: Listener::SecureGrpc,
                ..
            })
        ));
    }
}

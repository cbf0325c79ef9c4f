//! # Endpoint Definitions
//!
//! Network addresses of store nodes and the two ways a client names its
//! target: a fixed node, or a master resolved through sentinel monitors.
//!
//! ## Design Principles
//! 1. **Immutable Values**: Endpoints never change after construction; a
//!    failover produces a new `Endpoint` rather than mutating one in place.
//! 2. **String Round-Trip**: `"host:port"` parses and displays identically so
//!    configuration files and sentinel replies share one format.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Default port of the backing store.
pub const DEFAULT_PORT: u16 = 6379;

/// Address of one backing-store node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint from a host name (or IP literal) and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Builds an endpoint from the `(host, port)` strings found in sentinel
    /// replies and `+switch-master` notifications.
    pub fn from_parts(host: &str, port: &str) -> Result<Self, ClientError> {
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| ClientError::InvalidAddress(format!("{}:{}", host, port)))?;
        let host = host.trim();
        if host.is_empty() {
            return Err(ClientError::InvalidAddress(format!(":{}", port)));
        }
        Ok(Endpoint::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // IPv6 literals need brackets to keep the port separator unambiguous.
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = ClientError;

    /// Parses `host:port`, `[v6]:port`, or a bare `host` (default port).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| ClientError::InvalidAddress(s.to_string()))?;
            return match tail.strip_prefix(':') {
                Some(port) => Endpoint::from_parts(host, port),
                None if tail.is_empty() => Endpoint::from_parts(host, &DEFAULT_PORT.to_string()),
                None => Err(ClientError::InvalidAddress(s.to_string())),
            };
        }

        match s.rsplit_once(':') {
            Some((host, _)) if host.contains(':') => {
                Err(ClientError::InvalidAddress(s.to_string()))
            }
            Some((host, port)) => Endpoint::from_parts(host, port),
            None if s.is_empty() => Err(ClientError::InvalidAddress(s.to_string())),
            None => Ok(Endpoint::new(s, DEFAULT_PORT)),
        }
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

/// Where a client finds its master node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// One fixed node.
    Direct(Endpoint),
    /// A named master tracked by a set of sentinel monitors.
    Sentinel {
        master_name: String,
        sentinels: Vec<Endpoint>,
    },
}

impl Target {
    /// Short label for logs and errors.
    pub fn describe(&self) -> String {
        match self {
            Target::Direct(endpoint) => endpoint.to_string(),
            Target::Sentinel { master_name, .. } => format!("sentinel master '{}'", master_name),
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Target::Direct(Endpoint::new("127.0.0.1", DEFAULT_PORT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let endpoint: Endpoint = "10.0.0.5:7000".parse().unwrap();
        assert_eq!(endpoint.host(), "10.0.0.5");
        assert_eq!(endpoint.port(), 7000);
        assert_eq!(endpoint.to_string(), "10.0.0.5:7000");
    }

    #[test]
    fn bare_host_uses_default_port() {
        let endpoint: Endpoint = "redis.local".parse().unwrap();
        assert_eq!(endpoint, Endpoint::new("redis.local", DEFAULT_PORT));
    }

    #[test]
    fn ipv6_literal_keeps_brackets_in_display() {
        let endpoint: Endpoint = "[::1]:6380".parse().unwrap();
        assert_eq!(endpoint.host(), "::1");
        assert_eq!(endpoint.to_string(), "[::1]:6380");
    }

    #[test]
    fn rejects_bad_port() {
        assert!(matches!(
            "host:notaport".parse::<Endpoint>(),
            Err(ClientError::InvalidAddress(_))
        ));
        assert!("host:70000".parse::<Endpoint>().is_err());
        assert!("".parse::<Endpoint>().is_err());
    }

    #[test]
    fn target_deserializes_from_json() {
        let direct: Target = serde_json::from_str(r#"{"direct":"127.0.0.1:6379"}"#).unwrap();
        assert_eq!(direct, Target::Direct(Endpoint::new("127.0.0.1", 6379)));

        let sentinel: Target = serde_json::from_str(
            r#"{"sentinel":{"master_name":"mymaster","sentinels":["s1:26379","s2:26379"]}}"#,
        )
        .unwrap();
        match sentinel {
            Target::Sentinel {
                master_name,
                sentinels,
            } => {
                assert_eq!(master_name, "mymaster");
                assert_eq!(sentinels.len(), 2);
                assert_eq!(sentinels[1], Endpoint::new("s2", 26379));
            }
            other => panic!("unexpected target {:?}", other),
        }
    }
}

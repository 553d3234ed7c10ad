//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.
//! Route and user keys keep the capitalised names used by existing
//! deployments (`Routes`, `AllUsers`, `PermittedUsers`, `PermittedMethods`)
//! and accept snake_case aliases.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Audit log settings.
    pub audit: AuditConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Route definitions in declaration order.
    #[serde(rename = "Routes", alias = "routes")]
    pub routes: RouteMap,

    /// Every identity the proxy recognises.
    #[serde(rename = "AllUsers", alias = "all_users")]
    pub all_users: Vec<String>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3128").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// How long shutdown waits for open connections and tunnels.
    pub drain_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3128".to_string(),
            max_connections: 10_000,
            drain_timeout_secs: 10,
        }
    }
}

impl ListenerConfig {
    /// Replace the port of `bind_address`, keeping the host part.
    pub fn set_port(&mut self, port: u16) {
        let host = match self.bind_address.rsplit_once(':') {
            Some((host, _)) => host.to_string(),
            None => self.bind_address.clone(),
        };
        self.bind_address = format!("{}:{}", host, port);
    }
}

/// Audit log configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Write JSON-lines audit files.
    pub enabled: bool,

    /// Directory holding `attempts.log` and `errors.log`.
    pub log_dir: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: "logs".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// A single route as written in the config file.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RouteConfig {
    /// Path prefix the route serves. A missing or empty path disables
    /// path matching for the route.
    pub path: Option<String>,

    /// Upstream origin, e.g. `https://api.internal:8443/base`.
    pub upstream: Option<String>,

    /// Users allowed on this route.
    #[serde(rename = "PermittedUsers", alias = "permitted_users")]
    pub permitted_users: Vec<String>,

    /// Methods allowed on this route (case-insensitive).
    #[serde(rename = "PermittedMethods", alias = "permitted_methods")]
    pub permitted_methods: Vec<String>,
}

/// Route definitions keyed by name, in document order.
///
/// Order matters: it breaks ties between equally long path matches and
/// between routes sharing an upstream host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteMap(Vec<(String, RouteConfig)>);

impl RouteMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a route, replacing an existing one of the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, route: RouteConfig) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = route,
            None => self.0.push((name, route)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RouteConfig)> {
        self.0.iter().map(|(n, r)| (n.as_str(), r))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut RouteConfig)> {
        self.0.iter_mut().map(|(n, r)| (n.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<String>> FromIterator<(N, RouteConfig)> for RouteMap {
    fn from_iter<I: IntoIterator<Item = (N, RouteConfig)>>(iter: I) -> Self {
        let mut map = RouteMap::new();
        for (name, route) in iter {
            map.insert(name, route);
        }
        map
    }
}

impl Serialize for RouteMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, route) in &self.0 {
            map.serialize_entry(name, route)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RouteMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RouteMapVisitor;

        impl<'de> Visitor<'de> for RouteMapVisitor {
            type Value = RouteMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of route name to route definition")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut routes = RouteMap::new();
                while let Some((name, route)) = access.next_entry::<String, RouteConfig>()? {
                    routes.insert(name, route);
                }
                Ok(routes)
            }
        }

        deserializer.deserialize_map(RouteMapVisitor)
    }
}

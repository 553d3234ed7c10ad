//! Compiled route table and user registry.
//!
//! # Responsibilities
//! - Normalise each configured route once (leading `/`, trailing-`/` prefix)
//! - Keep routes in configuration order
//! - Hold the global set of known identities
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Routes without a path are kept: they still take part in CONNECT host
//!   lookup, only path matching skips them
//! - Upstreams are kept as written and parsed when used, so a bad upstream
//!   fails the request that needs it rather than startup

use std::collections::HashSet;

use url::Url;

use crate::config::ProxyConfig;

/// A compiled route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    /// Normalised path, always starting with `/`. `None` when the
    /// configured path was missing or empty.
    pub path: Option<String>,
    /// `path` with exactly one trailing `/`.
    pub prefix: Option<String>,
    pub upstream: Option<String>,
    pub permitted_users: HashSet<String>,
    /// Uppercased.
    pub permitted_methods: HashSet<String>,
}

impl Route {
    /// Compile a route from its configured values.
    pub fn new(
        name: impl Into<String>,
        path: Option<&str>,
        upstream: Option<&str>,
        permitted_users: impl IntoIterator<Item = impl Into<String>>,
        permitted_methods: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Self {
        let path = path.filter(|p| !p.is_empty()).map(normalize_path);
        let prefix = path.as_deref().map(prefix_for);

        Self {
            name: name.into(),
            path,
            prefix,
            upstream: upstream.filter(|u| !u.is_empty()).map(str::to_string),
            permitted_users: permitted_users.into_iter().map(Into::into).collect(),
            permitted_methods: permitted_methods
                .into_iter()
                .map(|m| m.as_ref().to_ascii_uppercase())
                .collect(),
        }
    }

    pub fn permits_user(&self, user: &str) -> bool {
        self.permitted_users.contains(user)
    }

    /// `method` is compared case-insensitively.
    pub fn permits_method(&self, method: &str) -> bool {
        self.permitted_methods.contains(&method.to_ascii_uppercase())
    }

    /// Hostname of the upstream, if it parses as a URL with a host.
    pub fn upstream_host(&self) -> Option<String> {
        let upstream = self.upstream.as_deref()?;
        Url::parse(upstream).ok()?.host_str().map(str::to_string)
    }
}

/// Prepend `/` when missing.
pub fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// The path itself when it already ends in `/`, else path + `/`.
pub fn prefix_for(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// Ordered, immutable collection of routes.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Build from routes already in priority (declaration) order.
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// Compile the route section of the configuration.
    pub fn from_config(config: &ProxyConfig) -> Self {
        let routes = config
            .routes
            .iter()
            .map(|(name, r)| {
                Route::new(
                    name,
                    r.path.as_deref(),
                    r.upstream.as_deref(),
                    r.permitted_users.iter().cloned(),
                    r.permitted_methods.iter(),
                )
            })
            .collect();
        Self { routes }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Set of identities the proxy accepts at all.
#[derive(Debug, Clone, Default)]
pub struct UserRegistry {
    users: HashSet<String>,
}

impl UserRegistry {
    pub fn new(users: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            users: users.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.all_users.iter().cloned())
    }

    pub fn contains(&self, user: &str) -> bool {
        self.users.contains(user)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

//! Configuration validation.
//!
//! # Responsibilities
//! - Flag routes without a path (excluded from path matching)
//! - Flag routes without an upstream (fail at forward time)
//! - Flag permitted users that are not in `AllUsers`
//!
//! # Design Decisions
//! - Returns all findings, not just the first
//! - Findings are warnings: a partially broken route table still serves
//!   the routes that are valid

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::ProxyConfig;
use crate::observability::audit::AuditEvent;

/// A non-fatal problem found in the route configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    MissingPath { route: String },
    MissingUpstream { route: String },
    UnknownUsers { route: String, missing: Vec<String> },
}

impl ConfigWarning {
    /// Stable code written to the audit log.
    pub fn code(&self) -> &'static str {
        match self {
            ConfigWarning::MissingPath { .. } => "route_missing_path",
            ConfigWarning::MissingUpstream { .. } => "route_missing_upstream",
            ConfigWarning::UnknownUsers { .. } => "route_users_not_in_allusers",
        }
    }

    pub fn route(&self) -> &str {
        match self {
            ConfigWarning::MissingPath { route }
            | ConfigWarning::MissingUpstream { route }
            | ConfigWarning::UnknownUsers { route, .. } => route,
        }
    }

    pub fn to_event(&self) -> AuditEvent {
        let event = AuditEvent::warning(self.code()).route(self.route());
        match self {
            ConfigWarning::UnknownUsers { missing, .. } => event.missing(missing.clone()),
            _ => event,
        }
    }
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::MissingPath { route } => write!(f, "route {} missing \"path\"", route),
            ConfigWarning::MissingUpstream { route } => {
                write!(f, "route {} missing \"upstream\"", route)
            }
            ConfigWarning::UnknownUsers { route, missing } => write!(
                f,
                "route {} permits users not in AllUsers: {}",
                route,
                missing.join(", ")
            ),
        }
    }
}

/// Check the route table configuration and collect warnings.
///
/// A route with no path is reported once and skipped for the remaining
/// checks.
pub fn validate_config(config: &ProxyConfig) -> Vec<ConfigWarning> {
    let all_users: HashSet<&str> = config.all_users.iter().map(String::as_str).collect();
    let mut warnings = Vec::new();

    for (name, route) in config.routes.iter() {
        if route.path.as_deref().map_or(true, str::is_empty) {
            warnings.push(ConfigWarning::MissingPath { route: name.to_string() });
            continue;
        }
        if route.upstream.as_deref().map_or(true, str::is_empty) {
            warnings.push(ConfigWarning::MissingUpstream { route: name.to_string() });
        }
        let missing: Vec<String> = route
            .permitted_users
            .iter()
            .filter(|u| !all_users.contains(u.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            warnings.push(ConfigWarning::UnknownUsers {
                route: name.to_string(),
                missing,
            });
        }
    }

    warnings
}

//! Per-route access decisions.
//!
//! Checks run in a fixed order and the first failure decides:
//! route matched → identity present → identity known → user permitted on
//! the route → method permitted on the route.

use std::fmt;

use axum::http::StatusCode;

use crate::routing::{Route, UserRegistry};

/// Whether the decision is for a forwarded request or a CONNECT tunnel.
///
/// Only the reason codes written to the audit log differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessScope {
    Request,
    Connect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NoRoute,
    MissingUser,
    UnknownUser,
    UserNotPermitted,
    MethodNotAllowed,
}

/// A negative access decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Denial {
    pub reason: DenyReason,
    pub scope: AccessScope,
}

impl Denial {
    pub fn new(reason: DenyReason, scope: AccessScope) -> Self {
        Self { reason, scope }
    }

    /// Reason code written to the audit log.
    pub fn code(&self) -> &'static str {
        use AccessScope::*;
        use DenyReason::*;

        match (self.reason, self.scope) {
            (NoRoute, Request) => "no_route",
            (NoRoute, Connect) => "no_route_for_connect",
            (MissingUser, _) => "missing_user",
            (UnknownUser, _) => "unknown_user",
            (UserNotPermitted, Request) => "user_not_permitted_for_route",
            (UserNotPermitted, Connect) => "user_not_permitted_for_connect",
            (MethodNotAllowed, Request) => "method_not_allowed",
            (MethodNotAllowed, Connect) => "connect_not_allowed",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.reason {
            DenyReason::NoRoute | DenyReason::UserNotPermitted => StatusCode::FORBIDDEN,
            DenyReason::MissingUser | DenyReason::UnknownUser => StatusCode::UNAUTHORIZED,
            DenyReason::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    /// Plain-text body for HTTP denials.
    pub fn message(&self) -> &'static str {
        match self.reason {
            DenyReason::NoRoute => "Forbidden: no matching route for path",
            DenyReason::MissingUser | DenyReason::UnknownUser => {
                "Unauthorized: missing or unknown user"
            }
            DenyReason::UserNotPermitted => "Forbidden: user not permitted for this route",
            DenyReason::MethodNotAllowed => "Method Not Allowed for this route",
        }
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl std::error::Error for Denial {}

/// Decide whether `user` may call `method` on `route`.
///
/// Returns the route on success so callers can go straight to forwarding.
pub fn authorize<'r>(
    route: Option<&'r Route>,
    user: Option<&str>,
    method: &str,
    users: &UserRegistry,
    scope: AccessScope,
) -> Result<&'r Route, Denial> {
    let deny = |reason| Denial::new(reason, scope);

    let route = route.ok_or_else(|| deny(DenyReason::NoRoute))?;
    let user = user.ok_or_else(|| deny(DenyReason::MissingUser))?;
    if !users.contains(user) {
        return Err(deny(DenyReason::UnknownUser));
    }
    if !route.permits_user(user) {
        return Err(deny(DenyReason::UserNotPermitted));
    }
    if !route.permits_method(method) {
        return Err(deny(DenyReason::MethodNotAllowed));
    }
    Ok(route)
}

//! Per-request context.
//!
//! # Responsibilities
//! - Generate a request ID for correlation between logs and audit records
//! - Extract routing-relevant information (pathname, query, identity)
//! - Build audit events carrying the request's fields
//!
//! # Design Decisions
//! - One context per request or CONNECT, owned by the handling task
//! - The pathname is taken verbatim from the request target (no
//!   percent-decoding), so matching sees what the client sent

use std::net::SocketAddr;

use axum::http::{Method, Uri};
use axum::http::request::Parts;
use uuid::Uuid;

use crate::observability::audit::AuditEvent;
use crate::security::{identity, Denial};

/// Everything the pipeline knows about one inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub id: Uuid,
    pub client: SocketAddr,
    pub user: Option<String>,
    pub method: Method,
    pub pathname: String,
    pub query: Option<String>,
    /// Request target as received, used in audit records.
    pub target: String,
    /// Name of the matched route, once resolved.
    pub route: Option<String>,
}

impl RequestContext {
    pub fn new(parts: &Parts, client: SocketAddr) -> Self {
        let (pathname, query) = split_target(&parts.uri);
        Self {
            id: Uuid::new_v4(),
            client,
            user: identity::resolve(&parts.headers),
            method: parts.method.clone(),
            pathname,
            query,
            target: parts.uri.to_string(),
            route: None,
        }
    }

    /// Audit record for a denied request.
    pub fn denied(&self, denial: &Denial) -> AuditEvent {
        self.annotate(AuditEvent::denied(denial.code()))
    }

    /// Attach request fields to an event.
    pub fn annotate(&self, event: AuditEvent) -> AuditEvent {
        event
            .request_id(self.id)
            .client(self.client)
            .method(self.method.as_str())
            .url(self.target.as_str())
            .maybe_route(self.route.as_deref())
            .user(self.user.as_deref())
    }
}

/// Pathname and raw query of a request target.
///
/// Works for origin-form (`/a?b`) and absolute-form
/// (`http://host/a?b`) targets. An empty path becomes `/`.
pub fn split_target(uri: &Uri) -> (String, Option<String>) {
    let path = match uri.path() {
        "" => "/",
        p => p,
    };
    (path.to_string(), uri.query().map(str::to_string))
}

//! Error taxonomy for the proxy.
//!
//! Every terminal outcome of the dispatch pipeline maps to one variant, and
//! every variant maps to exactly one client-visible status code.

use axum::http::StatusCode;
use thiserror::Error;

use crate::security::authorize::Denial;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// No route matched the request path or CONNECT target.
    #[error("no matching route: {0}")]
    Routing(Denial),

    /// Identity missing or not a registered user.
    #[error("unauthenticated: {0}")]
    Authentication(Denial),

    /// User or method not permitted for the matched route.
    #[error("not permitted: {0}")]
    Authorization(Denial),

    /// The route's upstream could not be turned into a destination.
    #[error("cannot prepare upstream request: {0}")]
    UpstreamPreparation(String),

    /// Connecting to or talking with the upstream failed.
    #[error("upstream transport failure: {0}")]
    UpstreamTransport(String),

    /// The client sent something that is not a valid request.
    #[error("malformed client request: {0}")]
    ClientProtocol(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Status code sent to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Routing(d) | ProxyError::Authentication(d) | ProxyError::Authorization(d) => {
                d.status()
            }
            ProxyError::UpstreamPreparation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
            ProxyError::ClientProtocol(_) => StatusCode::BAD_REQUEST,
            ProxyError::Config(_) | ProxyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Denial> for ProxyError {
    fn from(denial: Denial) -> Self {
        use crate::security::authorize::DenyReason;

        match denial.reason {
            DenyReason::NoRoute => ProxyError::Routing(denial),
            DenyReason::MissingUser | DenyReason::UnknownUser => ProxyError::Authentication(denial),
            DenyReason::UserNotPermitted | DenyReason::MethodNotAllowed => {
                ProxyError::Authorization(denial)
            }
        }
    }
}

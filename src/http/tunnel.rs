//! CONNECT tunnelling.
//!
//! # Responsibilities
//! - Parse the CONNECT target (`host:port`, port defaulting to 443)
//! - Resolve the route by upstream hostname and authorize the caller
//! - Dial the target and splice client and target sockets
//!
//! # Data Flow
//! ```text
//! Client ──CONNECT host:port──▶ Proxy ──TCP──▶ Target
//! Client ◀── 200 Connection Established
//! Client ◀═════════ opaque bytes (e.g. TLS) ═════════▶ Target
//! ```
//!
//! # Design Decisions
//! - The target is dialled before answering, so the client only sees 200
//!   once the tunnel can actually carry bytes
//! - Denials and dial failures answer with a bare status line and close
//! - Bytes the client pipelined after the CONNECT head are replayed by
//!   hyper's upgrade, so nothing is lost
//! - No idle timeout: a tunnel lives until either side closes or errors
//! - The tunnel ends as soon as one direction finishes, and both sockets
//!   are dropped together, so a departed client never pins the upstream

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue, CONNECTION};
use axum::http::{Method, Request, Response, StatusCode};
use hyper::ext::ReasonPhrase;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::error::ProxyError;
use crate::http::server::ProxyState;
use crate::observability::{metrics, AuditEvent};
use crate::security::{authorize, identity, AccessScope};

const DEFAULT_CONNECT_PORT: u16 = 443;
const PROXY_AGENT: &str = "path-proxy";

/// Parsed CONNECT request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Host as written; IPv6 literals keep their brackets so they compare
    /// equal to URL hostnames.
    pub host: String,
    pub port: u16,
}

impl ConnectTarget {
    /// Parse `host[:port]`. A missing or unparsable port becomes 443.
    pub fn parse(target: &str) -> Option<Self> {
        let target = target.trim();
        let (host, port) = if let Some(rest) = target.strip_prefix('[') {
            let end = rest.find(']')?;
            let host = &target[..end + 2];
            let port = rest[end + 1..].strip_prefix(':');
            (host, port)
        } else {
            match target.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (target, None),
            }
        };

        if host.is_empty() || host == "[]" {
            return None;
        }
        let port = port
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(DEFAULT_CONNECT_PORT);

        Some(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Host in the form the resolver expects (no IPv6 brackets).
    pub fn dial_host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Handle a CONNECT request end to end.
///
/// The returned response is written by hyper; on 200 the connection is
/// then handed to a relay task through the HTTP upgrade.
pub async fn handle_connect(state: Arc<ProxyState>, client: SocketAddr, mut request: Request<Body>) -> Response<Body> {
    let request_id = Uuid::new_v4();
    let raw_target = request
        .uri()
        .authority()
        .map(|a| a.as_str().to_string())
        .unwrap_or_else(|| request.uri().to_string());
    let user = identity::resolve(request.headers());

    let event = |e: AuditEvent| {
        e.request_id(request_id)
            .client(client)
            .connect_host(raw_target.as_str())
            .user(user.as_deref())
    };

    let Some(target) = ConnectTarget::parse(&raw_target) else {
        let err = ProxyError::ClientProtocol("malformed CONNECT target".into());
        tracing::warn!(request_id = %request_id, target = %raw_target, error = %err, "Malformed CONNECT target");
        state.audit.record(event(AuditEvent::error("client_error")).cause(&err));
        return status_line(err.status());
    };

    let route = state.routes.match_host(&target.host);
    let route = match authorize(
        route,
        user.as_deref(),
        Method::CONNECT.as_str(),
        &state.users,
        AccessScope::Connect,
    ) {
        Ok(route) => route,
        Err(denial) => {
            tracing::debug!(
                request_id = %request_id,
                target = %target,
                reason = denial.code(),
                "CONNECT denied"
            );
            state
                .audit
                .record(event(AuditEvent::denied(denial.code())).maybe_route(route.map(|r| r.name.as_str())));
            metrics::record_denial(denial.code());
            metrics::record_tunnel("denied");
            return status_line(ProxyError::from(denial).status());
        }
    };

    let upstream = match TcpStream::connect((target.dial_host(), target.port)).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(request_id = %request_id, target = %target, error = %e, "CONNECT upstream unreachable");
            state
                .audit
                .record(event(AuditEvent::error("connect_upstream_error")).route(route.name.as_str()).cause(&e));
            metrics::record_tunnel("connect_failed");
            return status_line(ProxyError::UpstreamTransport(e.to_string()).status());
        }
    };

    let on_upgrade = hyper::upgrade::on(&mut request);
    let route_name = route.name.clone();
    // The client connection task ends at the upgrade; the tunnel keeps its
    // own slot so shutdown still waits for it.
    let guard = state.connections.track();
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                metrics::record_tunnel("established");
                relay(TokioIo::new(upgraded), upstream, request_id, &target, &route_name).await;
            }
            Err(e) => {
                tracing::warn!(request_id = %request_id, target = %target, error = %e, "CONNECT upgrade failed");
                metrics::record_tunnel("upgrade_failed");
            }
        }
        drop(guard);
    });

    let mut response = Response::new(Body::empty());
    response
        .extensions_mut()
        .insert(ReasonPhrase::from_static(b"Connection Established"));
    response.headers_mut().insert(
        HeaderName::from_static("proxy-agent"),
        HeaderValue::from_static(PROXY_AGENT),
    );
    response
}

/// Splice two streams until either direction finishes or fails.
///
/// Whichever copy ends first (EOF or error) ends the tunnel: the other
/// copy is cancelled and both sockets are dropped, closing them fully.
async fn relay<C>(client: C, mut upstream: TcpStream, request_id: Uuid, target: &ConnectTarget, route: &str)
where
    C: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    tracing::debug!(request_id = %request_id, target = %target, route, "Tunnel established");
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = upstream.split();

    let (direction, result) = tokio::select! {
        r = tokio::io::copy(&mut client_read, &mut upstream_write) => ("to_upstream", r),
        r = tokio::io::copy(&mut upstream_read, &mut client_write) => ("to_client", r),
    };
    match result {
        Ok(bytes) => {
            tracing::debug!(request_id = %request_id, target = %target, direction, bytes, "Tunnel closed");
        }
        Err(e) => {
            tracing::debug!(request_id = %request_id, target = %target, direction, error = %e, "Tunnel aborted");
        }
    }
    metrics::record_tunnel("closed");
}

/// Status-only reply that also closes the client connection.
fn status_line(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

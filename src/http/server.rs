//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Accept client connections and serve HTTP/1.1 on them
//! - Hand CONNECT requests to the tunnel before any routing
//! - Route every other request through the Axum router
//! - Resolve the route, authorize, then forward or deny
//! - Drain open connections on shutdown
//!
//! # Data Flow
//! ```text
//! TcpListener → Listener (limit) → hyper http1 connection
//!     ├─ CONNECT → tunnel::handle_connect
//!     └─ other   → Router (TraceLayer) → proxy_handler
//!                     → match_path → authorize → forward | deny
//! ```
//!
//! # Design Decisions
//! - Connections are served with hyper directly so CONNECT can upgrade the
//!   raw socket; Axum never sees authority-form targets
//! - Header case is preserved on both hops
//! - Routes and users are read-only after startup and shared via `Arc`

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Method, Request, Response};
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use crate::config::{validate_config, ProxyConfig};
use crate::error::{ProxyError, Result};
use crate::http::forward::{self, text_response};
use crate::http::request::RequestContext;
use crate::http::tunnel;
use crate::net::{ConnectionId, ConnectionTracker, Listener};
use crate::observability::{metrics, AuditEvent, AuditSink};
use crate::routing::{RouteTable, UserRegistry};
use crate::security::{authorize, AccessScope};

/// Outbound client used for every forwarded request.
pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// State shared by every connection and request.
pub struct ProxyState {
    pub routes: RouteTable,
    pub users: UserRegistry,
    pub client: UpstreamClient,
    pub audit: Arc<dyn AuditSink>,
    pub connections: ConnectionTracker,
}

impl ProxyState {
    /// Compile routes and users, report configuration warnings, and build
    /// the upstream client.
    pub fn new(config: &ProxyConfig, audit: Arc<dyn AuditSink>) -> Result<Self> {
        for warning in validate_config(config) {
            tracing::warn!(code = warning.code(), route = warning.route(), "{}", warning);
            audit.record(warning.to_event());
        }

        let routes = RouteTable::from_config(config);
        let users = UserRegistry::from_config(config);
        tracing::info!(routes = routes.len(), users = users.len(), "Route table loaded");

        Ok(Self {
            routes,
            users,
            client: upstream_client()?,
            audit,
            connections: ConnectionTracker::new(),
        })
    }
}

fn upstream_client() -> Result<UpstreamClient> {
    let connector = HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
        .map_err(|e| ProxyError::Config(format!("TLS client setup failed: {}", e)))?
        .https_or_http()
        .enable_http1()
        .build();

    Ok(Client::builder(TokioExecutor::new())
        .http1_preserve_header_case(true)
        .build(connector))
}

/// The proxy server: shared state plus the router for non-CONNECT traffic.
pub struct ProxyServer {
    state: Arc<ProxyState>,
    router: Router,
    max_connections: usize,
    drain_timeout: Duration,
}

impl ProxyServer {
    pub fn new(config: &ProxyConfig, audit: Arc<dyn AuditSink>) -> Result<Self> {
        let state = Arc::new(ProxyState::new(config, audit)?);
        let router = Self::build_router(state.clone());
        Ok(Self {
            state,
            router,
            max_connections: config.listener.max_connections,
            drain_timeout: Duration::from_secs(config.listener.drain_timeout_secs),
        })
    }

    fn build_router(state: Arc<ProxyState>) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    pub fn state(&self) -> Arc<ProxyState> {
        self.state.clone()
    }

    /// Serve connections until `shutdown` fires, then drain.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let addr = listener.local_addr()?;
        let listener = Listener::new(listener, self.max_connections);

        tracing::info!(
            address = %addr,
            max_connections = listener.max_connections(),
            "Proxy listening"
        );
        self.state.audit.record(AuditEvent::info("proxy_started").port(addr.port()));

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept failed");
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            continue;
                        }
                    };

                    let guard = self.state.connections.track();
                    let state = self.state.clone();
                    let router = self.router.clone();
                    let shutdown = shutdown.resubscribe();
                    tokio::spawn(async move {
                        serve_connection(state, router, stream, peer, guard.id(), shutdown).await;
                        drop(permit);
                        drop(guard);
                    });
                }
            }
        }

        tracing::info!(
            active = self.state.connections.active_count(),
            "Stopped accepting, draining connections"
        );
        if !self.state.connections.drain(self.drain_timeout).await {
            tracing::warn!(
                active = self.state.connections.active_count(),
                "Drain deadline passed, abandoning open connections"
            );
        }
        tracing::info!("Proxy stopped");
        Ok(())
    }
}

/// Serve one client connection until it closes or is upgraded.
async fn serve_connection(
    state: Arc<ProxyState>,
    router: Router,
    stream: TcpStream,
    peer: SocketAddr,
    connection_id: ConnectionId,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::trace!(connection_id = %connection_id, peer = %peer, "Serving connection");

    let audit = state.audit.clone();
    let service = service_fn(move |request: Request<Incoming>| {
        let state = state.clone();
        let router = router.clone();
        async move {
            let mut request = request.map(Body::new);
            if request.method() == Method::CONNECT {
                return Ok::<_, Infallible>(tunnel::handle_connect(state, peer, request).await);
            }
            request.extensions_mut().insert(ConnectInfo(peer));
            router.oneshot(request).await
        }
    });

    let conn = http1::Builder::new()
        .preserve_header_case(true)
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.recv() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(e) = result {
        if e.is_parse() {
            tracing::debug!(connection_id = %connection_id, peer = %peer, error = %e, "Malformed request");
            audit.record(AuditEvent::error("client_error").client(peer).cause(&e));
        } else if !e.is_incomplete_message() {
            tracing::debug!(connection_id = %connection_id, peer = %peer, error = %e, "Connection error");
        }
    }
}

/// Route, authorize, then forward or deny a non-CONNECT request.
async fn proxy_handler(
    State(state): State<Arc<ProxyState>>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response<Body> {
    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let mut ctx = RequestContext::new(&parts, client);

    let route = state.routes.match_path(&ctx.pathname);
    ctx.route = route.map(|r| r.name.clone());

    match authorize(
        route,
        ctx.user.as_deref(),
        ctx.method.as_str(),
        &state.users,
        AccessScope::Request,
    ) {
        Ok(route) => forward::forward(&state, &ctx, route, Request::from_parts(parts, body)).await,
        Err(denial) => {
            tracing::debug!(
                request_id = %ctx.id,
                method = %ctx.method,
                path = %ctx.pathname,
                reason = denial.code(),
                "Request denied"
            );
            state.audit.record(ctx.denied(&denial));
            metrics::record_denial(denial.code());
            let status = ProxyError::from(denial).status();
            metrics::record_request(
                ctx.method.as_str(),
                status.as_u16(),
                ctx.route.as_deref().unwrap_or("none"),
                start,
            );
            text_response(status, denial.message())
        }
    }
}

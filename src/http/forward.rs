//! Request forwarding to the route's upstream.
//!
//! # Responsibilities
//! - Build the destination URL (upstream origin + rewritten path + query)
//!   with the client's query bytes passed through untouched
//! - Sanitize headers in both directions
//! - Stream request and response bodies without buffering
//! - Map failures to 500 (preparation) or 502 (transport)
//!
//! # Design Decisions
//! - Bodies are passed through as streams; hyper applies flow control, so
//!   a slow reader on either side throttles the other
//! - Dropping the returned response (client gone) drops the upstream body
//!   and closes that connection
//! - No retries: the first transport error is the answer

use std::time::Instant;

use axum::body::Body;
use axum::http::header::{HeaderValue, CONTENT_TYPE};
use axum::http::{Request, Response, StatusCode, Uri, Version};
use axum::response::IntoResponse;
use url::Url;

use crate::error::{ProxyError, Result};
use crate::http::request::RequestContext;
use crate::http::server::ProxyState;
use crate::observability::{metrics, AuditEvent};
use crate::routing::{join_paths, Route};
use crate::security::headers;

/// Where an authorized request is sent.
#[derive(Debug, Clone)]
pub struct Destination {
    /// Full destination URL as sent, used for logs and audit records.
    pub url: String,
    pub uri: Uri,
    /// Value for the outgoing `Host` header: host, plus port when it is not
    /// the scheme default.
    pub host: HeaderValue,
}

/// Compute the destination for `pathname`/`query` on `route`.
pub fn destination(route: &Route, pathname: &str, query: Option<&str>) -> Result<Destination> {
    let upstream = route
        .upstream
        .as_deref()
        .ok_or_else(|| ProxyError::UpstreamPreparation("upstream_not_configured".into()))?;
    let mut url = Url::parse(upstream)
        .map_err(|e| ProxyError::UpstreamPreparation(format!("invalid upstream {:?}: {}", upstream, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProxyError::UpstreamPreparation(format!(
            "unsupported upstream scheme {:?}",
            url.scheme()
        )));
    }
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => {
            return Err(ProxyError::UpstreamPreparation(format!(
                "upstream {:?} has no host",
                upstream
            )))
        }
    };

    let path = join_paths(url.path(), &route.suffix_for(pathname));
    url.set_path(&path);

    // The query is appended as received; re-serializing it through `Url`
    // would percent-encode characters such as `'`.
    let mut target = format!("{}://{}{}", url.scheme(), host, url.path());
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        target.push('?');
        target.push_str(query);
    }

    let uri: Uri = target
        .parse()
        .map_err(|e| ProxyError::UpstreamPreparation(format!("invalid destination {}: {}", target, e)))?;
    let host = HeaderValue::from_str(&host)
        .map_err(|e| ProxyError::UpstreamPreparation(format!("invalid host {:?}: {}", host, e)))?;

    Ok(Destination { url: target, uri, host })
}

/// Forward an authorized request and relay the upstream response.
///
/// Emits one audit record when forwarding fails.
pub async fn forward(
    state: &ProxyState,
    ctx: &RequestContext,
    route: &Route,
    request: Request<Body>,
) -> Response<Body> {
    let start = Instant::now();

    let dest = match destination(route, &ctx.pathname, ctx.query.as_deref()) {
        Ok(dest) => dest,
        Err(e) => {
            tracing::error!(request_id = %ctx.id, route = %route.name, error = %e, "Failed to prepare upstream request");
            state
                .audit
                .record(ctx.annotate(AuditEvent::error("prepare_forward_failed")).cause(&e));
            let status = e.status();
            metrics::record_request(ctx.method.as_str(), status.as_u16(), &route.name, start);
            return text_response(status, "Internal Server Error");
        }
    };

    tracing::debug!(
        request_id = %ctx.id,
        method = %ctx.method,
        route = %route.name,
        dest = %dest.url,
        "Forwarding request"
    );

    match send(state, request, &dest).await {
        Ok(response) => {
            metrics::record_request(ctx.method.as_str(), response.status().as_u16(), &route.name, start);
            response
        }
        Err(e) => {
            tracing::error!(request_id = %ctx.id, route = %route.name, dest = %dest.url, error = %e, "Upstream error");
            state.audit.record(
                ctx.annotate(AuditEvent::error("upstream_request_error"))
                    .dest(dest.url.as_str())
                    .cause(&e),
            );
            let status = e.status();
            metrics::record_request(ctx.method.as_str(), status.as_u16(), &route.name, start);
            text_response(status, "Bad Gateway")
        }
    }
}

async fn send(state: &ProxyState, request: Request<Body>, dest: &Destination) -> Result<Response<Body>> {
    let (mut parts, body) = request.into_parts();
    parts.uri = dest.uri.clone();
    parts.version = Version::HTTP_11;
    headers::filter_request(&mut parts.headers, dest.host.clone());

    let response = state
        .client
        .request(Request::from_parts(parts, body))
        .await
        .map_err(|e| ProxyError::UpstreamTransport(error_chain(&e)))?;

    let (mut parts, body) = response.into_parts();
    headers::filter_response(&mut parts.headers);
    Ok(Response::from_parts(parts, Body::new(body)))
}

/// Plain-text response used for every locally generated outcome.
pub fn text_response(status: StatusCode, body: &'static str) -> Response<Body> {
    (status, [(CONTENT_TYPE, "text/plain")], body).into_response()
}

/// Render an error with its sources, e.g. `client error (Connect): tcp
/// connect error: Connection refused`.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

//! Caller identity extraction.
//!
//! Resolution order, first hit wins:
//! 1. `x-user-id` / `x_user_id` header, trimmed
//! 2. `Authorization: Bearer <token>` (scheme case-insensitive), token trimmed
//!
//! The same rules apply to CONNECT requests.

use axum::http::HeaderMap;

const USER_HEADERS: [&str; 2] = ["x-user-id", "x_user_id"];
const BEARER: &str = "bearer ";

/// Extract the caller identity from request headers.
///
/// A user header that is present but blank resolves to no identity; the
/// Authorization header is only consulted when no user header is set.
pub fn resolve(headers: &HeaderMap) -> Option<String> {
    let user_header = USER_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .find(|value| !value.is_empty());

    if let Some(value) = user_header {
        return non_empty(value.trim());
    }

    let auth = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    match auth.get(..BEARER.len()) {
        Some(scheme) if scheme.eq_ignore_ascii_case(BEARER) => non_empty(auth[BEARER.len()..].trim()),
        _ => None,
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

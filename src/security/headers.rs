//! Header filtering for forwarded requests and relayed responses.
//!
//! # Responsibilities
//! - Strip headers added by fronting proxies (nginx and friends) in both
//!   directions
//! - Strip connection-scoped headers that belong to a single hop
//! - Point `Host` at the destination
//!
//! # Design Decisions
//! - `HeaderMap` keys are case-insensitive, so one lowercase list covers
//!   every spelling a client might use
//! - Untouched headers keep their order and values

use axum::http::header::{HeaderValue, CONNECTION, HOST, TRANSFER_ENCODING};
use axum::http::HeaderMap;

/// Headers injected by fronting proxies, removed in both directions.
pub const FORWARDING_HEADERS: [&str; 8] = [
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "via",
    "x-real-ip",
    "x-nginx-proxy",
    "x-nginx",
    "forwarded",
];

const PROXY_CONNECTION: &str = "proxy-connection";

/// Remove every forwarding header.
pub fn strip_forwarding(headers: &mut HeaderMap) {
    for name in FORWARDING_HEADERS {
        headers.remove(name);
    }
}

/// Prepare client request headers for the upstream hop.
pub fn filter_request(headers: &mut HeaderMap, host: HeaderValue) {
    strip_forwarding(headers);
    headers.remove(CONNECTION);
    headers.remove(PROXY_CONNECTION);
    headers.insert(HOST, host);
}

/// Prepare upstream response headers for the client hop.
pub fn filter_response(headers: &mut HeaderMap) {
    strip_forwarding(headers);
    headers.remove(CONNECTION);
    headers.remove(TRANSFER_ENCODING);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderName;

    fn map(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in pairs {
            headers.append(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        headers
    }

    fn names(headers: &HeaderMap) -> Vec<String> {
        let mut names: Vec<String> = headers.keys().map(|k| k.as_str().to_string()).collect();
        names.sort();
        names
    }

    #[test]
    fn strips_forwarding_headers_regardless_of_case() {
        let mut headers = map(&[
            ("X-Forwarded-For", "1.2.3.4"),
            ("VIA", "1.1 nginx"),
            ("Host", "proxy.local"),
            ("Content-Type", "application/json"),
        ]);
        strip_forwarding(&mut headers);
        assert_eq!(names(&headers), vec!["content-type", "host"]);
    }

    #[test]
    fn request_filter_rewrites_host_and_drops_hop_headers() {
        let mut headers = map(&[
            ("Host", "proxy.local"),
            ("Connection", "keep-alive"),
            ("Proxy-Connection", "keep-alive"),
            ("X-Real-IP", "10.0.0.1"),
            ("Forwarded", "for=10.0.0.1"),
            ("Accept", "*/*"),
        ]);
        filter_request(&mut headers, HeaderValue::from_static("a.example:8443"));
        assert_eq!(names(&headers), vec!["accept", "host"]);
        assert_eq!(headers[HOST], "a.example:8443");
    }

    #[test]
    fn response_filter_drops_framing_headers() {
        let mut headers = map(&[
            ("Transfer-Encoding", "chunked"),
            ("Connection", "close"),
            ("X-Nginx", "1"),
            ("Set-Cookie", "a=1"),
            ("Set-Cookie", "b=2"),
        ]);
        filter_response(&mut headers);
        assert_eq!(names(&headers), vec!["set-cookie"]);
        assert_eq!(headers.get_all("set-cookie").iter().count(), 2);
    }
}

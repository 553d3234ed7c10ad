//! End-to-end tests for CONNECT tunnelling.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

mod common;

use common::{config, raw_request, route, start_proxy, start_silent_backend, start_tcp_echo};

fn connect_request(target: &str, user: Option<&str>) -> String {
    let mut request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", target, target);
    if let Some(user) = user {
        request.push_str(&format!("X-User-Id: {}\r\n", user));
    }
    request.push_str("\r\n");
    request
}

#[tokio::test]
async fn tunnels_bytes_both_ways() {
    let echo = start_tcp_echo().await;
    let proxy = start_proxy(config(
        vec![("echo", route("/echo", &format!("https://{}", echo), &["u1"], &["CONNECT"]))],
        &["u1"],
    ))
    .await;

    let (mut stream, head) = raw_request(proxy.addr, &connect_request(&echo.to_string(), Some("u1"))).await;
    assert!(head.starts_with("HTTP/1.1 200 Connection Established\r\n"), "{}", head);
    assert!(head.to_ascii_lowercase().contains("proxy-agent: path-proxy"), "{}", head);

    stream.write_all(b"ping through the tunnel").await.unwrap();
    let mut buf = [0u8; 23];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"ping through the tunnel");

    assert!(proxy.events().is_empty(), "{:?}", proxy.events());
}

#[tokio::test]
async fn bytes_sent_with_the_connect_head_are_not_lost() {
    let echo = start_tcp_echo().await;
    let proxy = start_proxy(config(
        vec![("echo", route("/echo", &format!("https://{}", echo), &["u1"], &["connect"]))],
        &["u1"],
    ))
    .await;

    let mut request = connect_request(&echo.to_string(), Some("u1"));
    request.push_str("early");
    let (mut stream, head) = raw_request(proxy.addr, &request).await;
    assert!(head.starts_with("HTTP/1.1 200"), "{}", head);

    let mut buf = [0u8; 5];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"early");
}

#[tokio::test]
async fn connect_without_permission_is_refused() {
    let echo = start_tcp_echo().await;
    let proxy = start_proxy(config(
        vec![("echo", route("/echo", &format!("https://{}", echo), &["u1"], &["GET"]))],
        &["u1"],
    ))
    .await;

    let (mut stream, head) = raw_request(proxy.addr, &connect_request(&echo.to_string(), Some("u1"))).await;
    assert!(head.starts_with("HTTP/1.1 405"), "{}", head);

    // The proxy closes instead of opening a tunnel.
    let mut rest = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);

    let event = proxy.wait_for_event("connect_not_allowed").await;
    assert_eq!(event.connect_host, Some(echo.to_string()));
    assert_eq!(event.route.as_deref(), Some("echo"));
    assert_eq!(event.user_id.as_deref(), Some("u1"));
}

#[tokio::test]
async fn connect_denials() {
    let echo = start_tcp_echo().await;
    let proxy = start_proxy(config(
        vec![("echo", route("/echo", &format!("https://{}", echo), &["u1"], &["CONNECT"]))],
        &["u1", "u2"],
    ))
    .await;
    let target = echo.to_string();

    let (_s, head) = raw_request(proxy.addr, &connect_request("elsewhere.invalid:443", Some("u1"))).await;
    assert!(head.starts_with("HTTP/1.1 403"), "{}", head);
    proxy.wait_for_event("no_route_for_connect").await;

    let (_s, head) = raw_request(proxy.addr, &connect_request(&target, None)).await;
    assert!(head.starts_with("HTTP/1.1 401"), "{}", head);
    proxy.wait_for_event("missing_user").await;

    let (_s, head) = raw_request(proxy.addr, &connect_request(&target, Some("ghost"))).await;
    assert!(head.starts_with("HTTP/1.1 401"), "{}", head);
    proxy.wait_for_event("unknown_user").await;

    let (_s, head) = raw_request(proxy.addr, &connect_request(&target, Some("u2"))).await;
    assert!(head.starts_with("HTTP/1.1 403"), "{}", head);
    proxy.wait_for_event("user_not_permitted_for_connect").await;
}

#[tokio::test]
async fn unreachable_connect_target_is_bad_gateway() {
    let dead = common::dead_addr().await;
    let proxy = start_proxy(config(
        vec![("dead", route("/dead", &format!("https://{}", dead), &["u1"], &["CONNECT"]))],
        &["u1"],
    ))
    .await;

    let (_s, head) = raw_request(proxy.addr, &connect_request(&dead.to_string(), Some("u1"))).await;
    assert!(head.starts_with("HTTP/1.1 502"), "{}", head);

    let event = proxy.wait_for_event("connect_upstream_error").await;
    assert_eq!(event.route.as_deref(), Some("dead"));
    assert!(event.error.is_some());
}

#[tokio::test]
async fn tunnel_ends_when_the_client_leaves() {
    let backend = start_silent_backend().await;
    let proxy = start_proxy(config(
        vec![("quiet", route("/quiet", &format!("https://{}", backend), &["u1"], &["CONNECT"]))],
        &["u1"],
    ))
    .await;

    let (mut stream, head) = raw_request(proxy.addr, &connect_request(&backend.to_string(), Some("u1"))).await;
    assert!(head.starts_with("HTTP/1.1 200"), "{}", head);
    stream.write_all(b"hello").await.unwrap();

    // The upstream never answers or closes; the tunnel must still go away.
    drop(stream);
    proxy.wait_until_idle().await;
}

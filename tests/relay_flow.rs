//! End-to-end tests for the relay and sniffer listeners

mod common;

use common::*;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

#[tokio::test]
async fn test_default_forward_streams_upstream_body_as_200() {
    let (simulation, mut seen) = start_mock_upstream(500, "upstream says no").await;
    let admin = closed_addr().await;
    let tunnel = closed_addr().await;
    let (relay, shutdown) = start_relay(test_config(simulation, admin, tunnel)).await;

    let response = client()
        .get(format!("http://{}/api/items?page=2", relay))
        .header("x-custom", "kept")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "text/plain");
    assert_eq!(response.headers()["cache-control"], "no-cache");
    assert!(response.headers().get("x-mock").is_none());
    assert_eq!(response.text().await.unwrap(), "upstream says no");

    let request = seen.recv().await.unwrap();
    assert_eq!(request.request_line, "GET /api/items?page=2 HTTP/1.1");
    assert_eq!(request.header("x-custom"), Some("kept"));
    shutdown.cancel();
}

#[tokio::test]
async fn test_default_forward_sends_request_body() {
    let (simulation, mut seen) = start_mock_upstream(200, "ok").await;
    let unused = closed_addr().await;
    let (relay, shutdown) = start_relay(test_config(simulation, unused, unused)).await;

    let response = client()
        .post(format!("http://{}/orders", relay))
        .body("{\"id\":42}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "ok");

    let request = seen.recv().await.unwrap();
    assert_eq!(request.request_line, "POST /orders HTTP/1.1");
    assert_eq!(request.body, b"{\"id\":42}");
    shutdown.cancel();
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let unused = closed_addr().await;
    let (relay, shutdown) = start_relay(test_config(unused, unused, unused)).await;

    let response = client().get(format!("http://{}/", relay)).send().await.unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(
        response.text().await.unwrap(),
        "The requested endpoint / does not exist or is not available."
    );
    shutdown.cancel();
}

#[tokio::test]
async fn test_unreachable_simulation_service_is_502() {
    let unused = closed_addr().await;
    let (relay, shutdown) = start_relay(test_config(unused, unused, unused)).await;

    let response = client().get(format!("http://{}/api/items", relay)).send().await.unwrap();
    assert_eq!(response.status(), 502);
    let body = response.text().await.unwrap();
    assert!(
        body.starts_with("Bad gateway. Request to simulation service failed: "),
        "unexpected body: {}",
        body
    );
    assert!(body.contains("Connection refused"), "unexpected body: {}", body);
    shutdown.cancel();
}

#[tokio::test]
async fn test_default_forward_goes_through_forwarding_agent() {
    let (agent, mut seen) = start_mock_upstream(200, "via agent").await;
    let unused = closed_addr().await;
    let mut config = test_config(unused, unused, unused);
    config.simulation.base_url = "http://hoverfly.invalid:8500".to_string();
    config.simulation.upstream_proxy = Some(format!("http://{}", agent));
    let (relay, shutdown) = start_relay(config).await;

    let response = client()
        .get(format!("http://{}/api/x?y=1", relay))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "via agent");

    let request = seen.recv().await.unwrap();
    assert_eq!(request.request_line, "GET http://hoverfly.invalid:8500/api/x?y=1 HTTP/1.1");
    shutdown.cancel();
}

#[tokio::test]
async fn test_truncated_request_body_is_502() {
    let unused = closed_addr().await;
    let (relay, shutdown) = start_relay(test_config(unused, unused, unused)).await;

    let mut stream = TcpStream::connect(relay).await.unwrap();
    stream
        .write_all(b"POST /api/x HTTP/1.1\r\nHost: x\r\nContent-Length: 100\r\n\r\nshort")
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let response = read_until(&mut stream, "Fetch error: ").await;
    assert!(response.starts_with("HTTP/1.1 502"), "unexpected response: {}", response);
    shutdown.cancel();
}

#[tokio::test]
async fn test_dot_segment_path_is_404_end_to_end() {
    let unused = closed_addr().await;
    let (relay, shutdown) = start_relay(test_config(unused, unused, unused)).await;

    let mut stream = TcpStream::connect(relay).await.unwrap();
    stream.write_all(b"GET /../ HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();

    let response = read_until(&mut stream, "not available.").await;
    assert!(response.starts_with("HTTP/1.1 404"), "unexpected response: {}", response);
    assert!(response.contains("The requested endpoint /../ does not exist or is not available."));
    shutdown.cancel();
}

#[tokio::test]
async fn test_capture_without_target_header_is_400() {
    let unused = closed_addr().await;
    let (relay, shutdown) = start_relay(test_config(unused, unused, unused)).await;

    let response = client()
        .post(format!("http://{}/capture", relay))
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(response.text().await.unwrap(), "Missing x-target-url header");
    shutdown.cancel();
}

#[tokio::test]
async fn test_capture_with_invalid_target_header_is_400() {
    let unused = closed_addr().await;
    let (relay, shutdown) = start_relay(test_config(unused, unused, unused)).await;

    let response = client()
        .post(format!("http://{}/capture", relay))
        .header("x-target-url", "not a url")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert!(response
        .text()
        .await
        .unwrap()
        .starts_with("Invalid x-target-url header 'not a url': "));
    shutdown.cancel();
}

#[tokio::test]
async fn test_capture_relays_upstream_response() {
    let (target, mut seen) = start_mock_upstream(201, "created").await;
    let unused = closed_addr().await;
    let (relay, shutdown) = start_relay(test_config(unused, unused, unused)).await;

    let response = client()
        .post(format!("http://{}/capture", relay))
        .header("x-target-url", format!("http://{}/hook?x=1", target))
        .body("captured body")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    assert_eq!(response.headers()["x-mock"], "yes");
    assert_eq!(response.text().await.unwrap(), "created");

    let request = seen.recv().await.unwrap();
    assert_eq!(request.request_line, "POST /hook?x=1 HTTP/1.1");
    assert_eq!(request.header("host"), Some(target.to_string().as_str()));
    assert!(request.header("x-target-url").is_none());
    assert_eq!(request.body, b"captured body");
    shutdown.cancel();
}

#[tokio::test]
async fn test_capture_drops_body_for_get() {
    let (target, mut seen) = start_mock_upstream(200, "fine").await;
    let unused = closed_addr().await;
    let (relay, shutdown) = start_relay(test_config(unused, unused, unused)).await;

    let response = client()
        .get(format!("http://{}/capture", relay))
        .header("x-target-url", format!("http://{}/read", target))
        .body("ignored")
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "fine");

    let request = seen.recv().await.unwrap();
    assert_eq!(request.request_line, "GET /read HTTP/1.1");
    assert!(request.body.is_empty());
    shutdown.cancel();
}

#[tokio::test]
async fn test_admin_prefix_is_stripped() {
    let (admin, mut seen) = start_mock_upstream(202, "admin ok").await;
    let unused = closed_addr().await;
    let (relay, shutdown) = start_relay(test_config(unused, admin, unused)).await;

    let response = client()
        .put(format!("http://{}/admin/api/v2/simulation?mode=capture", relay))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
    assert_eq!(response.text().await.unwrap(), "admin ok");

    let request = seen.recv().await.unwrap();
    assert_eq!(request.request_line, "PUT /api/v2/simulation?mode=capture HTTP/1.1");
    assert_eq!(request.body, b"{}");

    let response = client().get(format!("http://{}/admin", relay)).send().await.unwrap();
    assert_eq!(response.status(), 202);
    let request = seen.recv().await.unwrap();
    assert_eq!(request.request_line, "GET / HTTP/1.1");
    shutdown.cancel();
}

#[tokio::test]
async fn test_unreachable_admin_endpoint_is_502() {
    let unused = closed_addr().await;
    let (relay, shutdown) = start_relay(test_config(unused, unused, unused)).await;

    let response = client().get(format!("http://{}/admin/state", relay)).send().await.unwrap();
    assert_eq!(response.status(), 502);
    assert!(response
        .text()
        .await
        .unwrap()
        .starts_with("Bad gateway. Request to admin endpoint failed: "));
    shutdown.cancel();
}

#[tokio::test]
async fn test_connect_tunnels_to_fixed_target() {
    let echo = start_echo_upstream().await;
    let unused = closed_addr().await;
    let (relay, shutdown) = start_relay(test_config(unused, unused, echo)).await;

    let mut stream = TcpStream::connect(relay).await.unwrap();
    stream
        .write_all(b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\nearly")
        .await
        .unwrap();

    let mut line = vec![0u8; ESTABLISHED.len()];
    stream.read_exact(&mut line).await.unwrap();
    assert_eq!(line, ESTABLISHED);

    let mut echoed = [0u8; 5];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"early");

    stream.write_all(b"client hello").await.unwrap();
    let mut echoed = [0u8; 12];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"client hello");
    shutdown.cancel();
}

#[tokio::test]
async fn test_connect_after_request_on_same_socket() {
    let echo = start_echo_upstream().await;
    let unused = closed_addr().await;
    let (relay, shutdown) = start_relay(test_config(unused, unused, echo)).await;

    let mut stream = TcpStream::connect(relay).await.unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    let response = read_until(&mut stream, "not available.").await;
    assert!(response.starts_with("HTTP/1.1 404"), "unexpected response: {}", response);

    stream
        .write_all(b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n")
        .await
        .unwrap();
    let mut line = vec![0u8; ESTABLISHED.len()];
    stream.read_exact(&mut line).await.unwrap();
    assert_eq!(line, ESTABLISHED);

    stream.write_all(b"after").await.unwrap();
    let mut echoed = [0u8; 5];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"after");
    shutdown.cancel();
}

#[tokio::test]
async fn test_pipelined_connect_after_request() {
    let echo = start_echo_upstream().await;
    let unused = closed_addr().await;
    let (relay, shutdown) = start_relay(test_config(unused, unused, echo)).await;

    let mut stream = TcpStream::connect(relay).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\nCONNECT example.com:443 HTTP/1.1\r\n\r\nearly")
        .await
        .unwrap();

    let response = read_until(&mut stream, "early").await;
    assert!(response.starts_with("HTTP/1.1 404"), "unexpected response: {}", response);
    let tunnel = &response[response.find("not available.").unwrap() + "not available.".len()..];
    assert_eq!(tunnel.as_bytes(), [ESTABLISHED, b"early"].concat().as_slice());
    shutdown.cancel();
}

#[tokio::test]
async fn test_connect_to_unreachable_target_closes_socket() {
    let unused = closed_addr().await;
    let (relay, shutdown) = start_relay(test_config(unused, unused, unused)).await;

    let mut stream = TcpStream::connect(relay).await.unwrap();
    stream
        .write_all(b"CONNECT example.com:443 HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let mut buf = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf)).await;
    match read.unwrap() {
        Ok(n) => assert_eq!(n, 0),
        Err(e) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
    }
    shutdown.cancel();
}

#[tokio::test]
async fn test_sniffer_relays_and_preserves_status() {
    let (target, mut seen) = start_mock_upstream(418, "teapot").await;
    let unused = closed_addr().await;
    let (sniffer, shutdown) = start_sniffer(test_config(target, unused, unused)).await;

    let response = client()
        .post(format!("http://{}/brew?kind=green", sniffer))
        .body("leaves")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 418);
    assert_eq!(response.headers()["x-mock"], "yes");
    assert_eq!(response.text().await.unwrap(), "teapot");

    let request = seen.recv().await.unwrap();
    assert_eq!(request.request_line, "POST /brew?kind=green HTTP/1.1");
    assert_eq!(request.header("host"), Some(target.to_string().as_str()));
    assert_eq!(request.body, b"leaves");
    shutdown.cancel();
}

#[tokio::test]
async fn test_sniffer_unreachable_target_is_502() {
    let unused = closed_addr().await;
    let (sniffer, shutdown) = start_sniffer(test_config(unused, unused, unused)).await;

    let response = client().get(format!("http://{}/anything", sniffer)).send().await.unwrap();
    assert_eq!(response.status(), 502);
    assert!(response
        .text()
        .await
        .unwrap()
        .starts_with("Bad gateway. Request to sniffer target failed: "));
    shutdown.cancel();
}

#[tokio::test]
async fn test_relay_stops_accepting_after_shutdown() {
    let unused = closed_addr().await;
    let config = test_config(unused, unused, unused);
    let server = hover_relay::ProxyServer::bind(std::sync::Arc::new(config)).await.unwrap();
    let shutdown = tokio_util::sync::CancellationToken::new();
    let handle = tokio::spawn(server.run(shutdown.clone()));

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap();
    assert!(result.unwrap().is_ok());
}

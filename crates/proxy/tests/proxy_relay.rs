//! Transport proxy integration tests: blind CONNECT relay, plain-HTTP
//! forwarding with Host rewrite, upstream failure handling, idle teardown,
//! and locally served RPC endpoints.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use async_trait::async_trait;
use windlass_common::{Command, CommandResult, Result, Settings};
use windlass_proxy::{Dispatcher, ProxyHandle, ProxyServer};

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.proxy_port = 0;
    settings.timeouts.tunnel_idle_ms = 60_000;
    settings
}

async fn spawn_proxy(settings: Settings) -> ProxyHandle {
    ProxyServer::bind(Arc::new(settings))
        .await
        .expect("bind proxy")
        .spawn()
        .expect("spawn proxy")
}

/// Upstream that answers one request with 200 and the body "OK", recording
/// the request head it received.
async fn spawn_http_upstream() -> (u16, tokio::sync::oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        let head = String::from_utf8_lossy(&buf[..n]).to_string();
        let _ = tx.send(head);

        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK")
            .await
            .unwrap();
        stream.shutdown().await.unwrap();
    });

    (port, rx)
}

/// Upstream echo server for tunnel tests
async fn spawn_echo_upstream() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    port
}

async fn read_until_close(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
        }
    }
    out
}

#[tokio::test]
async fn test_plain_http_forward_rewrites_host_and_relays_body() {
    let (upstream_port, head_rx) = spawn_http_upstream().await;
    let proxy = spawn_proxy(test_settings()).await;

    let mut client = TcpStream::connect(proxy.addr()).await.unwrap();
    let request = format!(
        "GET http://127.0.0.1:{}/page?x=1 HTTP/1.1\r\nHost: test.example\r\nAccept: */*\r\n\r\n",
        upstream_port
    );
    client.write_all(request.as_bytes()).await.unwrap();

    let response = read_until_close(&mut client).await;
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 200 OK"), "got: {}", response);
    assert!(response.ends_with("OK"));

    let forwarded = head_rx.await.unwrap();
    // Origin-form request line, not the absolute URI
    assert!(
        forwarded.starts_with("GET /page?x=1 HTTP/1.1"),
        "got: {}",
        forwarded
    );
    // Host rewritten to the real upstream authority
    assert!(forwarded.contains(&format!("Host: 127.0.0.1:{}", upstream_port)));
    assert!(!forwarded.contains("test.example"));
    // Other headers pass through unmodified
    assert!(forwarded.contains("Accept: */*"));

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_connect_tunnel_is_byte_transparent() {
    let upstream_port = spawn_echo_upstream().await;
    let proxy = spawn_proxy(test_settings()).await;

    let mut client = TcpStream::connect(proxy.addr()).await.unwrap();
    let connect = format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", upstream_port);
    client.write_all(connect.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 256];
    let n = client.read(&mut buf).await.unwrap();
    let established = String::from_utf8_lossy(&buf[..n]);
    assert!(established.contains("200 Connection Established"));

    // Arbitrary bytes, including what looks like TLS record framing,
    // must come back exactly as sent.
    let payload: Vec<u8> = (0u16..512).map(|i| (i % 251) as u8).collect();
    client.write_all(&payload).await.unwrap();

    let mut echoed = vec![0u8; payload.len()];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, payload);

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_connect_to_dead_upstream_gets_502() {
    // Grab a port and free it again so nothing listens there
    let dead_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let proxy = spawn_proxy(test_settings()).await;

    let mut client = TcpStream::connect(proxy.addr()).await.unwrap();
    let connect = format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", dead_port);
    client.write_all(connect.as_bytes()).await.unwrap();

    let response = read_until_close(&mut client).await;
    let response = String::from_utf8_lossy(&response);
    assert!(response.contains("502 Bad Gateway"), "got: {}", response);

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_request_line_closes_without_response() {
    let proxy = spawn_proxy(test_settings()).await;

    let mut client = TcpStream::connect(proxy.addr()).await.unwrap();
    client.write_all(b"NONSENSE\r\n\r\n").await.unwrap();

    let response = read_until_close(&mut client).await;
    assert!(response.is_empty());

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_idle_tunnel_is_torn_down() {
    let upstream_port = spawn_echo_upstream().await;

    let mut settings = test_settings();
    settings.timeouts.tunnel_idle_ms = 200;
    let proxy = spawn_proxy(settings).await;

    let mut client = TcpStream::connect(proxy.addr()).await.unwrap();
    let connect = format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", upstream_port);
    client.write_all(connect.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 256];
    let n = client.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).contains("200 Connection Established"));

    // Go idle; the proxy must close the tunnel on its own
    let closed = tokio::time::timeout(Duration::from_secs(3), async {
        client.read(&mut buf).await.unwrap_or(0)
    })
    .await;
    assert_eq!(closed.expect("tunnel not closed within bound"), 0);

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_live_tunnels() {
    let upstream_port = spawn_echo_upstream().await;
    let proxy = spawn_proxy(test_settings()).await;

    let mut client = TcpStream::connect(proxy.addr()).await.unwrap();
    let connect = format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", upstream_port);
    client.write_all(connect.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 256];
    let n = client.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).contains("200 Connection Established"));

    // Relay works before teardown
    client.write_all(b"ping").await.unwrap();
    let mut echo = [0u8; 4];
    client.read_exact(&mut echo).await.unwrap();
    assert_eq!(&echo, b"ping");

    proxy.shutdown().await.unwrap();

    // The tunnel is gone: nothing written now comes back
    let _ = client.write_all(b"after").await;
    let outcome = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf)).await;
    let n = outcome
        .expect("tunnel still relaying after shutdown")
        .unwrap_or(0);
    assert_eq!(n, 0, "unexpected bytes after shutdown");
}

struct ScriptedDispatcher;

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    async fn dispatch(&self, command: Command) -> Result<CommandResult> {
        match command.method.as_str() {
            "click" => {
                let found = command.params.get("id").and_then(|v| v.as_str()) == Some("present");
                Ok(CommandResult::of_bool(found))
            }
            other => Err(windlass_common::Error::RpcFault {
                code: 100,
                message: format!("unknown method: {}", other),
            }),
        }
    }
}

async fn post_rpc(proxy: &ProxyHandle, path: &str, content_type: &str, body: &str) -> String {
    let mut client = TcpStream::connect(proxy.addr()).await.unwrap();
    let request = format!(
        "POST {} HTTP/1.1\r\nHost: 127.0.0.1\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n{}",
        path,
        content_type,
        body.len(),
        body
    );
    client.write_all(request.as_bytes()).await.unwrap();
    String::from_utf8_lossy(&read_until_close(&mut client).await).to_string()
}

#[tokio::test]
async fn test_local_jsonrpc_endpoint_answers_on_proxy_origin() {
    let proxy = ProxyServer::bind(Arc::new(test_settings()))
        .await
        .unwrap()
        .with_dispatcher(Arc::new(ScriptedDispatcher))
        .spawn()
        .unwrap();

    let body = r#"{"method": "click", "params": [{"id": "present"}], "id": 1}"#;
    let response = post_rpc(&proxy, "/windlass-jsonrpc/", "application/json", body).await;
    assert!(response.contains("200 OK"), "got: {}", response);
    assert!(response.contains(r#""result":{"result":true}"#), "got: {}", response);

    let body = r#"{"method": "teleport", "params": [{}], "id": 2}"#;
    let response = post_rpc(&proxy, "/windlass-jsonrpc/", "application/json", body).await;
    assert!(response.contains("unknown method: teleport"), "got: {}", response);

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_local_xmlrpc_endpoint_answers_on_proxy_origin() {
    let proxy = ProxyServer::bind(Arc::new(test_settings()))
        .await
        .unwrap()
        .with_dispatcher(Arc::new(ScriptedDispatcher))
        .spawn()
        .unwrap();

    let command = Command::click(&windlass_common::Locator::Id("missing".into()));
    let body = windlass_common::xmlrpc::encode_call(&command).unwrap();
    let response = post_rpc(&proxy, "/windlass-xmlrpc/", "text/xml", &body).await;
    assert!(response.contains("200 OK"), "got: {}", response);

    let payload = response.split("\r\n\r\n").nth(1).unwrap();
    let result = windlass_common::xmlrpc::decode_response(payload).unwrap();
    assert!(!result.is_pass());

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stalled_rpc_body_is_dropped_at_the_idle_bound() {
    let mut settings = test_settings();
    settings.timeouts.tunnel_idle_ms = 200;
    let proxy = ProxyServer::bind(Arc::new(settings))
        .await
        .unwrap()
        .with_dispatcher(Arc::new(ScriptedDispatcher))
        .spawn()
        .unwrap();

    let body = r#"{"method": "click", "params": [{"id": "present"}], "id": 1}"#;
    let mut client = TcpStream::connect(proxy.addr()).await.unwrap();
    let head = format!(
        "POST /windlass-jsonrpc/ HTTP/1.1\r\nHost: 127.0.0.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    client.write_all(head.as_bytes()).await.unwrap();

    // Body arrives well past the idle bound; the call must not be served
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let _ = client.write_all(body.as_bytes()).await;

    let response = read_until_close(&mut client).await;
    let response = String::from_utf8_lossy(&response);
    assert!(
        !response.contains("200 OK"),
        "stalled call was still served: {}",
        response
    );

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_oversized_rpc_body_is_rejected() {
    let proxy = ProxyServer::bind(Arc::new(test_settings()))
        .await
        .unwrap()
        .with_dispatcher(Arc::new(ScriptedDispatcher))
        .spawn()
        .unwrap();

    let mut client = TcpStream::connect(proxy.addr()).await.unwrap();
    let head = format!(
        "POST /windlass-jsonrpc/ HTTP/1.1\r\nHost: 127.0.0.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        8 * 1024 * 1024
    );
    client.write_all(head.as_bytes()).await.unwrap();

    let response = read_until_close(&mut client).await;
    let response = String::from_utf8_lossy(&response);
    assert!(response.contains("413"), "got: {}", response);

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bind_conflict_is_a_bind_error() {
    let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = holder.local_addr().unwrap().port();

    let mut settings = test_settings();
    settings.proxy_port = port;
    match ProxyServer::bind(Arc::new(settings)).await {
        Err(windlass_common::Error::Bind { port: p, .. }) => assert_eq!(p, port),
        other => panic!("expected Bind error, got {:?}", other.map(|_| ())),
    }
}

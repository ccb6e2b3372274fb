//! Per-connection protocol handling
//!
//! Reads the request head from an accepted browser connection and decides
//! between three paths: a CONNECT blind tunnel, a locally served RPC
//! endpoint, or a rewrite-and-forward of a plain HTTP request.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use windlass_common::{Error, Result, RpcProtocol, Settings};

use crate::dispatch::Dispatcher;
use crate::tunnel;

/// Upper bound on the body of a locally served RPC call. Real envelopes are
/// a few hundred bytes; anything near this is not a command.
const MAX_RPC_BODY: usize = 1024 * 1024;

/// Shared per-server context handed to each connection task
pub struct ProxyContext {
    pub settings: Arc<Settings>,
    pub dispatcher: Option<Arc<dyn Dispatcher>>,
}

/// One parsed request head
#[derive(Debug)]
struct RequestHead {
    method: String,
    target: String,
    version: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn content_length(&self) -> usize {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Service one accepted connection until it is done.
///
/// All errors are contained here; the accept loop only logs them.
pub async fn handle_connection(stream: TcpStream, ctx: Arc<ProxyContext>) -> Result<()> {
    let peer = stream.peer_addr()?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let idle = Duration::from_millis(ctx.settings.timeouts.tunnel_idle_ms);

    // A connection that never sends a full head within the idle bound is
    // dropped, same as an idle tunnel.
    let head = match tokio::time::timeout(idle, read_head(&mut reader)).await {
        Ok(Ok(Some(head))) => head,
        Ok(Ok(None)) => {
            trace!("connection from {} closed before sending a request", peer);
            return Ok(());
        }
        Ok(Err(e)) => {
            // Malformed request line: close without a response
            debug!("malformed request from {}: {}", peer, e);
            return Ok(());
        }
        Err(_) => {
            debug!("request head from {} timed out", peer);
            return Ok(());
        }
    };

    trace!("{} {} {} from {}", head.method, head.target, head.version, peer);

    if head.method.eq_ignore_ascii_case("CONNECT") {
        return connect_tunnel(reader, write_half, head, &ctx, idle).await;
    }

    if let Some(protocol) = local_rpc_endpoint(&head, &ctx.settings) {
        if let Some(dispatcher) = &ctx.dispatcher {
            return serve_rpc(&mut reader, &mut write_half, &head, protocol, dispatcher, idle)
                .await;
        }
        // No local dispatcher installed: falls through to forwarding, the
        // endpoint then lives on the test server like any other URL.
    }

    forward_http(reader, write_half, head, idle).await
}

/// Read and parse one request head. `None` on a clean EOF before any bytes.
async fn read_head(reader: &mut BufReader<OwnedReadHalf>) -> Result<Option<RequestHead>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }

    let mut parts = line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v)) => (m.to_string(), t.to_string(), v.to_string()),
        _ => return Err(Error::Internal(format!("bad request line: {:?}", line.trim()))),
    };

    let mut headers = Vec::new();
    loop {
        let mut header_line = String::new();
        if reader.read_line(&mut header_line).await? == 0 {
            return Err(Error::Internal("connection closed mid-head".into()));
        }
        let trimmed = header_line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        match trimmed.split_once(':') {
            Some((name, value)) => {
                headers.push((name.trim().to_string(), value.trim().to_string()))
            }
            None => return Err(Error::Internal(format!("bad header line: {:?}", trimmed))),
        }
    }

    Ok(Some(RequestHead {
        method,
        target,
        version,
        headers,
    }))
}

/// CONNECT: open the upstream socket, confirm, then relay blindly
async fn connect_tunnel(
    reader: BufReader<OwnedReadHalf>,
    mut write_half: OwnedWriteHalf,
    head: RequestHead,
    ctx: &ProxyContext,
    idle: Duration,
) -> Result<()> {
    let authority = head.target.clone();
    let upstream = match TcpStream::connect(&authority).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("CONNECT upstream {} unreachable: {}", authority, e);
            respond_status(&mut write_half, &head.version, "502 Bad Gateway").await?;
            return Err(Error::UpstreamConnect {
                authority,
                reason: e.to_string(),
            });
        }
    };

    write_half
        .write_all(format!("{} 200 Connection Established\r\n\r\n", head.version).as_bytes())
        .await?;

    debug!("tunnel established to {}", authority);
    let (upstream_read, upstream_write) = upstream.into_split();
    let stats = tunnel::relay(reader, write_half, upstream_read, upstream_write, idle).await?;
    debug!(
        "tunnel to {} closed ({}B out, {}B in)",
        authority, stats.client_to_upstream, stats.upstream_to_client
    );
    Ok(())
}

/// Plain HTTP: rewrite the absolute-URI request line to origin-form,
/// rewrite Host, forward, then relay the rest of the exchange.
async fn forward_http(
    mut reader: BufReader<OwnedReadHalf>,
    mut write_half: OwnedWriteHalf,
    head: RequestHead,
    idle: Duration,
) -> Result<()> {
    let target = match url::Url::parse(&head.target) {
        Ok(url) if url.scheme() == "http" => url,
        _ => {
            // Proxies only see absolute-URI requests for plain HTTP;
            // anything else is malformed and the connection just closes.
            debug!("non-absolute request target {:?}, closing", head.target);
            return Ok(());
        }
    };

    let host = match target.host_str() {
        Some(host) => host.to_string(),
        None => {
            debug!("request target {:?} has no host, closing", head.target);
            return Ok(());
        }
    };
    let port = target.port_or_known_default().unwrap_or(80);
    let authority = format!("{}:{}", host, port);
    let host_header = if port == 80 {
        host.clone()
    } else {
        authority.clone()
    };

    let mut upstream = match TcpStream::connect(&authority).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("upstream {} unreachable: {}", authority, e);
            respond_status(&mut write_half, &head.version, "502 Bad Gateway").await?;
            return Err(Error::UpstreamConnect {
                authority,
                reason: e.to_string(),
            });
        }
    };

    // Origin-form request line: path plus query, nothing else
    let mut origin_form = target.path().to_string();
    if let Some(query) = target.query() {
        origin_form.push('?');
        origin_form.push_str(query);
    }

    let mut out = format!("{} {} {}\r\n", head.method, origin_form, head.version);
    let mut wrote_host = false;
    for (name, value) in &head.headers {
        if name.eq_ignore_ascii_case("host") {
            out.push_str(&format!("Host: {}\r\n", host_header));
            wrote_host = true;
        } else {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
    }
    if !wrote_host {
        out.push_str(&format!("Host: {}\r\n", host_header));
    }
    out.push_str("\r\n");

    upstream.write_all(out.as_bytes()).await?;

    // Request body (if any) is copied in bounded chunks; a client that
    // advertises a length and then stalls hits the idle bound instead of
    // holding the connection open.
    let mut remaining = head.content_length();
    let mut body_buf = vec![0u8; 16 * 1024];
    while remaining > 0 {
        let want = remaining.min(body_buf.len());
        let n = match tokio::time::timeout(idle, reader.read(&mut body_buf[..want])).await {
            Ok(read) => read?,
            Err(_) => {
                debug!("request body stalled past the idle bound, closing");
                return Ok(());
            }
        };
        if n == 0 {
            debug!("client closed mid-body");
            return Ok(());
        }
        upstream.write_all(&body_buf[..n]).await?;
        remaining -= n;
    }

    debug!("forwarding {} {} to {}", head.method, origin_form, authority);
    let (upstream_read, upstream_write) = upstream.into_split();
    tunnel::relay(reader, write_half, upstream_read, upstream_write, idle).await?;
    Ok(())
}

/// Match the request path against the locally served RPC endpoints
fn local_rpc_endpoint(head: &RequestHead, settings: &Settings) -> Option<RpcProtocol> {
    if !head.method.eq_ignore_ascii_case("POST") {
        return None;
    }

    // Accept both proxy-style absolute URIs and direct origin-form targets
    let path = match url::Url::parse(&head.target) {
        Ok(url) => url.path().to_string(),
        Err(_) => head.target.clone(),
    };
    let path = path.trim_end_matches('/');

    // Exact root paths only; nested upstream paths that happen to end in
    // the endpoint name are forwarded like any other request.
    let ns = &settings.rpc.namespace;
    if path == format!("/{}-xmlrpc", ns) {
        Some(RpcProtocol::XmlRpc)
    } else if path == format!("/{}-jsonrpc", ns) {
        Some(RpcProtocol::JsonRpc)
    } else {
        None
    }
}

/// Decode, dispatch, and answer an RPC call on the proxy's own origin
async fn serve_rpc(
    reader: &mut BufReader<OwnedReadHalf>,
    write_half: &mut OwnedWriteHalf,
    head: &RequestHead,
    protocol: RpcProtocol,
    dispatcher: &Arc<dyn Dispatcher>,
    idle: Duration,
) -> Result<()> {
    let body_len = head.content_length();
    if body_len > MAX_RPC_BODY {
        warn!("RPC call body of {} bytes rejected", body_len);
        return respond_status(write_half, &head.version, "413 Payload Too Large").await;
    }

    let mut body = vec![0u8; body_len];
    match tokio::time::timeout(idle, reader.read_exact(&mut body)).await {
        Ok(read) => {
            read?;
        }
        Err(_) => {
            debug!("RPC call body stalled past the idle bound, closing");
            return Ok(());
        }
    }
    let body = String::from_utf8_lossy(&body).to_string();

    let (status, payload) = match execute(&body, protocol, dispatcher).await {
        Ok(payload) => ("200 OK", payload),
        Err(e) => {
            warn!("unencodable RPC outcome: {}", e);
            ("500 Internal Server Error", String::new())
        }
    };

    let content_type = match protocol {
        RpcProtocol::XmlRpc => "text/xml",
        RpcProtocol::JsonRpc => "application/json",
    };

    let response = format!(
        "{} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        head.version,
        status,
        content_type,
        payload.len(),
        payload
    );
    write_half.write_all(response.as_bytes()).await?;
    let _ = write_half.shutdown().await;
    Ok(())
}

/// Run one decoded call through the dispatcher, mapping every failure mode
/// to a protocol-level fault so nothing is silently swallowed.
async fn execute(
    body: &str,
    protocol: RpcProtocol,
    dispatcher: &Arc<dyn Dispatcher>,
) -> Result<String> {
    match protocol {
        RpcProtocol::XmlRpc => {
            let command = match windlass_common::xmlrpc::decode_call(body) {
                Ok(command) => command,
                Err(e) => return windlass_common::xmlrpc::encode_fault(-1, &e.to_string()),
            };
            trace!("dispatching {}", command);
            match dispatcher.dispatch(command).await {
                Ok(result) => windlass_common::xmlrpc::encode_response(&result),
                Err(Error::RpcFault { code, message }) => {
                    windlass_common::xmlrpc::encode_fault(code, &message)
                }
                Err(e) => windlass_common::xmlrpc::encode_fault(-1, &e.to_string()),
            }
        }
        RpcProtocol::JsonRpc => {
            let id = windlass_common::jsonrpc::call_id(body);
            let command = match windlass_common::jsonrpc::decode_call(body) {
                Ok(command) => command,
                Err(e) => return windlass_common::jsonrpc::encode_fault(-1, &e.to_string(), id),
            };
            trace!("dispatching {}", command);
            match dispatcher.dispatch(command).await {
                Ok(result) => windlass_common::jsonrpc::encode_response(&result, id),
                Err(Error::RpcFault { code, message }) => {
                    windlass_common::jsonrpc::encode_fault(code, &message, id)
                }
                Err(e) => windlass_common::jsonrpc::encode_fault(-1, &e.to_string(), id),
            }
        }
    }
}

async fn respond_status(
    write_half: &mut OwnedWriteHalf,
    version: &str,
    status: &str,
) -> Result<()> {
    write_half
        .write_all(format!("{} {}\r\nContent-Length: 0\r\n\r\n", version, status).as_bytes())
        .await?;
    let _ = write_half.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(method: &str, target: &str) -> RequestHead {
        RequestHead {
            method: method.to_string(),
            target: target.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: vec![("Host".to_string(), "test.example".to_string())],
        }
    }

    #[test]
    fn test_local_endpoint_matching() {
        let settings = Settings::default();

        let h = head("POST", "http://test.example/windlass-xmlrpc/");
        assert_eq!(local_rpc_endpoint(&h, &settings), Some(RpcProtocol::XmlRpc));

        let h = head("POST", "/windlass-jsonrpc/");
        assert_eq!(local_rpc_endpoint(&h, &settings), Some(RpcProtocol::JsonRpc));

        let h = head("POST", "http://test.example/other/");
        assert_eq!(local_rpc_endpoint(&h, &settings), None);

        // Upstream paths nested under a prefix are not intercepted
        let h = head("POST", "http://test.example/foo/windlass-xmlrpc/");
        assert_eq!(local_rpc_endpoint(&h, &settings), None);
        let h = head("POST", "/app/windlass-jsonrpc/");
        assert_eq!(local_rpc_endpoint(&h, &settings), None);

        // Only POST reaches the dispatcher
        let h = head("GET", "http://test.example/windlass-xmlrpc/");
        assert_eq!(local_rpc_endpoint(&h, &settings), None);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut h = head("POST", "/windlass-jsonrpc/");
        h.headers.push(("Content-Length".to_string(), "42".to_string()));
        assert_eq!(h.header("content-length"), Some("42"));
        assert_eq!(h.content_length(), 42);
    }
}

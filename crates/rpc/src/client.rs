//! RPC client for the command bridge
//!
//! One logical call interface over two interchangeable wire protocols. The
//! protocol is chosen once at construction from settings and never changes
//! mid-run. The HTTP transport itself is a client of the transport proxy:
//! the proxy address is installed on the `reqwest` client, while the
//! endpoint path stays a property of the test server URL. The two are
//! deliberately independent knobs.

use std::time::Duration;
use tracing::{debug, trace};

use windlass_common::{jsonrpc, xmlrpc, Command, CommandResult, Error, Result, RpcProtocol, Settings};

/// Client for issuing commands to the in-browser dispatcher
pub struct RpcClient {
    protocol: RpcProtocol,
    endpoint: String,
    http: reqwest::Client,
    call_timeout: Duration,
    wait_grace: Duration,
}

impl RpcClient {
    /// Build a client from settings
    pub fn new(settings: &Settings) -> Result<Self> {
        let call_timeout = Duration::from_millis(settings.timeouts.rpc_call_ms);

        let mut builder = reqwest::Client::builder().timeout(call_timeout);
        if let Some(proxy_url) = &settings.rpc.proxy_addr {
            debug!("routing RPC transport through proxy {}", proxy_url);
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| Error::InvalidConfig(format!("bad proxy address: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let http = builder
            .build()
            .map_err(|e| Error::InvalidConfig(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            protocol: settings.rpc.protocol,
            endpoint: settings.rpc_endpoint(),
            http,
            call_timeout,
            wait_grace: Duration::from_millis(settings.timeouts.wait_grace_ms),
        })
    }

    /// The wire protocol this client speaks
    pub fn protocol(&self) -> RpcProtocol {
        self.protocol
    }

    /// Issue one command and wait for its terminal result.
    ///
    /// Wait-bearing commands get an outer transport bound of their own
    /// timeout plus a grace period, so a hung dispatcher resolves as
    /// `Error::Timeout` shortly after the command's own bound instead of
    /// hanging the run.
    pub async fn call(&self, command: &Command) -> Result<CommandResult> {
        let bound = match command.wait_timeout_ms() {
            Some(wait_ms) => Duration::from_millis(wait_ms) + self.wait_grace,
            None => self.call_timeout,
        };
        self.call_bounded(command, bound).await
    }

    /// Issue one command with an explicit transport bound
    pub async fn call_bounded(&self, command: &Command, bound: Duration) -> Result<CommandResult> {
        trace!("call {} over {} (bound {:?})", command, self.protocol, bound);

        let (body, content_type) = match self.protocol {
            RpcProtocol::XmlRpc => (xmlrpc::encode_call(command)?, "text/xml"),
            RpcProtocol::JsonRpc => (jsonrpc::encode_call(command)?, "application/json"),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", content_type)
            .body(body)
            .timeout(bound)
            .send()
            .await
            .map_err(|e| map_transport_error(e, bound))?;

        let status = response.status();
        let payload = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, bound))?;

        if !status.is_success() {
            return Err(Error::Transport(format!(
                "endpoint {} answered {}",
                self.endpoint, status
            )));
        }

        let result = match self.protocol {
            RpcProtocol::XmlRpc => xmlrpc::decode_response(&payload)?,
            RpcProtocol::JsonRpc => jsonrpc::decode_response(&payload)?,
        };

        trace!("{} -> {:?}", command.method, result.result);
        Ok(result)
    }
}

fn map_transport_error(e: reqwest::Error, bound: Duration) -> Error {
    if e.is_timeout() {
        Error::Timeout {
            ms: bound.as_millis() as u64,
        }
    } else {
        Error::Transport(e.to_string())
    }
}

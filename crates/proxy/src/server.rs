//! Transport proxy server
//!
//! Binds the configured port, accepts browser connections, and services
//! each one on its own task. The browser is configured with this address as
//! its sole HTTP/HTTPS proxy.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use windlass_common::{Error, Result, Settings};

use crate::dispatch::Dispatcher;
use crate::http::{handle_connection, ProxyContext};

/// A bound, not yet running proxy
pub struct ProxyServer {
    listener: TcpListener,
    ctx: Arc<ProxyContext>,
}

impl ProxyServer {
    /// Bind the proxy port from settings. Fails fast when the port is
    /// unavailable; that is fatal to the run.
    pub async fn bind(settings: Arc<Settings>) -> Result<Self> {
        let port = settings.proxy_port;
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| Error::Bind {
                port,
                reason: e.to_string(),
            })?;

        info!("transport proxy listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            ctx: Arc::new(ProxyContext {
                settings,
                dispatcher: None,
            }),
        })
    }

    /// Install a dispatcher for the local RPC endpoints. Without one, RPC
    /// paths are forwarded upstream like any other request.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.ctx = Arc::new(ProxyContext {
            settings: self.ctx.settings.clone(),
            dispatcher: Some(dispatcher),
        });
        self
    }

    /// Address the listener actually bound (relevant with port 0 in tests)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the shutdown signal flips, then close every
    /// connection still in flight.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("accepted connection from {}", peer);
                            let ctx = self.ctx.clone();
                            connections.spawn(async move {
                                if let Err(e) = handle_connection(stream, ctx).await {
                                    // Connection-level errors never escape the proxy
                                    debug!("connection from {} ended with error: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("accept failed: {}", e);
                        }
                    }
                }
                // Reap finished connection tasks so the set stays bounded
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("transport proxy shutting down");
                        break;
                    }
                }
            }
        }
        // Teardown closes live tunnels; their sockets drop with the tasks
        connections.shutdown().await;
        Ok(())
    }

    /// Spawn the accept loop and hand back a handle for shutdown
    pub fn spawn(self) -> Result<ProxyHandle> {
        let addr = self.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        Ok(ProxyHandle {
            addr,
            shutdown_tx,
            task,
        })
    }
}

/// Handle to a running proxy
pub struct ProxyHandle {
    addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl ProxyHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Proxy URL for HTTP clients
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Signal shutdown and wait for the accept loop to stop. In-flight
    /// tunnels are closed before this resolves.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Internal(format!("proxy task panicked: {}", e))),
        }
    }
}

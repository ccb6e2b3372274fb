//! Windlass Transport Proxy
//!
//! A local forward proxy the browser under test is pointed at. It relays
//! CONNECT tunnels blindly, rewrites and forwards plain HTTP requests, and
//! can answer the RPC endpoints on its own origin when a dispatcher is
//! installed. Each accepted connection runs on its own task, so one stalled
//! upstream never blocks the others, and idle tunnels are torn down after a
//! bounded timeout.

pub mod dispatch;
pub mod http;
pub mod server;
pub mod tunnel;

pub use dispatch::Dispatcher;
pub use server::{ProxyHandle, ProxyServer};
pub use tunnel::RelayStats;

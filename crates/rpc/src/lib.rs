//! Windlass RPC Client
//!
//! `call(method, params) -> CommandResult` over XML-RPC or JSON-RPC, routed
//! through the transport proxy. Protocol choice is a deployment decision
//! made once at startup; test authors never see the wire format.

pub mod client;

pub use client::RpcClient;

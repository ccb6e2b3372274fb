//! Windlass Common Library
//!
//! Shared settings, error taxonomy, command/result protocol types, and the
//! two wire codecs (XML-RPC and JSON-RPC) used by the transport proxy, the
//! RPC client, and the test runner.

pub mod error;
pub mod jsonrpc;
pub mod protocol;
pub mod settings;
pub mod xmlrpc;

// Re-export commonly used types
pub use error::{Error, Result};
pub use protocol::{Command, CommandResult, Locator};
pub use settings::{RpcProtocol, Settings};

/// Windlass version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Dispatcher contract for locally served RPC endpoints
//!
//! The production dispatcher lives inside the browser and is reached through
//! its RPC contract; the proxy only needs something that turns a decoded
//! `Command` into a `CommandResult`. Test doubles implement this trait
//! in-process.

use async_trait::async_trait;
use windlass_common::{Command, CommandResult, Result};

/// Executes one UI command and returns its structured result.
///
/// Implementations must return `Error::RpcFault` for application-level
/// failures they want surfaced as faults; a falsy `CommandResult` is the
/// normal way to report "the action did not succeed".
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, command: Command) -> Result<CommandResult>;
}

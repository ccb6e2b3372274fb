//! Error types for Windlass

use thiserror::Error;

/// Result type alias using Windlass Error
pub type Result<T> = std::result::Result<T, Error>;

/// Windlass error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cannot bind proxy port {port}: {reason}")]
    Bind { port: u16, reason: String },

    #[error("Upstream connect failed for {authority}: {reason}")]
    UpstreamConnect { authority: String, reason: String },

    #[error("RPC fault {code}: {message}")]
    RpcFault { code: i64, message: String },

    #[error("Malformed {protocol} response: {reason}")]
    MalformedResponse { protocol: String, reason: String },

    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Suite error: {0}")]
    Suite(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Malformed-response helper used by both wire codecs
    pub fn malformed(protocol: &str, reason: impl Into<String>) -> Self {
        Error::MalformedResponse {
            protocol: protocol.to_string(),
            reason: reason.into(),
        }
    }

    /// True for the error classes the runner records as a test failure
    /// rather than aborting the run.
    pub fn is_command_failure(&self) -> bool {
        matches!(
            self,
            Error::RpcFault { .. }
                | Error::Timeout { .. }
                | Error::MalformedResponse { .. }
                | Error::Transport(_)
        )
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::InvalidConfig(format!("invalid URL: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failure_classification() {
        assert!(Error::RpcFault {
            code: 100,
            message: "boom".into()
        }
        .is_command_failure());
        assert!(Error::Timeout { ms: 1000 }.is_command_failure());
        assert!(Error::malformed("jsonrpc", "truncated").is_command_failure());
        assert!(!Error::Bind {
            port: 4444,
            reason: "in use".into()
        }
        .is_command_failure());
        assert!(!Error::InvalidConfig("bad port".into()).is_command_failure());
    }
}

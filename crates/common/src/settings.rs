//! Run settings
//!
//! Built once at startup from a TOML file plus CLI overrides, then treated
//! as read-only by every component.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Process-wide settings for one test run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Proxy listen port; the browser is configured to use
    /// localhost:<port> as its sole HTTP/HTTPS proxy
    pub proxy_port: u16,

    /// Base URL of the application under test
    pub test_url: String,

    /// RPC configuration
    pub rpc: RpcSettings,

    /// Timeout configuration
    pub timeouts: TimeoutSettings,

    /// Keep running remaining steps after a failed one
    pub continue_on_failure: bool,

    /// Exit the process once all suites have run
    pub exit_on_done: bool,

    /// Browser configuration, consumed by the process-lifecycle collaborator
    pub browser: BrowserSettings,

    /// Suite file or directory to run at startup
    pub suite_path: Option<PathBuf>,

    /// Directory for run reports
    pub report_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            proxy_port: 4444,
            test_url: "http://localhost:8000".to_string(),
            rpc: RpcSettings::default(),
            timeouts: TimeoutSettings::default(),
            continue_on_failure: false,
            exit_on_done: false,
            browser: BrowserSettings::default(),
            suite_path: None,
            report_dir: PathBuf::from("test-results"),
        }
    }
}

/// RPC endpoint and protocol selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSettings {
    /// Wire protocol for the command bridge
    pub protocol: RpcProtocol,

    /// Endpoint namespace; the server paths are
    /// /<namespace>-xmlrpc/ and /<namespace>-jsonrpc/
    pub namespace: String,

    /// Proxy address the RPC transport routes through, independent from
    /// the endpoint path. None means a direct connection; the CLI fills
    /// this in with the run's own transport proxy before starting.
    pub proxy_addr: Option<String>,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            protocol: RpcProtocol::JsonRpc,
            namespace: "windlass".to_string(),
            proxy_addr: None,
        }
    }
}

/// Wire protocol choice, made once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RpcProtocol {
    XmlRpc,
    JsonRpc,
}

impl std::fmt::Display for RpcProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcProtocol::XmlRpc => write!(f, "xmlrpc"),
            RpcProtocol::JsonRpc => write!(f, "jsonrpc"),
        }
    }
}

/// Timeout bounds, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Default bound for wait-style commands
    pub default_wait_ms: u64,

    /// Bound on a single RPC transport call
    pub rpc_call_ms: u64,

    /// Grace added on top of a wait command's own bound before the
    /// client gives up on the transport
    pub wait_grace_ms: u64,

    /// Idle bound after which a proxy tunnel is torn down
    pub tunnel_idle_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            default_wait_ms: 20_000,
            rpc_call_ms: 30_000,
            wait_grace_ms: 2_000,
            tunnel_idle_ms: 60_000,
        }
    }
}

/// Browser selection, passed through to the launcher collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    /// Browser to drive (firefox, chrome, safari, ie)
    pub kind: String,

    /// Profile directory; None means a fresh temporary profile
    pub profile_dir: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            kind: "firefox".to_string(),
            profile_dir: None,
        }
    }
}

impl Settings {
    /// Load settings from file, falling back to defaults when absent
    pub fn load(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let settings: Self = toml::from_str(&content)
                .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
            settings.validate()?;
            Ok(settings)
        } else {
            Ok(Self::default())
        }
    }

    /// Save settings to file
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject configurations that cannot produce a working run
    pub fn validate(&self) -> Result<()> {
        if self.proxy_port == 0 {
            return Err(Error::InvalidConfig("proxy_port must be non-zero".into()));
        }
        url::Url::parse(&self.test_url)?;
        if self.rpc.namespace.is_empty() {
            return Err(Error::InvalidConfig("rpc.namespace must not be empty".into()));
        }
        Ok(())
    }

    /// Proxy address in host:port form
    pub fn proxy_authority(&self) -> String {
        format!("127.0.0.1:{}", self.proxy_port)
    }

    /// Proxy address as a URL, for HTTP clients
    pub fn proxy_url(&self) -> String {
        self.rpc
            .proxy_addr
            .clone()
            .unwrap_or_else(|| format!("http://127.0.0.1:{}", self.proxy_port))
    }

    /// XML-RPC endpoint on the test server
    pub fn xmlrpc_endpoint(&self) -> String {
        format!(
            "{}/{}-xmlrpc/",
            self.test_url.trim_end_matches('/'),
            self.rpc.namespace
        )
    }

    /// JSON-RPC endpoint on the test server
    pub fn jsonrpc_endpoint(&self) -> String {
        format!(
            "{}/{}-jsonrpc/",
            self.test_url.trim_end_matches('/'),
            self.rpc.namespace
        )
    }

    /// Endpoint for the configured protocol
    pub fn rpc_endpoint(&self) -> String {
        match self.rpc.protocol {
            RpcProtocol::XmlRpc => self.xmlrpc_endpoint(),
            RpcProtocol::JsonRpc => self.jsonrpc_endpoint(),
        }
    }
}

//! Command and result types for the remote command bridge
//!
//! A `Command` is one RPC invocation against the in-browser dispatcher; a
//! `CommandResult` is the structured `{result: ..., ...}` envelope it returns.
//! The dispatcher's DOM semantics are an external contract; these types only
//! guarantee faithful marshaling.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single RPC invocation: method name plus named parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub method: String,
    pub params: Map<String, Value>,
}

impl Command {
    /// Create a command with no parameters
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: Map::new(),
        }
    }

    /// Add a named parameter
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// `open(url)` - navigate the browser to a URL
    pub fn open(url: impl Into<String>) -> Self {
        Self::new("open").param("url", url.into())
    }

    /// `click(<locator>)` - click the element the locator resolves to
    pub fn click(locator: &Locator) -> Self {
        let mut cmd = Self::new("click");
        let (key, value) = locator.as_param();
        cmd.params.insert(key.to_string(), Value::String(value.to_string()));
        cmd
    }

    /// `waits.forPageLoad(timeout)` - block until the page finishes loading
    pub fn wait_for_page_load(timeout_ms: u64) -> Self {
        Self::new("waits.forPageLoad").param("timeout", timeout_ms.to_string())
    }

    /// `waits.forElement(<locator>, timeout)` - block until the element exists
    pub fn wait_for_element(locator: &Locator, timeout_ms: u64) -> Self {
        let mut cmd = Self::new("waits.forElement").param("timeout", timeout_ms.to_string());
        let (key, value) = locator.as_param();
        cmd.params.insert(key.to_string(), Value::String(value.to_string()));
        cmd
    }

    /// Wait bound carried by this command, if it is a wait-style command.
    /// The dispatcher contract passes timeouts as millisecond strings.
    pub fn wait_timeout_ms(&self) -> Option<u64> {
        if !self.method.starts_with("waits.") {
            return None;
        }
        match self.params.get("timeout") {
            Some(Value::String(s)) => s.parse().ok(),
            Some(Value::Number(n)) => n.as_u64(),
            _ => None,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{}({})", self.method, params.join(", "))
    }
}

/// Element lookup strategy for click/wait commands.
///
/// Exactly one strategy per locator, matching the dispatcher's
/// `click(value|classname|name|id|jsid|tagname=...)` vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locator {
    Id(String),
    Name(String),
    Value(String),
    Classname(String),
    Tagname(String),
    Jsid(String),
}

impl Locator {
    /// Parameter key/value this locator marshals to
    pub fn as_param(&self) -> (&'static str, &str) {
        match self {
            Locator::Id(v) => ("id", v),
            Locator::Name(v) => ("name", v),
            Locator::Value(v) => ("value", v),
            Locator::Classname(v) => ("classname", v),
            Locator::Tagname(v) => ("tagname", v),
            Locator::Jsid(v) => ("jsid", v),
        }
    }

    /// Build a locator from a key/value pair
    pub fn from_pair(key: &str, value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        match key {
            "id" => Ok(Locator::Id(value)),
            "name" => Ok(Locator::Name(value)),
            "value" => Ok(Locator::Value(value)),
            "classname" => Ok(Locator::Classname(value)),
            "tagname" => Ok(Locator::Tagname(value)),
            "jsid" => Ok(Locator::Jsid(value)),
            other => Err(Error::InvalidLocator(format!(
                "unknown lookup strategy: {}",
                other
            ))),
        }
    }
}

/// Structured response envelope for one command.
///
/// The `result` member decides pass/fail; any extra members the dispatcher
/// returns are preserved for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub result: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CommandResult {
    /// Wrap a bare value in the result envelope
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut map) if map.contains_key("result") => {
                let result = map.remove("result").unwrap_or(Value::Null);
                Self { result, extra: map }
            }
            other => Self {
                result: other,
                extra: Map::new(),
            },
        }
    }

    /// Convenience constructor for boolean outcomes
    pub fn of_bool(pass: bool) -> Self {
        Self {
            result: Value::Bool(pass),
            extra: Map::new(),
        }
    }

    /// Truthiness of the result member, the runner's pass criterion
    pub fn is_pass(&self) -> bool {
        match &self.result {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Value::String(s) => !s.is_empty() && s != "false",
            Value::Array(a) => !a.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// Full envelope as a JSON object, `result` member included
    pub fn to_value(&self) -> Value {
        let mut map = self.extra.clone();
        map.insert("result".to_string(), self.result.clone());
        Value::Object(map)
    }
}

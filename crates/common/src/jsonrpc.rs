//! JSON-RPC envelope codec
//!
//! The lighter-weight twin of the XML-RPC codec: same method/param
//! semantics, same fault mapping, a serde envelope instead of an XML one.
//! Requests carry the named parameters as a single object argument.

use crate::protocol::{Command, CommandResult};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

const PROTOCOL: &str = "jsonrpc";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Serialize, Deserialize)]
struct JsonRpcRequest {
    method: String,
    params: Vec<Value>,
    id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
    #[serde(default)]
    id: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonRpcError {
    #[serde(default = "default_fault_code")]
    code: i64,
    message: String,
}

fn default_fault_code() -> i64 {
    -1
}

/// Encode a command as a JSON-RPC request
pub fn encode_call(command: &Command) -> Result<String> {
    let request = JsonRpcRequest {
        method: command.method.clone(),
        params: vec![Value::Object(command.params.clone())],
        id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
    };
    serde_json::to_string(&request).map_err(Error::from)
}

/// Decode a JSON-RPC request into a command
pub fn decode_call(body: &str) -> Result<Command> {
    let request: JsonRpcRequest =
        serde_json::from_str(body).map_err(|e| Error::malformed(PROTOCOL, e.to_string()))?;

    let params = match request.params.len() {
        0 => Map::new(),
        1 => match request.params.into_iter().next() {
            Some(Value::Object(map)) => map,
            _ => {
                return Err(Error::malformed(
                    PROTOCOL,
                    "expected a single object of named parameters",
                ))
            }
        },
        _ => {
            return Err(Error::malformed(
                PROTOCOL,
                "expected a single object of named parameters",
            ))
        }
    };

    Ok(Command {
        method: request.method,
        params,
    })
}

/// Encode a successful result envelope as a JSON-RPC response
pub fn encode_response(result: &CommandResult, id: Option<u64>) -> Result<String> {
    let response = JsonRpcResponse {
        result: Some(result.to_value()),
        error: None,
        id,
    };
    serde_json::to_string(&response).map_err(Error::from)
}

/// Encode a protocol-level fault as a JSON-RPC error response
pub fn encode_fault(code: i64, message: &str, id: Option<u64>) -> Result<String> {
    let response = JsonRpcResponse {
        result: None,
        error: Some(JsonRpcError {
            code,
            message: message.to_string(),
        }),
        id,
    };
    serde_json::to_string(&response).map_err(Error::from)
}

/// Request id of a call body, for response correlation
pub fn call_id(body: &str) -> Option<u64> {
    serde_json::from_str::<JsonRpcRequest>(body).ok().map(|r| r.id)
}

/// Decode a JSON-RPC response into a result envelope.
///
/// Errors surface as `Error::RpcFault`, never as a value.
pub fn decode_response(body: &str) -> Result<CommandResult> {
    let response: JsonRpcResponse =
        serde_json::from_str(body).map_err(|e| Error::malformed(PROTOCOL, e.to_string()))?;

    if let Some(error) = response.error {
        return Err(Error::RpcFault {
            code: error.code,
            message: error.message,
        });
    }

    match response.result {
        Some(value) => Ok(CommandResult::from_value(value)),
        None => Err(Error::malformed(PROTOCOL, "neither result nor error present")),
    }
}

//! JSON-RPC envelope types shared by every provider.

use serde::{Deserialize, Serialize};

use crate::error::RpcError;

/// Wire request: `{"method": ..., "params": [...], "id": n}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Vec<serde_json::Value>,
    pub id: u64,
}

/// Wire response: `{"result": ..., "error": ..., "id": n}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    #[serde(default)]
    pub id: serde_json::Value,
}

impl RpcResponse {
    /// Resolve the envelope for the request that carried `expected_id`.
    ///
    /// A non-null `error` always wins; otherwise the echoed id must match
    /// and a missing `result` becomes `null`.
    pub fn into_result(self, expected_id: u64) -> Result<serde_json::Value, RpcError> {
        if let Some(err) = self.error.filter(|e| !e.is_null()) {
            return Err(parse_jsonrpc_error(err));
        }

        if !self.id.is_null() {
            let actual = parse_response_id(&self.id)?;
            if actual != expected_id {
                return Err(RpcError::IdMismatch {
                    expected: expected_id,
                    actual,
                });
            }
        }

        Ok(self.result.unwrap_or(serde_json::Value::Null))
    }
}

/// Parse a JSON-RPC error value into a structured `RpcError`.
///
/// Standard JSON-RPC errors look like `{"code": <int>, "message": <string>}`.
/// If the error value matches that shape, we produce a `ServerError`;
/// otherwise we fall back to `InvalidResponse` with the raw JSON.
pub(crate) fn parse_jsonrpc_error(err: serde_json::Value) -> RpcError {
    #[derive(Deserialize)]
    struct JsonRpcError {
        code: i64,
        message: String,
    }

    match serde_json::from_value::<JsonRpcError>(err.clone()) {
        Ok(parsed) => RpcError::ServerError {
            code: parsed.code,
            message: parsed.message,
        },
        Err(_) => RpcError::InvalidResponse(format!("non-standard JSON-RPC error: {err}")),
    }
}

pub(crate) fn parse_response_id(id: &serde_json::Value) -> Result<u64, RpcError> {
    if let Some(n) = id.as_u64() {
        return Ok(n);
    }

    if let Some(s) = id.as_str() {
        return s
            .parse::<u64>()
            .map_err(|e| RpcError::InvalidResponse(format!("invalid response id string: {e}")));
    }

    Err(RpcError::InvalidResponse(format!("invalid response id: {id}")))
}

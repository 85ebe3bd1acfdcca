//! JSON-RPC 2.0 framing types and the error-code table.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const TIMEOUT: i64 = -32001;
pub const NOT_INITIALIZED: i64 = -32002;
pub const PROVIDER_UNAVAILABLE: i64 = -32003;
pub const NOT_FOUND: i64 = -32004;

/// An inbound message. `id` is absent for notifications.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

impl RpcError {
    pub fn new(code: i64, kind: &str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(ErrorData {
                kind: kind.to_string(),
                field: None,
            }),
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(PARSE_ERROR, "parse_error", message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, "invalid_request", message)
    }
}

impl From<ToolError> for RpcError {
    fn from(err: ToolError) -> Self {
        let kind = err.kind();
        let code = match &err {
            ToolError::InvalidParams { .. } => INVALID_PARAMS,
            ToolError::MethodNotFound(_) => METHOD_NOT_FOUND,
            ToolError::NotInitialized => NOT_INITIALIZED,
            ToolError::NotFound(_) => NOT_FOUND,
            ToolError::Timeout(_) => TIMEOUT,
            ToolError::ProviderUnavailable(_) => PROVIDER_UNAVAILABLE,
            ToolError::Internal(_) => INTERNAL_ERROR,
        };
        let field = match &err {
            ToolError::InvalidParams { field, .. } => field.clone(),
            _ => None,
        };
        if let ToolError::Internal(source) = &err {
            tracing::error!(error = format!("{source:#}"), "internal error");
        }
        Self {
            code,
            message: err.to_string(),
            data: Some(ErrorData {
                kind: kind.to_string(),
                field,
            }),
        }
    }
}

/// An outbound reply. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: impl Into<RpcError>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Decode one line. Malformed input becomes the error response to send back.
pub fn decode(line: &str) -> Result<Request, Response> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| {
            Response::failure(Value::Null, RpcError::parse_error(format!("invalid JSON: {e}")))
        })?;
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    if !value.is_object() {
        return Err(Response::failure(id, RpcError::invalid_request("expected a JSON object")));
    }
    if !matches!(id, Value::Null | Value::Number(_) | Value::String(_)) {
        return Err(Response::failure(
            Value::Null,
            RpcError::invalid_request("id must be a number or a string"),
        ));
    }
    let request: Request = serde_json::from_value(value)
        .map_err(|e| Response::failure(id.clone(), RpcError::invalid_request(e.to_string())))?;
    if request.jsonrpc.as_deref().is_some_and(|v| v != "2.0") {
        return Err(Response::failure(id, RpcError::invalid_request("jsonrpc must be \"2.0\"")));
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_requests_and_notifications() {
        let request = decode(r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#).unwrap();
        assert_eq!(request.id, Some(json!(7)));
        assert!(!request.is_notification());

        let note = decode(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(note.is_notification());
    }

    #[test]
    fn malformed_lines_become_errors() {
        let err = decode("{not json").unwrap_err();
        assert_eq!(err.id, Value::Null);
        assert_eq!(err.error.unwrap().code, PARSE_ERROR);

        let err = decode(r#"{"jsonrpc":"2.0","id":3}"#).unwrap_err();
        assert_eq!(err.id, json!(3));
        assert_eq!(err.error.unwrap().code, INVALID_REQUEST);

        let err = decode("[1,2]").unwrap_err();
        assert_eq!(err.error.unwrap().code, INVALID_REQUEST);

        let err = decode(r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#).unwrap_err();
        assert_eq!(err.error.unwrap().code, INVALID_REQUEST);
    }

    #[test]
    fn tool_errors_map_to_codes() {
        let err = RpcError::from(ToolError::missing("content"));
        assert_eq!(err.code, INVALID_PARAMS);
        let data = err.data.unwrap();
        assert_eq!(data.kind, "invalid_params");
        assert_eq!(data.field.as_deref(), Some("content"));

        assert_eq!(RpcError::from(ToolError::NotInitialized).code, NOT_INITIALIZED);
        assert_eq!(RpcError::from(ToolError::NotFound("x".into())).code, NOT_FOUND);
        assert_eq!(
            RpcError::from(ToolError::Timeout(std::time::Duration::from_secs(1))).code,
            TIMEOUT
        );
    }

    #[test]
    fn internal_errors_hide_their_source() {
        let err = RpcError::from(ToolError::internal(anyhow::anyhow!(
            "disk I/O error at /secret/path"
        )));
        assert_eq!(err.code, INTERNAL_ERROR);
        assert_eq!(err.message, "internal error");
        assert!(!serde_json::to_string(&err).unwrap().contains("secret"));
    }

    #[test]
    fn responses_omit_the_unused_half() {
        let ok = serde_json::to_value(Response::success(json!(1), json!({"a": 1}))).unwrap();
        assert_eq!(ok, json!({"jsonrpc": "2.0", "id": 1, "result": {"a": 1}}));

        let err =
            serde_json::to_value(Response::failure(json!(2), RpcError::invalid_request("bad")))
                .unwrap();
        assert!(err.get("result").is_none());
        assert_eq!(err["error"]["data"]["type"], "invalid_request");
    }
}

//! JSON-RPC 2.0 protocol types for the bridge
//!
//! Implements the JSON-RPC 2.0 message shapes the bridge moves between
//! network clients and the upstream stdio server.
//! Reference: https://www.jsonrpc.org/specification

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Custom deserializer for the result field that preserves null distinction
///
/// JSON-RPC 2.0 allows null as a valid result value. This deserializer ensures
/// that `"result": null` is deserialized as `Some(Value::Null)` rather than `None`,
/// allowing us to distinguish between a missing result field and an explicit null result.
fn deserialize_result<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(Value::deserialize(deserializer)?))
}

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request identifier (string, number, or null)
    /// Used to correlate requests with responses; absent for notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    /// Method name to invoke
    pub method: String,

    /// Method parameters (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request identifier (matches the request)
    pub id: Value,

    /// Result data (present on success)
    /// Note: `"result": null` deserializes to `Some(Value::Null)`, not `None`.
    #[serde(default, deserialize_with = "deserialize_result")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error data (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct JsonRpcError {
    /// Error code (integer)
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 notification
///
/// A notification is a request without an id. No response is expected.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct JsonRpcNotification {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Method name to invoke
    pub method: String,

    /// Method parameters (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 message envelope
///
/// Can be either a request, response, or notification.
/// Used for classifying raw messages off the wire.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        JsonRpcMessage::classify(value).map_err(serde::de::Error::custom)
    }
}

impl JsonRpcMessage {
    /// Classify a raw JSON value into a request, response, or notification
    ///
    /// A message with both `method` and `id` is a request (including
    /// server-initiated requests off the child's stdout); `result`/`error`
    /// without `method` is a response; `method` without `id` is a
    /// notification.
    pub fn classify(value: Value) -> Result<Self, String> {
        if value.get("method").is_some() {
            if value.get("id").is_some() {
                return serde_json::from_value(value)
                    .map(JsonRpcMessage::Request)
                    .map_err(|e| e.to_string());
            }
            return serde_json::from_value(value)
                .map(JsonRpcMessage::Notification)
                .map_err(|e| e.to_string());
        }

        if value.get("result").is_some() || value.get("error").is_some() {
            return serde_json::from_value(value)
                .map(JsonRpcMessage::Response)
                .map_err(|e| e.to_string());
        }

        Err("Invalid JSON-RPC message: must have either 'method' or 'result'/'error'".to_string())
    }
}

// Standard JSON-RPC 2.0 error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

// Bridge-synthesized error codes
pub const REQUEST_TIMEOUT: i32 = -32000;
pub const BLOCKED_BY_POLICY: i32 = -32001;
pub const UPSTREAM_UNAVAILABLE: i32 = -32002;
pub const UPSTREAM_RESTARTED: i32 = -32003;

impl JsonRpcRequest {
    /// Create a new JSON-RPC request
    pub fn new(id: Option<Value>, method: String, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method,
            params,
        }
    }

    /// Create a request with a numeric ID
    pub fn with_id(id: u64, method: String, params: Option<Value>) -> Self {
        Self::new(Some(Value::Number(id.into())), method, params)
    }

    /// Check if this is a notification (no id)
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Check if this response is an error
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl JsonRpcError {
    /// Create a new JSON-RPC error
    pub fn new(code: i32, message: String, data: Option<Value>) -> Self {
        Self {
            code,
            message,
            data,
        }
    }

    /// Create a parse error (-32700)
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(PARSE_ERROR, message.into(), None)
    }

    /// Create an invalid request error (-32600)
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message.into(), None)
    }

    /// Create a method not found error (-32601)
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(
            METHOD_NOT_FOUND,
            format!("Method not found: {}", method.into()),
            None,
        )
    }

    /// Create an internal error (-32603)
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message.into(), None)
    }

    /// Create a request timeout error (-32000)
    pub fn timeout() -> Self {
        Self::new(REQUEST_TIMEOUT, "timeout".to_string(), None)
    }

    /// Create a blocked-by-policy error (-32001)
    pub fn blocked_by_policy(reason: impl Into<String>) -> Self {
        Self::new(
            BLOCKED_BY_POLICY,
            "blocked by policy".to_string(),
            Some(serde_json::json!({ "reason": reason.into() })),
        )
    }

    /// Create an upstream unavailable error (-32002)
    pub fn upstream_unavailable() -> Self {
        Self::new(
            UPSTREAM_UNAVAILABLE,
            "upstream unavailable".to_string(),
            None,
        )
    }

    /// Create an upstream restarted error (-32003)
    pub fn upstream_restarted() -> Self {
        Self::new(UPSTREAM_RESTARTED, "upstream restarted".to_string(), None)
    }

    /// Create a custom error with application-specific code
    pub fn custom(code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self::new(code, message.into(), data)
    }
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC notification
    pub fn new(method: String, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method,
            params,
        }
    }
}

// ===== Catalog entity types =====

/// Tool definition held in the discovery catalog
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct McpTool {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Resource definition held in the discovery catalog
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct McpResource {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Prompt definition held in the discovery catalog
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct McpPrompt {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let req = JsonRpcRequest::with_id(1, "test_method".to_string(), Some(json!({"p": 1})));
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"test_method\""));
    }

    #[test]
    fn test_notification_has_no_id() {
        let req = JsonRpcRequest::new(None, "notify".to_string(), None);
        assert!(req.is_notification());
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn test_response_null_result_preserved() {
        let resp: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        assert_eq!(resp.result, Some(Value::Null));
        assert!(!resp.is_error());
    }

    #[test]
    fn test_message_classification() {
        let msg: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"t","params":{}}"#).unwrap();
        assert!(matches!(msg, JsonRpcMessage::Request(_)));

        let msg: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#).unwrap();
        assert!(matches!(msg, JsonRpcMessage::Response(_)));

        let msg: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notify"}"#).unwrap();
        assert!(matches!(msg, JsonRpcMessage::Notification(_)));
    }

    #[test]
    fn test_server_initiated_request_classifies_as_request() {
        // A message with both method and id coming off the child's stdout
        let msg: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"srv-1","method":"roots/list"}"#)
                .unwrap();
        assert!(matches!(msg, JsonRpcMessage::Request(_)));
    }

    #[test]
    fn test_classification_rejects_empty_object() {
        let res: Result<JsonRpcMessage, _> = serde_json::from_str(r#"{"jsonrpc":"2.0"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_bridge_error_constructors() {
        assert_eq!(JsonRpcError::timeout().code, REQUEST_TIMEOUT);
        assert_eq!(JsonRpcError::upstream_restarted().code, UPSTREAM_RESTARTED);
        assert_eq!(
            JsonRpcError::upstream_unavailable().code,
            UPSTREAM_UNAVAILABLE
        );

        let blocked = JsonRpcError::blocked_by_policy("domain:evil.example");
        assert_eq!(blocked.code, BLOCKED_BY_POLICY);
        assert_eq!(blocked.message, "blocked by policy");
        assert_eq!(blocked.data.unwrap()["reason"], "domain:evil.example");
    }

    #[test]
    fn test_catalog_tool_round_trip() {
        let tool: McpTool = serde_json::from_value(json!({
            "name": "echo",
            "description": "e",
            "inputSchema": {"type": "object"}
        }))
        .unwrap();
        assert_eq!(tool.name, "echo");

        let json = serde_json::to_value(&tool).unwrap();
        assert!(json.get("inputSchema").is_some());
    }
}

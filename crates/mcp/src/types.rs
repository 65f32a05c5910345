//! JSON-RPC 2.0 envelopes and the subset of MCP messages the aggregator speaks.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

// ── JSON-RPC 2.0 ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// A response, or an error. `id` is null when the server could not parse the request.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

// ── MCP lifecycle ───────────────────────────────────────────────────

/// `initialize` parameters. The aggregator only consumes tools, so it
/// advertises no client capabilities.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

impl InitializeParams {
    pub fn for_client(name: &str, version: &str) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: Value::Object(Default::default()),
            client_info: ClientInfo {
                name: name.into(),
                version: version.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub server_info: ServerInfo,
    #[serde(default)]
    pub instructions: Option<String>,
}

impl InitializeResult {
    /// Whether the server advertised the `tools` capability.
    pub fn offers_tools(&self) -> bool {
        self.capabilities.get("tools").is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// A tool exposed by an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

/// Result from `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsListResult {
    pub tools: Vec<McpToolDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCallParams {
    pub name: String,
    pub arguments: Value,
}

/// A content item returned from `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(rename = "resource")]
    Resource { resource: Value },
    /// Content kinds this client does not interpret (audio, resource links, ...).
    #[serde(other)]
    Unsupported,
}

impl ToolContent {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Result from `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCallResult {
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
}

/// MCP protocol version we implement.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

// ── Transport errors ────────────────────────────────────────────────

/// Failures of a single HTTP exchange with an endpoint.
#[derive(Debug, thiserror::Error)]
pub enum McpTransportError {
    /// The endpoint rejected our credentials, even after one refresh.
    #[error("endpoint rejected credentials (www-authenticate: {})", .www_authenticate.as_deref().unwrap_or("none"))]
    Unauthorized { www_authenticate: Option<String> },
    #[error("HTTP {status} for '{method}': {body}")]
    HttpStatus {
        method: String,
        status: u16,
        body: String,
    },
    #[error("JSON-RPC error on '{method}': code={code} message={message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_missing_params() {
        let req = serde_json::to_value(JsonRpcRequest::new(7, "tools/list", None)).unwrap();
        assert_eq!(req, serde_json::json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list"}));
    }

    #[test]
    fn error_response_with_null_id() {
        let json = r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error","data":"x"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert!(resp.id.is_null());
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, -32700);
    }

    #[test]
    fn initialize_result_without_capabilities() {
        let json = r#"{"protocolVersion":"2025-03-26","serverInfo":{"name":"orders"}}"#;
        let result: InitializeResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.server_info.name, "orders");
        assert!(!result.offers_tools());

        let json = r#"{"protocolVersion":"2025-03-26","capabilities":{"tools":{"listChanged":true}},"serverInfo":{"name":"orders","version":"2"}}"#;
        let result: InitializeResult = serde_json::from_str(json).unwrap();
        assert!(result.offers_tools());
    }

    #[test]
    fn test_mcp_tool_def_deserialization() {
        let json = r#"{"name":"read_file","description":"Read a file","inputSchema":{"type":"object","properties":{"path":{"type":"string"}}}}"#;
        let tool: McpToolDef = serde_json::from_str(json).unwrap();
        assert_eq!(tool.name, "read_file");
        assert_eq!(tool.description.as_deref(), Some("Read a file"));
    }

    #[test]
    fn test_tools_call_result_deserialization() {
        let json = r#"{"content":[{"type":"text","text":"hello"}],"isError":false}"#;
        let result: ToolsCallResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.content.len(), 1);
        assert!(!result.is_error);
        match &result.content[0] {
            ToolContent::Text { text } => assert_eq!(text, "hello"),
            _ => panic!("expected text content"),
        }
    }

    #[test]
    fn test_unknown_content_kind_is_tolerated() {
        let json = r#"{"content":[{"type":"audio","data":"x","mimeType":"audio/wav"},{"type":"text","text":"ok"}]}"#;
        let result: ToolsCallResult = serde_json::from_str(json).unwrap();
        assert!(matches!(result.content[0], ToolContent::Unsupported));
        assert_eq!(result.content[1].as_text(), Some("ok"));
    }

    #[test]
    fn test_missing_input_schema_defaults_to_null() {
        let tool: McpToolDef = serde_json::from_str(r#"{"name":"ping"}"#).unwrap();
        assert!(tool.input_schema.is_null());
    }

    #[test]
    fn initialize_params_advertise_no_capabilities() {
        let json = serde_json::to_value(InitializeParams::for_client("toolmesh", "0.1.0")).unwrap();
        assert_eq!(json["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(json["capabilities"], serde_json::json!({}));
        assert_eq!(json["clientInfo"]["name"], "toolmesh");
    }
}

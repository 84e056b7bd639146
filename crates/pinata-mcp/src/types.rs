//! Payloads of the three methods the server answers. Inbound types only
//! derive `Deserialize`, outbound ones only `Serialize`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::PROTOCOL_VERSION_LATEST;

/// `serverInfo` in the `initialize` result.
#[derive(Debug, Clone, Serialize)]
pub struct McpServerInfo {
    pub name: String,
    pub version: String,
}

/// Who is connecting. Only used for logging.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// `initialize` params. Client capabilities are accepted and ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default = "latest_protocol")]
    pub protocol_version: String,
    #[serde(default)]
    pub client_info: ClientInfo,
}

fn latest_protocol() -> String {
    PROTOCOL_VERSION_LATEST.to_string()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: Value,
    pub server_info: McpServerInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// One entry of `tools/list`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListToolsParams {
    /// Accepted for compatibility; the registry fits in one page.
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// `{"type":"text","text":…}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "text")]
pub struct TextContent {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<TextContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    pub is_error: bool,
}

impl CallToolResult {
    /// Successful result: pretty JSON text plus the same value as structured content.
    pub fn json(value: Value) -> Self {
        let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
        Self {
            content: vec![TextContent { text }],
            structured_content: Some(value),
            is_error: false,
        }
    }

    /// In-band tool failure. The protocol call itself still succeeds.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![TextContent {
                text: message.into(),
            }],
            structured_content: None,
            is_error: true,
        }
    }

    /// Text of the first content block, or `""`.
    pub fn text(&self) -> &str {
        self.content.first().map_or("", |c| c.text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_params_tolerate_missing_fields() {
        let p: InitializeParams = serde_json::from_value(serde_json::json!({
            "capabilities": {"roots": {}}
        }))
        .expect("decode");
        assert_eq!(p.protocol_version, PROTOCOL_VERSION_LATEST);
        assert!(p.client_info.name.is_empty());
    }

    #[test]
    fn error_result_is_flagged() {
        let res = CallToolResult::error("boom");
        assert_eq!(res.text(), "boom");

        let v = serde_json::to_value(&res).expect("serialize");
        assert_eq!(v["isError"], true);
        assert_eq!(v["content"], serde_json::json!([{"type": "text", "text": "boom"}]));
        assert!(v.get("structuredContent").is_none());
    }

    #[test]
    fn tool_serializes_input_schema_in_camel_case() {
        let v = serde_json::to_value(Tool {
            name: "t".to_string(),
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
        })
        .expect("serialize");
        assert_eq!(v["inputSchema"]["type"], "object");
        assert!(v.get("description").is_none());
    }
}

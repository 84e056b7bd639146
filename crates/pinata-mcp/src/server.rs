use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::jsonrpc::{
    JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    error_codes,
};
use crate::types::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, ListToolsParams,
    ListToolsResult, McpServerInfo,
};
use crate::{PROTOCOL_VERSION_LATEST, SUPPORTED_PROTOCOL_VERSIONS};

/// Tool registry and dispatcher seam.
///
/// `call_tool` should report tool failures in-band (`CallToolResult::error`);
/// an `Err` here is treated as an internal error of the server itself.
#[async_trait]
pub trait McpHandler: Send + Sync {
    async fn list_tools(&self, params: ListToolsParams) -> anyhow::Result<ListToolsResult>;
    async fn call_tool(&self, params: CallToolParams) -> anyhow::Result<CallToolResult>;
}

#[derive(Debug, Clone)]
pub struct McpServerConfig {
    pub server_info: McpServerInfo,
    pub instructions: Option<String>,
    pub capabilities: Value,
    pub supported_protocol_versions: Vec<String>,
}

impl McpServerConfig {
    pub fn default_for_binary(name: &str, version: &str) -> Self {
        Self {
            server_info: McpServerInfo {
                name: name.to_string(),
                version: version.to_string(),
            },
            instructions: None,
            capabilities: serde_json::json!({
                "tools": {
                    "listChanged": false
                }
            }),
            supported_protocol_versions: SUPPORTED_PROTOCOL_VERSIONS
                .iter()
                .map(|v| v.to_string())
                .collect(),
        }
    }

    /// Text returned as `instructions` in every `initialize` result. Blank
    /// text leaves the field out.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        let text = instructions.into();
        self.instructions = (!text.trim().is_empty()).then_some(text);
        self
    }

    fn negotiate_protocol(&self, requested: &str) -> String {
        if self
            .supported_protocol_versions
            .iter()
            .any(|v| v == requested)
        {
            requested.to_string()
        } else {
            PROTOCOL_VERSION_LATEST.to_string()
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ConnState {
    New,
    InitResponded,
    Ready,
}

/// MCP server connection state machine (lifecycle enforcement + method routing).
///
/// Tool methods are accepted as soon as `initialize` has been answered; the
/// `notifications/initialized` acknowledgement only moves the connection to
/// `Ready` and is not waited for.
pub struct McpConnection {
    cfg: McpServerConfig,
    handler: Arc<dyn McpHandler>,
    state: ConnState,
    protocol_version: Option<String>,
}

impl McpConnection {
    pub fn new(cfg: McpServerConfig, handler: Arc<dyn McpHandler>) -> Self {
        Self {
            cfg,
            handler,
            state: ConnState::New,
            protocol_version: None,
        }
    }

    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// True once `initialize` has been answered successfully.
    pub fn is_initialized(&self) -> bool {
        self.state != ConnState::New
    }

    /// True once the client acknowledged with `notifications/initialized`.
    pub fn is_ready(&self) -> bool {
        self.state == ConnState::Ready
    }

    /// Handle a single JSON-RPC message.
    ///
    /// Returns `Some(response)` for requests, `None` for notifications or ignored messages.
    pub async fn handle_message(&mut self, msg: JsonRpcMessage) -> Option<JsonRpcResponse> {
        match msg {
            JsonRpcMessage::Request(req) => Some(self.handle_request(req).await),
            JsonRpcMessage::Notification(n) => {
                self.handle_notification(n);
                None
            }
            JsonRpcMessage::Response(_) => None,
        }
    }

    fn invalid_request(id: JsonRpcId, message: impl Into<String>) -> JsonRpcResponse {
        JsonRpcResponse::err(
            id,
            JsonRpcError::new(error_codes::INVALID_REQUEST, message),
        )
    }

    fn method_not_found(id: JsonRpcId, method: &str) -> JsonRpcResponse {
        JsonRpcResponse::err(
            id,
            JsonRpcError {
                code: error_codes::METHOD_NOT_FOUND,
                message: "method not found".to_string(),
                data: Some(serde_json::json!({ "method": method })),
            },
        )
    }

    fn invalid_params(id: JsonRpcId, detail: String) -> JsonRpcResponse {
        JsonRpcResponse::err(
            id,
            JsonRpcError {
                code: error_codes::INVALID_PARAMS,
                message: "invalid params".to_string(),
                data: Some(serde_json::json!({ "detail": detail })),
            },
        )
    }

    fn internal_error(id: JsonRpcId, detail: String) -> JsonRpcResponse {
        JsonRpcResponse::err(
            id,
            JsonRpcError {
                code: error_codes::INTERNAL_ERROR,
                message: "internal error".to_string(),
                data: Some(serde_json::json!({ "detail": detail })),
            },
        )
    }

    fn not_initialized(id: JsonRpcId) -> JsonRpcResponse {
        JsonRpcResponse::err(
            id,
            JsonRpcError::new(error_codes::NOT_INITIALIZED, "not initialized"),
        )
    }

    fn result_response<T: Serialize>(id: JsonRpcId, res: anyhow::Result<T>) -> JsonRpcResponse {
        match res.and_then(|r| serde_json::to_value(r).map_err(Into::into)) {
            Ok(v) => JsonRpcResponse::ok(id, v),
            Err(e) => Self::internal_error(id, e.to_string()),
        }
    }

    async fn handle_request(&mut self, req: JsonRpcRequest) -> JsonRpcResponse {
        if req.jsonrpc != "2.0" {
            return Self::invalid_request(req.id, "invalid jsonrpc version");
        }

        match req.method.as_str() {
            "initialize" => self.handle_initialize(req),
            // Allowed in any state.
            "ping" => JsonRpcResponse::ok(req.id, serde_json::json!({})),
            "tools/list" => {
                if !self.is_initialized() {
                    return Self::not_initialized(req.id);
                }
                let params = match req.params {
                    Some(Value::Null) | None => Ok(ListToolsParams::default()),
                    Some(v) => {
                        serde_json::from_value::<ListToolsParams>(v).map_err(|e| e.to_string())
                    }
                };
                let params = match params {
                    Ok(p) => p,
                    Err(e) => return Self::invalid_params(req.id, e),
                };

                let res = self.handler.list_tools(params).await;
                Self::result_response(req.id, res)
            }
            "tools/call" => {
                if !self.is_initialized() {
                    return Self::not_initialized(req.id);
                }
                let Some(v) = req.params else {
                    return Self::invalid_params(req.id, "missing params".to_string());
                };
                let params = match serde_json::from_value::<CallToolParams>(v) {
                    Ok(p) => p,
                    Err(e) => return Self::invalid_params(req.id, e.to_string()),
                };

                debug!(tool = %params.name, "dispatching tool call");
                let res = self.handler.call_tool(params).await;
                Self::result_response(req.id, res)
            }
            other => Self::method_not_found(req.id, other),
        }
    }

    fn handle_initialize(&mut self, req: JsonRpcRequest) -> JsonRpcResponse {
        if self.state != ConnState::New {
            return Self::invalid_request(req.id, "already initialized");
        }

        let params = req.params.unwrap_or_else(|| serde_json::json!({}));
        let init: InitializeParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return Self::invalid_params(req.id, e.to_string()),
        };

        let negotiated = self.cfg.negotiate_protocol(&init.protocol_version);
        debug!(
            client = %init.client_info.name,
            client_version = %init.client_info.version,
            protocol = %negotiated,
            "initialize"
        );
        self.protocol_version = Some(negotiated.clone());
        self.state = ConnState::InitResponded;

        let result = InitializeResult {
            protocol_version: negotiated,
            capabilities: self.cfg.capabilities.clone(),
            server_info: self.cfg.server_info.clone(),
            instructions: self.cfg.instructions.clone(),
        };

        Self::result_response(req.id, Ok(result))
    }

    fn handle_notification(&mut self, n: JsonRpcNotification) {
        if n.jsonrpc != "2.0" {
            return;
        }

        if n.method.as_str() == "notifications/initialized"
            && self.state == ConnState::InitResponded
        {
            self.state = ConnState::Ready;
        }
    }
}

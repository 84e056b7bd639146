//! Model Context Protocol (MCP) primitives used by the Pinata MCP server.
//!
//! This crate covers the parts of the protocol the server actually speaks:
//! - JSON-RPC 2.0 envelopes
//! - the `initialize` / `tools/list` / `tools/call` payloads
//! - a per-connection lifecycle state machine ([`McpConnection`]) that routes
//!   tool methods into an [`McpHandler`]
//! - a tiny SSE codec for the streamable HTTP transport

mod jsonrpc;
mod server;
mod sse;
mod types;

pub use jsonrpc::{
    JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    error_codes,
};
pub use server::{McpConnection, McpHandler, McpServerConfig};
pub use sse::{
    SseEvent, decode_sse_events, encode_sse_event, parse_first_json_message_from_sse,
};
pub use types::{
    CallToolParams, CallToolResult, ClientInfo, InitializeParams, InitializeResult,
    ListToolsParams, ListToolsResult, McpServerInfo, TextContent, Tool,
};

/// Latest protocol version supported by this implementation.
pub const PROTOCOL_VERSION_LATEST: &str = "2025-06-18";

/// Every protocol version the server will echo back during negotiation.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[PROTOCOL_VERSION_LATEST, "2025-03-26", "2024-11-05"];

/// Header carrying the opaque session identifier on the streamable HTTP transport.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

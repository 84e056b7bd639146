//! Decoding of a single inbound JSON-RPC message, shared by both bindings.

use pinata_mcp::{JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcResponse, error_codes};
use serde_json::Value;

/// Parse one message. On failure returns the error response to send back.
pub fn decode_message(text: &str) -> Result<JsonRpcMessage, JsonRpcResponse> {
    let val: Value = serde_json::from_str(text).map_err(|e| {
        error_response(error_codes::PARSE_ERROR, "parse error", Some(e.to_string()))
    })?;

    if val.is_array() {
        return Err(error_response(
            error_codes::INVALID_REQUEST,
            "batching not supported",
            None,
        ));
    }

    serde_json::from_value(val).map_err(|e| {
        error_response(
            error_codes::INVALID_REQUEST,
            "invalid request",
            Some(e.to_string()),
        )
    })
}

fn error_response(code: i64, message: &str, detail: Option<String>) -> JsonRpcResponse {
    JsonRpcResponse::err(
        JsonRpcId::Null,
        JsonRpcError {
            code,
            message: message.to_string(),
            data: detail.map(|d| serde_json::json!({ "detail": d })),
        },
    )
}

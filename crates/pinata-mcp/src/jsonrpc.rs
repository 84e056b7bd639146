use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

/// Error codes used on the wire.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// The client skipped `initialize` and presented no session.
    pub const SESSION_REQUIRED: i64 = -32000;
    /// The presented session id is unknown to this process.
    pub const SESSION_NOT_FOUND: i64 = -32001;
    pub const NOT_INITIALIZED: i64 = -32002;
}

fn default_jsonrpc() -> String {
    "2.0".to_string()
}

/// Request id. Numbers are kept as sent, so `2.5` or `u64::MAX` echo back
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
    Number(Number),
    String(String),
    Null,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    pub id: JsonRpcId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: JsonRpcId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: JsonRpcId,
}

impl JsonRpcResponse {
    pub fn ok(id: JsonRpcId, result: Value) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn err(id: JsonRpcId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// Any single JSON-RPC message.
///
/// Decoding classifies by key presence: `method` with an `id` key is a
/// request, `method` without one is a notification, and `result` or `error`
/// makes a response. An `id` that is not a number, string or null is rejected
/// rather than reinterpreted.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let obj = Map::<String, Value>::deserialize(deserializer)?;
        let has_id = obj.contains_key("id");
        if let Some(id) = obj.get("id")
            && !(id.is_number() || id.is_string() || id.is_null())
        {
            return Err(D::Error::custom("id must be a number, string or null"));
        }

        let val = Value::Object(obj);
        let msg = if val.get("method").is_some() {
            if has_id {
                JsonRpcRequest::deserialize(val).map(Self::Request)
            } else {
                JsonRpcNotification::deserialize(val).map(Self::Notification)
            }
        } else if has_id && (val.get("result").is_some() || val.get("error").is_some()) {
            JsonRpcResponse::deserialize(val).map(Self::Response)
        } else {
            return Err(D::Error::custom("not a request, notification or response"));
        };
        msg.map_err(D::Error::custom)
    }
}

impl JsonRpcMessage {
    /// Method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }

    /// Request id, or `Null` for anything that is not a request.
    pub fn id(&self) -> JsonRpcId {
        match self {
            Self::Request(r) => r.id.clone(),
            Self::Response(r) => r.id.clone(),
            Self::Notification(_) => JsonRpcId::Null,
        }
    }

    pub fn is_initialize_request(&self) -> bool {
        matches!(self, Self::Request(r) if r.method == "initialize")
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, Self::Notification(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_request_notification_and_response() {
        let req: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#)
                .expect("request");
        assert!(matches!(req, JsonRpcMessage::Request(_)));
        assert_eq!(req.id(), JsonRpcId::Number(1.into()));

        let n: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .expect("notification");
        assert!(n.is_notification());
        assert_eq!(n.id(), JsonRpcId::Null);

        let resp: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"a","result":{}}"#).expect("response");
        assert!(matches!(resp, JsonRpcMessage::Response(_)));
    }

    #[test]
    fn missing_jsonrpc_field_defaults_to_2_0() {
        let msg: JsonRpcMessage =
            serde_json::from_str(r#"{"id":7,"method":"initialize","params":{}}"#).expect("decode");
        let JsonRpcMessage::Request(req) = msg else {
            panic!("expected request");
        };
        assert_eq!(req.jsonrpc, "2.0");
        assert_eq!(req.id, JsonRpcId::Number(7.into()));
    }

    #[test]
    fn non_integer_ids_stay_requests() {
        for text in [
            r#"{"jsonrpc":"2.0","id":2.5,"method":"tools/list"}"#,
            r#"{"jsonrpc":"2.0","id":18446744073709551615,"method":"tools/list"}"#,
            r#"{"jsonrpc":"2.0","id":null,"method":"tools/list"}"#,
        ] {
            let msg: JsonRpcMessage = serde_json::from_str(text).expect(text);
            assert!(matches!(msg, JsonRpcMessage::Request(_)), "{text}");
        }

        let msg: JsonRpcMessage =
            serde_json::from_str(r#"{"id":2.5,"method":"tools/list"}"#).expect("decode");
        let echoed = serde_json::to_value(JsonRpcResponse::ok(msg.id(), Value::Null))
            .expect("serialize");
        assert_eq!(echoed["id"], serde_json::json!(2.5));
    }

    #[test]
    fn rejects_structured_ids_and_shapeless_objects() {
        for text in [
            r#"{"jsonrpc":"2.0","id":{"x":1},"method":"initialize"}"#,
            r#"{"jsonrpc":"2.0","id":[1],"method":"tools/list"}"#,
            r#"{"jsonrpc":"2.0","id":true,"method":"tools/list"}"#,
            r#"{"jsonrpc":"2.0","id":1}"#,
            r#"{"jsonrpc":"2.0","method":7}"#,
        ] {
            assert!(serde_json::from_str::<JsonRpcMessage>(text).is_err(), "{text}");
        }
    }

    #[test]
    fn error_response_omits_result() {
        let resp = JsonRpcResponse::err(
            JsonRpcId::String("x".to_string()),
            JsonRpcError::new(error_codes::SESSION_NOT_FOUND, "session not found"),
        );
        let v = serde_json::to_value(&resp).expect("serialize");
        assert!(v.get("result").is_none());
        assert_eq!(v["error"]["code"], -32001);
        assert_eq!(v["id"], "x");
        assert_eq!(v["jsonrpc"], "2.0");
    }
}

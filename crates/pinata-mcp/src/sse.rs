use anyhow::Context as _;

use crate::jsonrpc::JsonRpcResponse;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field; `None` means the default `message` type.
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn is_message(&self) -> bool {
        self.event.as_deref().is_none_or(|e| e == "message")
    }
}

/// Split an SSE body into events. Only `event:` and `data:` fields are kept;
/// an event without data is dropped, as a browser would.
pub fn decode_sse_events(buf: &str) -> Vec<SseEvent> {
    let mut out = Vec::new();
    let mut event: Option<String> = None;
    let mut data: Option<String> = None;

    for raw in buf.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line.is_empty() {
            if let Some(d) = data.take() {
                out.push(SseEvent {
                    event: event.take(),
                    data: d,
                });
            }
            event = None;
            continue;
        }
        if line.starts_with(':') {
            continue;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_string()),
            "data" => match data.as_mut() {
                Some(d) => {
                    d.push('\n');
                    d.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            _ => {}
        }
    }

    // Unterminated trailing event.
    if let Some(d) = data {
        out.push(SseEvent { event, data: d });
    }
    out
}

/// JSON payload of the first `message` event.
pub fn parse_first_json_message_from_sse(body: &str) -> anyhow::Result<serde_json::Value> {
    let events = decode_sse_events(body);
    let first = events
        .iter()
        .find(|e| e.is_message())
        .context("no sse message events")?;
    serde_json::from_str(&first.data).context("parse sse data as json")
}

/// Encode one response as a complete `message` event.
pub fn encode_sse_event(resp: &JsonRpcResponse) -> String {
    let data = serde_json::to_string(resp).unwrap_or_else(|_| "{}".to_string());
    // serde_json never emits raw newlines, so a single data line is enough.
    format!("event: message\ndata: {data}\n\n")
}

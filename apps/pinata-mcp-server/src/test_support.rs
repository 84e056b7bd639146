use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pinata_mcp::{
    CallToolParams, CallToolResult, ListToolsParams, ListToolsResult, McpHandler, Tool,
};

/// Handler with three tools: `echo` returns its arguments, `panic` panics,
/// `slow` sleeps for `ms` milliseconds before answering.
struct StubHandler;

#[async_trait]
impl McpHandler for StubHandler {
    async fn list_tools(&self, _params: ListToolsParams) -> anyhow::Result<ListToolsResult> {
        let tools = ["echo", "panic", "slow"]
            .into_iter()
            .map(|name| Tool {
                name: name.to_string(),
                description: None,
                input_schema: serde_json::json!({"type": "object"}),
            })
            .collect();
        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(&self, params: CallToolParams) -> anyhow::Result<CallToolResult> {
        let args = params.arguments.unwrap_or(serde_json::Value::Null);
        match params.name.as_str() {
            "echo" => Ok(CallToolResult::json(args)),
            "panic" => panic!("stub tool panicked"),
            "slow" => {
                let ms = args.get("ms").and_then(|v| v.as_u64()).unwrap_or(50);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(CallToolResult::json(args))
            }
            other => Ok(CallToolResult::error(format!("unknown tool: {other}"))),
        }
    }
}

pub(crate) fn handler_stub() -> Arc<dyn McpHandler> {
    Arc::new(StubHandler)
}

/// Poll `cond` until it holds, failing the test after two seconds.
pub(crate) async fn wait_until<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

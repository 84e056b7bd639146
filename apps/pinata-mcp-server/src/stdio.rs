use std::sync::Arc;

use pinata_mcp::{JsonRpcResponse, McpConnection, McpHandler, McpServerConfig};
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, AsyncWrite, AsyncWriteExt as _};
use tracing::debug;

use crate::framing::decode_message;

/// Newline-delimited JSON-RPC over a single connection. Returns at EOF.
pub async fn run_stdio<R, W>(
    cfg: McpServerConfig,
    handler: Arc<dyn McpHandler>,
    input: R,
    mut output: W,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut conn = McpConnection::new(cfg, handler);
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let resp = match decode_message(&line) {
            Ok(msg) => conn.handle_message(msg).await,
            Err(resp) => Some(resp),
        };
        if let Some(resp) = resp {
            write_jsonrpc(&mut output, &resp).await?;
        }
    }

    debug!("stdin closed");
    Ok(())
}

async fn write_jsonrpc<W>(out: &mut W, resp: &JsonRpcResponse) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = serde_json::to_string(resp)?;
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(())
}

use super::server::McpServer;
use anyhow::Context;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Line-delimited JSON-RPC loop. Returns when the reader hits EOF or
/// `shutdown` fires.
pub async fn serve_lines<R, W>(
    server: &McpServer,
    reader: R,
    mut writer: W,
    shutdown: Arc<Notify>,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read from MCP client")?,
            _ = shutdown.notified() => {
                info!("MCP stdio transport shutting down");
                break;
            }
        };
        let Some(line) = line else {
            debug!("MCP client closed stdin");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match server.handle_message(&line).await {
            Ok(Some(response)) => response,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "Failed to encode JSON-RPC response");
                continue;
            }
        };
        writer
            .write_all(response.as_bytes())
            .await
            .context("Failed to write MCP response")?;
        writer.write_all(b"\n").await?;
        writer.flush().await.context("Failed to flush MCP response")?;
    }
    Ok(())
}

pub async fn serve_stdio(server: Arc<McpServer>, shutdown: Arc<Notify>) -> anyhow::Result<()> {
    info!("MCP server listening on stdio");
    serve_lines(
        &server,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown,
    )
    .await
}

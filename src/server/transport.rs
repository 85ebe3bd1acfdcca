//! Byte streams the protocol runs over: stdio, or a local Unix socket.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use super::session::serve_connection;
use crate::tools::PalaceTools;

/// Serve a single client on stdin/stdout.
pub async fn serve_stdio(tools: PalaceTools) -> Result<()> {
    info!("serving on stdio");
    serve_connection(tools, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Accept clients on a Unix socket until interrupted. Each connection gets
/// its own session; a `shutdown` closes only that connection.
#[cfg(unix)]
pub async fn serve_socket(tools: PalaceTools, path: &Path) -> Result<()> {
    use tokio::net::UnixListener;

    if path.exists() {
        // left behind by a previous run that did not exit cleanly
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove stale socket {}", path.display()))?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let listener = UnixListener::bind(path)
        .with_context(|| format!("failed to bind socket {}", path.display()))?;
    info!(path = %path.display(), "serving on unix socket");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted.context("failed to accept connection")?;
                let (reader, writer) = stream.into_split();
                let tools = tools.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(tools, reader, writer).await {
                        tracing::warn!(error = %e, "connection ended with error");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, closing socket");
                break;
            }
        }
    }

    let _ = std::fs::remove_file(path);
    Ok(())
}

#[cfg(not(unix))]
pub async fn serve_socket(_tools: PalaceTools, path: &Path) -> Result<()> {
    anyhow::bail!(
        "socket transport is only available on unix (requested {})",
        path.display()
    )
}

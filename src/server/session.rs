//! One client connection: lifecycle state, dispatch, and the writer task.
//!
//! Lines are read in order and dispatched without waiting. `tools/call`
//! runs on its own task so a slow tool never holds up `ping` or other calls;
//! every response goes through a single writer task, so each line on the
//! wire is one complete message.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::protocol::{decode, Request, Response, RpcError};
use crate::error::ToolError;
use crate::tools::{catalog, PalaceTools};

/// Protocol revision advertised when the client does not ask for one.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

const OUTBOX_DEPTH: usize = 64;

/// Longest accepted request line; longer frames are discarded up to the next newline.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Shutdown,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: Option<String>,
    #[serde(default)]
    arguments: Value,
}

pub struct Session {
    state: SessionState,
    tools: PalaceTools,
    deadline: Duration,
    outbox: mpsc::Sender<Response>,
}

impl Session {
    pub fn new(tools: PalaceTools, outbox: mpsc::Sender<Response>) -> Self {
        let deadline = Duration::from_millis(tools.config().server.request_timeout_ms);
        Self {
            state: SessionState::Uninitialized,
            tools,
            deadline,
            outbox,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle one decoded message.
    pub async fn dispatch(&mut self, request: Request) {
        let method = request.method.as_str();
        debug!(method, id = ?request.id, "request");

        if method == "shutdown" {
            info!("shutdown requested");
            self.state = SessionState::Shutdown;
            if let Some(id) = request.id {
                self.send(Response::success(id, json!({}))).await;
            }
            return;
        }

        let Some(id) = request.id.clone() else {
            // Notifications get no reply, whatever the state.
            if !method.starts_with("notifications/") {
                debug!(method, "ignoring unknown notification");
            }
            return;
        };

        if self.state == SessionState::Uninitialized && method != "initialize" {
            self.send(Response::failure(id, ToolError::NotInitialized)).await;
            return;
        }

        match method {
            "initialize" => {
                let response = if self.state == SessionState::Initialized {
                    Response::failure(id, RpcError::invalid_request("already initialized"))
                } else {
                    self.state = SessionState::Initialized;
                    Response::success(id, initialize_result(request.params.as_ref()))
                };
                self.send(response).await;
            }
            "ping" => self.send(Response::success(id, json!({}))).await,
            "tools/list" => self.send(Response::success(id, json!({ "tools": catalog() }))).await,
            "tools/call" => self.call(id, request.params),
            other => {
                let err = ToolError::MethodNotFound(format!("method '{other}'"));
                self.send(Response::failure(id, err)).await;
            }
        }
    }

    fn call(&self, id: Value, params: Option<Value>) {
        let tools = self.tools.clone();
        let outbox = self.outbox.clone();
        let deadline = self.deadline;
        tokio::spawn(async move {
            let response = match run_tool(tools, params, deadline).await {
                Ok(result) => Response::success(id, tool_result(result)),
                Err(err) => Response::failure(id, err),
            };
            if outbox.send(response).await.is_err() {
                debug!("connection closed before tool reply");
            }
        });
    }

    async fn send(&self, response: Response) {
        if self.outbox.send(response).await.is_err() {
            debug!("connection closed before reply");
        }
    }
}

async fn run_tool(
    tools: PalaceTools,
    params: Option<Value>,
    deadline: Duration,
) -> Result<Value, ToolError> {
    let params: CallParams = serde_json::from_value(params.unwrap_or_else(|| json!({})))
        .map_err(|e| ToolError::invalid("params", e.to_string()))?;
    let name = params.name.ok_or_else(|| ToolError::missing("name"))?;

    // A timed-out tool keeps running on its own task; only the reply is dropped.
    let tool = name.clone();
    let work = tokio::spawn(async move { tools.call(&tool, params.arguments).await });
    match tokio::time::timeout(deadline, work).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(ToolError::internal(join)),
        Err(_) => {
            warn!(tool = %name, ?deadline, "tool call timed out");
            Err(ToolError::Timeout(deadline))
        }
    }
}

fn initialize_result(params: Option<&Value>) -> Value {
    let version = params
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str)
        .unwrap_or(PROTOCOL_VERSION);
    json!({
        "protocolVersion": version,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": { "name": "palace", "version": env!("CARGO_PKG_VERSION") },
        "tools": catalog(),
    })
}

/// Tool output as both readable text and structured content.
fn tool_result(value: Value) -> Value {
    let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
    json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": value,
        "isError": false,
    })
}

/// Serve newline-delimited JSON-RPC until EOF or `shutdown`.
pub async fn serve_connection<R, W>(tools: PalaceTools, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbox, inbox) = mpsc::channel(OUTBOX_DEPTH);
    let writer_task = tokio::spawn(write_responses(writer, inbox));

    let mut session = Session::new(tools, outbox);
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        let frame = read_frame(&mut reader, &mut buf)
            .await
            .context("failed to read request")?;
        let bytes = match frame {
            Frame::Eof => break,
            Frame::Oversized => {
                warn!(limit = MAX_FRAME_BYTES, "discarded oversized request");
                let error =
                    RpcError::parse_error(format!("request exceeds {MAX_FRAME_BYTES} bytes"));
                session.send(Response::failure(Value::Null, error)).await;
                continue;
            }
            Frame::Line => &buf,
        };
        let line = match std::str::from_utf8(bytes) {
            Ok(line) => line.trim(),
            Err(e) => {
                let error = RpcError::parse_error(format!("request is not valid UTF-8: {e}"));
                session.send(Response::failure(Value::Null, error)).await;
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        match decode(line) {
            Ok(request) => session.dispatch(request).await,
            Err(response) => session.send(response).await,
        }
        if session.state() == SessionState::Shutdown {
            break;
        }
    }

    // The writer drains once every in-flight call has replied.
    drop(session);
    writer_task.await.context("response writer panicked")??;
    info!("connection closed");
    Ok(())
}

enum Frame {
    Eof,
    /// `buf` holds one line without its terminator.
    Line,
    Oversized,
}

/// Read one newline-terminated frame of at most [`MAX_FRAME_BYTES`] into `buf`.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let read = (&mut *reader)
        .take(MAX_FRAME_BYTES as u64 + 1)
        .read_until(b'\n', buf)
        .await?;
    if read == 0 {
        return Ok(Frame::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        return Ok(Frame::Line);
    }
    if buf.len() <= MAX_FRAME_BYTES {
        // final line without a terminator
        return Ok(Frame::Line);
    }

    buf.clear();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        match available.iter().position(|b| *b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                break;
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
    Ok(Frame::Oversized)
}

async fn write_responses<W>(mut writer: W, mut inbox: mpsc::Receiver<Response>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = inbox.recv().await {
        let mut line = serde_json::to_vec(&response).context("failed to encode response")?;
        line.push(b'\n');
        writer.write_all(&line).await.context("failed to write response")?;
        writer.flush().await?;
    }
    Ok(())
}

//! Line-delimited JSON transport.
//!
//! - Each request is a single line of JSON followed by a newline
//! - Each response is a single line of JSON followed by a newline
//! - Blank lines are ignored
//! - EOF on the reader closes the transport
//!
//! [`StdioTransport`] is this transport over the process's stdin/stdout.
//!
//! ```rust,no_run
//! use taskmaster_mcp::transport::{StdioTransport, Transport};
//! use taskmaster_mcp::protocol::JsonRpcResponse;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut transport = StdioTransport::stdio();
//!
//!     while let Ok(Some(request)) = transport.recv().await {
//!         let response = JsonRpcResponse::success(request.id, json!({}));
//!         transport.send(response).await.unwrap();
//!     }
//! }
//! ```

use async_trait::async_trait;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout, stdin,
    stdout,
};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};

use super::traits::Transport;

/// JSON-RPC over any buffered reader / writer pair, one message per line.
pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
    closed: bool,
}

/// The transport MCP clients use when they launch the server as a child process.
pub type StdioTransport = LineTransport<BufReader<Stdin>, Stdout>;

impl StdioTransport {
    pub fn stdio() -> Self {
        LineTransport::new(BufReader::new(stdin()), stdout())
    }
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send + Sync,
    W: AsyncWrite + Unpin + Send + Sync,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            closed: false,
        }
    }
}

#[async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send + Sync,
    W: AsyncWrite + Unpin + Send + Sync,
{
    async fn recv(&mut self) -> Result<Option<JsonRpcRequest>, TransportError> {
        loop {
            if self.closed {
                return Ok(None);
            }

            let mut line = String::new();
            let read = match self.reader.read_line(&mut line).await {
                Ok(read) => read,
                Err(e) => {
                    self.closed = true;
                    return Err(TransportError::Io(e));
                }
            };

            if read == 0 {
                debug!("Input reached EOF, closing transport");
                self.closed = true;
                return Ok(None);
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            return match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                Ok(request) => Ok(Some(request)),
                Err(e) => {
                    warn!(error = %e, "Failed to parse JSON-RPC request");
                    Err(TransportError::InvalidMessage(e.to_string()))
                }
            };
        }
    }

    async fn send(&mut self, response: JsonRpcResponse) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let json = serde_json::to_string(&response)
            .map_err(|e| TransportError::InvalidMessage(e.to_string()))?;

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        self.writer.flush().await?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

//! Transport trait definitions.
//!
//! A transport yields JSON-RPC requests and carries responses back. The server
//! loop in [`crate::server`] is written against this trait only.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};

/// Bidirectional JSON-RPC message channel.
///
/// # Implementation Notes
///
/// - `recv()` returns `Ok(None)` on EOF or after `close()`
/// - A malformed message is reported as [`TransportError::InvalidMessage`];
///   the transport stays usable and the next `recv()` reads the next message
/// - Any other error is fatal for the connection
/// - `close()` is idempotent
#[async_trait]
pub trait Transport: Send + Sync {
    async fn recv(&mut self) -> Result<Option<JsonRpcRequest>, TransportError>;

    async fn send(&mut self, response: JsonRpcResponse) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;

    fn is_closed(&self) -> bool;
}

//! In-memory transport for driving the server in tests.
//!
//! Queued requests are handed out in FIFO order; once the queue is drained
//! `recv()` reports EOF, so `serve` returns after processing everything.
//!
//! ```rust
//! use taskmaster_mcp::transport::{MockTransport, Transport};
//! use taskmaster_mcp::protocol::{JsonRpcRequest, JsonRpcResponse};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut transport = MockTransport::new();
//!     transport.push_request(JsonRpcRequest::new(Some(json!(1)), "ping".to_string(), None));
//!
//!     let request = transport.recv().await.unwrap().unwrap();
//!     transport.send(JsonRpcResponse::success(request.id, json!({}))).await.unwrap();
//!
//!     assert_eq!(transport.responses().len(), 1);
//! }
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::TransportError;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};

use super::traits::Transport;

enum Inbound {
    Request(JsonRpcRequest),
    Malformed(String),
}

/// Cloneable handle: keep one clone to inspect responses after the server
/// consumed the other.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
}

#[derive(Default)]
struct MockTransportState {
    inbound: VecDeque<Inbound>,
    responses: Vec<JsonRpcResponse>,
    closed: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_request(&self, request: JsonRpcRequest) {
        self.state.lock().inbound.push_back(Inbound::Request(request));
    }

    /// Queue a line that failed to parse.
    pub fn push_malformed(&self, details: impl Into<String>) {
        self.state
            .lock()
            .inbound
            .push_back(Inbound::Malformed(details.into()));
    }

    pub fn responses(&self) -> Vec<JsonRpcResponse> {
        self.state.lock().responses.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().inbound.len()
    }

    pub fn response_count(&self) -> usize {
        self.state.lock().responses.len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn recv(&mut self) -> Result<Option<JsonRpcRequest>, TransportError> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(None);
        }

        match state.inbound.pop_front() {
            Some(Inbound::Request(request)) => Ok(Some(request)),
            Some(Inbound::Malformed(details)) => Err(TransportError::InvalidMessage(details)),
            None => {
                state.closed = true;
                Ok(None)
            }
        }
    }

    async fn send(&mut self, response: JsonRpcResponse) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.responses.push(response);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state.lock().closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

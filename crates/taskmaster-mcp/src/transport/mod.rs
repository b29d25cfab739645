//! Transport layer.
//!
//! - [`LineTransport`] / [`StdioTransport`]: line-delimited JSON over any
//!   reader/writer pair, or over stdin/stdout
//! - [`MockTransport`]: in-memory queue for tests

pub mod line;
pub mod mock;
pub mod traits;

pub use line::{LineTransport, StdioTransport};
pub use mock::MockTransport;
pub use traits::Transport;

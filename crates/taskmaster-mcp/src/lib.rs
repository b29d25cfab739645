//! # Task Master MCP
//!
//! MCP server exposing a project task list to AI assistants over stdio.
//!
//! Fast tools (listing, editing, dependency checks) answer inline.
//! Long-running tools (PRD parsing, task expansion, complexity analysis) are
//! submitted to an [`async_ops::AsyncOperationManager`] and answer with an
//! operation id; clients poll it with `getOperationStatus`.
//!
//! ## Modules
//!
//! - [`server`]: request routing and the serve loop
//! - [`tools`]: the Task Master tools
//! - [`shim`]: adapter turning long-running tools into submissions
//! - [`tasks`]: task model, dependency checks and the task store
//! - [`generation`]: the task generation boundary
//! - [`tool`], [`protocol`], [`transport`]: MCP plumbing
//! - [`config`], [`logging`]: process setup

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod generation;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod shim;
pub mod tasks;
pub mod tool;
pub mod tools;
pub mod transport;

pub use config::AppConfig;
pub use error::{McpError, Result, ToolError};
pub use generation::{HeuristicGenerator, TaskGenerator};
pub use server::{Services, TaskMasterServer};
pub use tasks::TaskStore;

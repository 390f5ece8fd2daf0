//! MCP server implementation.
//!
//! This module provides the MCP server that handles tool calls from AI agents:
//! the tool catalogue and argument validation, the dispatcher, and the stdio
//! transport glue.

mod dispatch;
mod handler;
mod response;
pub mod tools;

pub use dispatch::Dispatcher;
pub use handler::{SandboxServer, run};
pub use response::{error_response, success_response};
pub use tools::{ToolCall, ToolKind};

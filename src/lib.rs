//! E2B MCP Server - cloud sandboxes as MCP tools.
//!
//! This crate exposes E2B sandboxes to AI agents over the Model Context
//! Protocol. Agents create sandboxes, run shell commands and Python code in
//! them, move files in and out, and expose sandbox ports, all through ten tools
//! served on stdio.
//!
//! # Architecture
//!
//! - [`provider`]: the sandbox backend seam (E2B cloud, or in-memory)
//! - [`registry`]: bounded table of live sandboxes, torn down on shutdown
//! - [`server`]: tool catalogue, argument validation, dispatch and transport
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use e2b_mcp_server::config::SandboxLimits;
//! use e2b_mcp_server::provider::e2b::{E2bConfig, E2bProvider};
//! use e2b_mcp_server::registry::SandboxRegistry;
//! use e2b_mcp_server::server;
//!
//! #[tokio::main]
//! async fn main() -> miette::Result<()> {
//!     let provider = E2bProvider::new(E2bConfig::new("e2b_api_key"))?;
//!     let registry = Arc::new(SandboxRegistry::new(Arc::new(provider), SandboxLimits::default()));
//!
//!     // Serve until the client disconnects, then clean up
//!     server::run(registry).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod provider;
pub mod registry;
pub mod server;

// Re-export commonly used types
pub use config::SandboxLimits;
pub use error::{Error, Result};
pub use registry::SandboxRegistry;

//! Sandbox providers.
//!
//! A provider allocates remote sandboxes; each sandbox exposes command
//! execution, code execution and a filesystem. Nothing here keeps local state
//! about sandbox contents: the provider is authoritative.
//!
//! Two providers ship with the crate:
//!
//! - [`e2b::E2bProvider`]: E2B cloud sandboxes (requires an API key)
//! - [`memory::MemoryProvider`]: in-process sandboxes for tests and offline runs
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use e2b_mcp_server::provider::{SandboxProvider, e2b::{E2bConfig, E2bProvider}};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = E2bProvider::new(E2bConfig::new("e2b_api_key"))?;
//! let sandbox = provider.create(Duration::from_secs(300)).await?;
//!
//! let output = sandbox.run_command("echo hello", false).await?;
//! println!("{output:?}");
//!
//! sandbox.kill().await?;
//! # Ok(())
//! # }
//! ```

pub mod e2b;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ProviderError;

/// Shared handle to a live sandbox.
pub type SandboxRef = Arc<dyn Sandbox>;

/// Output from a command that ran to completion in the sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code from the command (0 typically indicates success).
    pub exit_code: i32,
}

impl CommandOutput {
    /// Returns `true` if the command exited successfully (exit code 0).
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Result of starting a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// The command was started in the background and keeps running.
    Background { pid: u32 },
    /// The command ran to completion.
    Foreground(CommandOutput),
}

/// Kind of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Dir,
}

/// A single entry returned by a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileType,
}

impl EntryInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Error raised by the interpreter while running code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionError {
    pub name: String,
    pub value: String,
    pub traceback: String,
}

/// Logs and results of one code execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Execution {
    /// Chunks written to stdout, in order.
    pub stdout: Vec<String>,
    /// Chunks written to stderr, in order.
    pub stderr: Vec<String>,
    /// Text representation of each displayed result.
    pub results: Vec<String>,
    /// Set if the code raised.
    pub error: Option<ExecutionError>,
}

/// Allocates sandboxes.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Creates a sandbox that the provider expires after `timeout`.
    async fn create(&self, timeout: Duration) -> Result<SandboxRef, ProviderError>;
}

/// A live sandbox owned by the provider.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Identifier assigned by the provider.
    fn id(&self) -> &str;

    /// Runs a shell command, either to completion or in the background.
    async fn run_command(
        &self,
        command: &str,
        background: bool,
    ) -> Result<CommandResult, ProviderError>;

    /// Reads a file as UTF-8 text.
    async fn read_file(&self, path: &str) -> Result<String, ProviderError>;

    /// Writes (creating or replacing) a file.
    async fn write_file(&self, path: &str, contents: &str) -> Result<(), ProviderError>;

    /// Lists the direct children of a directory.
    async fn list_files(&self, path: &str) -> Result<Vec<EntryInfo>, ProviderError>;

    /// Runs code in the sandbox's interpreter.
    async fn run_code(&self, code: &str) -> Result<Execution, ProviderError>;

    /// Public host name routing to `port` inside the sandbox.
    fn host(&self, port: u16) -> String;

    /// URL from which `path` can be downloaded.
    ///
    /// `signature_expiration_secs` limits how long a signed URL stays valid.
    fn download_url(
        &self,
        path: &str,
        signature_expiration_secs: Option<u64>,
    ) -> Result<String, ProviderError>;

    /// Tears the sandbox down.
    async fn kill(&self) -> Result<(), ProviderError>;
}

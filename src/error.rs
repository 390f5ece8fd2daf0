//! Error types for the E2B MCP server.
//!
//! Uses thiserror for deriving std::error::Error and miette for rich diagnostics.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the application.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Invalid configuration
    #[error("Invalid configuration")]
    #[diagnostic(code(e2b_mcp::config))]
    Config(#[from] ConfigError),

    /// MCP server error
    #[error("MCP server error")]
    #[diagnostic(code(e2b_mcp::server))]
    Server(#[from] ServerError),

    /// Sandbox provider error
    #[error("Sandbox provider error")]
    #[diagnostic(code(e2b_mcp::provider))]
    Provider(#[from] ProviderError),

    /// I/O error
    #[error("I/O error: {0}")]
    #[diagnostic(code(e2b_mcp::io))]
    Io(#[from] std::io::Error),
}

/// Errors raised while validating configuration.
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    /// Capacity of zero would reject every create call
    #[error("max_active_sandboxes must be at least 1")]
    #[diagnostic(
        code(e2b_mcp::config::capacity),
        help("Set MAX_ACTIVE_SANDBOXES to a positive number")
    )]
    ZeroCapacity,

    /// Timeout bounds are inconsistent
    #[error("Invalid sandbox timeout bounds: {reason}")]
    #[diagnostic(code(e2b_mcp::config::timeout))]
    InvalidTimeout { reason: String },

    /// A required setting is missing
    #[error("Missing required setting: {name}")]
    #[diagnostic(
        code(e2b_mcp::config::missing),
        help("Set it in the environment or in a .env file")
    )]
    Missing { name: &'static str },
}

/// Errors related to the MCP server.
#[derive(Error, Debug, Diagnostic)]
pub enum ServerError {
    /// Failed to initialize server
    #[error("Failed to initialize MCP server: {0}")]
    #[diagnostic(code(e2b_mcp::server::init))]
    InitializationFailed(String),

    /// Transport error
    #[error("Transport error: {0}")]
    #[diagnostic(code(e2b_mcp::server::transport))]
    Transport(String),
}

/// Errors reported by the external sandbox provider.
#[derive(Error, Debug, Diagnostic)]
pub enum ProviderError {
    /// The provider refused the request for its own reasons (auth, quota, rate limit)
    #[error("Provider rejected the request (HTTP {status}): {message}")]
    #[diagnostic(
        code(e2b_mcp::provider::rejected),
        help("Check the API key, account quota and rate limits")
    )]
    Rejected { status: u16, message: String },

    /// The provider answered with a non-success status
    #[error("Provider returned HTTP {status}: {message}")]
    #[diagnostic(code(e2b_mcp::provider::api))]
    Api { status: u16, message: String },

    /// The request never completed
    #[error("HTTP request failed: {context}")]
    #[diagnostic(code(e2b_mcp::provider::http))]
    Http {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    /// The provider answered with something we could not decode
    #[error("Malformed provider response: {reason}")]
    #[diagnostic(code(e2b_mcp::provider::protocol))]
    Protocol { reason: String },

    /// The operation itself failed inside the sandbox
    #[error("{reason}")]
    #[diagnostic(code(e2b_mcp::provider::failed))]
    Failed { reason: String },
}

impl ProviderError {
    /// Returns true if the provider refused the request rather than failing it.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Classifies an unsuccessful HTTP status.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 | 429 => Self::Rejected { status, message },
            _ => Self::Api { status, message },
        }
    }
}

/// Errors raised by the sandbox registry.
#[derive(Error, Debug, Diagnostic)]
pub enum RegistryError {
    /// No live sandbox with this identifier
    #[error("Sandbox {id} not found")]
    #[diagnostic(
        code(e2b_mcp::registry::not_found),
        help("Use list_sandbox_ids to see the active sandboxes")
    )]
    NotFound { id: String },

    /// The registry is at capacity
    #[error("Maximum number of sandboxes ({max}) reached")]
    #[diagnostic(
        code(e2b_mcp::registry::capacity),
        help("Kill an existing sandbox with kill_sandbox before creating a new one")
    )]
    CapacityExceeded { max: usize },

    /// The provider failed while creating or tearing down a sandbox
    #[error("Failed to {operation}")]
    #[diagnostic(code(e2b_mcp::registry::provider))]
    Provider {
        operation: &'static str,
        #[source]
        source: ProviderError,
    },
}

/// A single argument that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    /// Name of the argument as it appears on the wire.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl FieldViolation {
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Errors returned from tool dispatch.
///
/// These are the only errors that reach the MCP client; the transport turns
/// them into error results carrying `{error, details}`.
#[derive(Error, Debug, Diagnostic)]
pub enum ToolError {
    /// No tool with this name
    #[error("Unknown tool: {name}")]
    #[diagnostic(code(e2b_mcp::tool::unknown))]
    UnknownOperation { name: String },

    /// Arguments failed schema validation
    #[error("Invalid arguments for {tool}")]
    #[diagnostic(code(e2b_mcp::tool::invalid_arguments))]
    InvalidArguments {
        tool: &'static str,
        violations: Vec<FieldViolation>,
    },

    /// No live sandbox with this identifier
    #[error("Sandbox {id} not found")]
    #[diagnostic(code(e2b_mcp::tool::not_found))]
    NotFound { id: String },

    /// The registry is at capacity
    #[error("Maximum number of sandboxes ({max}) reached")]
    #[diagnostic(code(e2b_mcp::tool::capacity))]
    CapacityExceeded { max: usize },

    /// The provider refused the request
    #[error("Sandbox provider rejected {operation}")]
    #[diagnostic(code(e2b_mcp::tool::rejected))]
    ProviderRejected {
        operation: &'static str,
        #[source]
        source: ProviderError,
    },

    /// The provider call failed
    #[error("Failed to {operation}")]
    #[diagnostic(code(e2b_mcp::tool::failed))]
    OperationFailed {
        operation: &'static str,
        #[source]
        source: ProviderError,
    },
}

impl ToolError {
    /// Wraps a provider failure for the named operation.
    #[must_use]
    pub fn provider(operation: &'static str, source: ProviderError) -> Self {
        if source.is_rejection() {
            Self::ProviderRejected { operation, source }
        } else {
            Self::OperationFailed { operation, source }
        }
    }

    /// Extra detail for the error response, if any.
    #[must_use]
    pub fn details(&self) -> Option<String> {
        match self {
            Self::InvalidArguments { violations, .. } => Some(
                violations
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            Self::ProviderRejected { source, .. } | Self::OperationFailed { source, .. } => {
                Some(source.to_string())
            }
            Self::UnknownOperation { .. } | Self::NotFound { .. } | Self::CapacityExceeded { .. } => {
                None
            }
        }
    }
}

impl From<RegistryError> for ToolError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { id } => Self::NotFound { id },
            RegistryError::CapacityExceeded { max } => Self::CapacityExceeded { max },
            RegistryError::Provider { operation, source } => Self::provider(operation, source),
        }
    }
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

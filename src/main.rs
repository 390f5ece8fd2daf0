//! E2B MCP Server - Entry Point
//!
//! This is the main entry point for the MCP server binary.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use e2b_mcp_server::config::{
    DEFAULT_MAX_ACTIVE_SANDBOXES, DEFAULT_SANDBOX_TIMEOUT_MS, MAX_SANDBOX_TIMEOUT_MS,
    SandboxLimits, describe_timeout,
};
use e2b_mcp_server::error::ConfigError;
use e2b_mcp_server::provider::SandboxProvider;
use e2b_mcp_server::provider::e2b::{DEFAULT_DOMAIN, DEFAULT_TEMPLATE, E2bConfig, E2bProvider};
use e2b_mcp_server::provider::memory::MemoryProvider;
use e2b_mcp_server::registry::SandboxRegistry;
use e2b_mcp_server::server;

/// Sandbox backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProviderKind {
    /// E2B cloud sandboxes
    E2b,
    /// In-process sandboxes with no network access (for dry runs)
    Memory,
}

/// E2B MCP Server - cloud sandboxes as tools for AI agents.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Maximum number of sandboxes alive at once
    #[arg(long, env = "MAX_ACTIVE_SANDBOXES", default_value_t = DEFAULT_MAX_ACTIVE_SANDBOXES)]
    max_sandboxes: usize,

    /// Sandbox timeout when create_sandbox does not specify one
    #[arg(long, env = "SANDBOX_DEFAULT_TIMEOUT_MS", default_value_t = DEFAULT_SANDBOX_TIMEOUT_MS)]
    default_timeout_ms: u64,

    /// Upper bound on any requested sandbox timeout
    #[arg(long, env = "SANDBOX_MAX_TIMEOUT_MS", default_value_t = MAX_SANDBOX_TIMEOUT_MS)]
    max_timeout_ms: u64,

    /// Log level when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Sandbox backend
    #[arg(long, env = "SANDBOX_PROVIDER", value_enum, default_value_t = ProviderKind::E2b)]
    provider: ProviderKind,

    /// E2B API key
    #[arg(long, env = "E2B_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// E2B domain
    #[arg(long, env = "E2B_DOMAIN", default_value = DEFAULT_DOMAIN)]
    domain: String,

    /// Sandbox template
    #[arg(long, env = "E2B_TEMPLATE", default_value = DEFAULT_TEMPLATE)]
    template: String,

    /// Timeout for individual E2B HTTP requests, in seconds
    #[arg(long, env = "E2B_REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    request_timeout_secs: u64,
}

impl Args {
    fn limits(&self) -> SandboxLimits {
        SandboxLimits::new()
            .with_max_active_sandboxes(self.max_sandboxes)
            .with_default_timeout_ms(self.default_timeout_ms)
            .with_max_timeout_ms(self.max_timeout_ms)
    }

    fn provider(&self) -> Result<Arc<dyn SandboxProvider>> {
        match self.provider {
            ProviderKind::E2b => {
                let api_key = self
                    .api_key
                    .clone()
                    .filter(|k| !k.is_empty())
                    .ok_or(ConfigError::Missing {
                        name: "E2B_API_KEY",
                    })?;
                let config = E2bConfig::new(api_key)
                    .with_domain(&self.domain)
                    .with_template(&self.template)
                    .with_request_timeout(Duration::from_secs(self.request_timeout_secs));
                config.validate()?;

                info!(domain = %config.domain, template = %config.template, "Using E2B provider");
                Ok(Arc::new(E2bProvider::new(config)?))
            }
            ProviderKind::Memory => {
                warn!("Using in-memory provider. Sandboxes are simulated and nothing runs remotely.");
                Ok(Arc::new(MemoryProvider::new()))
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    // MCP requires that logs go to stderr (stdout is for JSON-RPC)
    let level = if args.verbose {
        Level::DEBUG
    } else {
        args.log_level
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    info!("E2B MCP Server v{}", env!("CARGO_PKG_VERSION"));

    let limits = args.limits();
    limits.validate()?;
    info!(
        "Limits: {} sandboxes, default timeout {}, max timeout {}",
        limits.max_active_sandboxes,
        describe_timeout(limits.default_timeout_ms),
        describe_timeout(limits.max_timeout_ms)
    );

    let provider = args.provider()?;
    let registry = Arc::new(SandboxRegistry::new(provider, limits));

    // Run the MCP server
    server::run(registry).await.into_diagnostic()
}

//! MCP server handler implementation.

use std::sync::Arc;

use rmcp::{
    ErrorData, RoleServer, ServiceExt,
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult,
        PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
    },
    service::RequestContext,
    transport::stdio,
};
use tracing::{debug, info, warn};

use super::dispatch::Dispatcher;
use super::response::{error_response, success_response};
use super::tools::ToolKind;
use crate::error::ServerError;
use crate::registry::{CleanupReport, SandboxRegistry};

/// The MCP server exposing E2B sandbox tools.
#[derive(Clone)]
pub struct SandboxServer {
    dispatcher: Arc<Dispatcher>,
}

impl SandboxServer {
    /// Create a server that dispatches into `registry`.
    #[must_use]
    pub fn new(registry: Arc<SandboxRegistry>) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(registry)),
        }
    }

    /// The dispatcher behind this server.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Every tool this server exposes, with schemas bounded by the registry's limits.
    #[must_use]
    pub fn tools(&self) -> Vec<Tool> {
        let limits = self.dispatcher.registry().limits();
        ToolKind::ALL
            .into_iter()
            .map(|kind| Tool::new(kind.name(), kind.description(), kind.input_schema(limits)))
            .collect()
    }

    /// Runs one tool call and converts the outcome into a tool result.
    ///
    /// Tool failures become error results; they never fail the request.
    pub async fn handle_call(
        &self,
        name: &str,
        arguments: Option<&rmcp::model::JsonObject>,
    ) -> CallToolResult {
        debug!(tool = name, "Tool call received");
        match self.dispatcher.call(name, arguments).await {
            Ok(value) => success_response(&value),
            Err(e) => {
                warn!(tool = name, error = %e, "Tool call failed");
                error_response(&e)
            }
        }
    }
}

impl rmcp::ServerHandler for SandboxServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "E2B sandbox tools: create sandboxes, run commands and Python code, \
                 read and write files, and expose sandbox ports."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(self.tools()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self
            .handle_call(&request.name, request.arguments.as_ref())
            .await)
    }
}

/// Run the MCP server.
///
/// Serves stdio until the client disconnects or Ctrl-C arrives, then tears
/// down every registered sandbox.
///
/// # Errors
///
/// Returns error if server initialization or transport fails. Sandboxes are
/// cleaned up in either case once the transport is up.
pub async fn run(registry: Arc<SandboxRegistry>) -> crate::error::Result<()> {
    info!("Starting E2B MCP server");
    debug!("Using stdio transport");

    let server = SandboxServer::new(Arc::clone(&registry));

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| ServerError::InitializationFailed(e.to_string()))?;

    info!("Server initialized, waiting for requests");

    let cancel = service.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            cancel.cancel();
        }
    });

    let waited = service.waiting().await;
    interrupt.abort();

    log_cleanup(&registry.cleanup_all().await);

    let reason = waited.map_err(|e| ServerError::Transport(e.to_string()))?;
    info!(?reason, "Server shutdown complete");
    Ok(())
}

fn log_cleanup(report: &CleanupReport) {
    if report.is_clean() {
        info!(cleaned = report.cleaned.len(), "Sandbox cleanup finished");
        return;
    }
    for failure in &report.failures {
        warn!(id = %failure.id, error = %failure.error, "Sandbox teardown failed");
    }
    warn!(
        cleaned = report.cleaned.len(),
        failed = report.failures.len(),
        "Sandbox cleanup finished with failures"
    );
}

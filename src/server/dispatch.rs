//! Tool dispatch.
//!
//! The dispatcher validates a call, runs it against the registry and the
//! provider, and maps the outcome to the flat JSON object the client sees.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, error, info, instrument, warn};

use super::tools::{
    CreateSandboxArgs, GetFileDownloadUrlArgs, GetSandboxUrlArgs, JsonObject, KillSandboxArgs,
    ListFilesArgs, ReadFileArgs, RunCodeArgs, RunCommandArgs, ToolCall, WriteFileArgs,
};
use crate::config::describe_timeout;
use crate::error::{ProviderError, ToolError};
use crate::provider::{CommandResult, Execution, SandboxRef};
use crate::registry::SandboxRegistry;

/// Routes tool calls to the registry and the provider.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<SandboxRegistry>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<SandboxRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this dispatcher operates on.
    #[must_use]
    pub fn registry(&self) -> &Arc<SandboxRegistry> {
        &self.registry
    }

    /// Validates and executes a raw tool call.
    ///
    /// # Errors
    ///
    /// Returns a `ToolError` if the tool is unknown, the arguments are
    /// invalid, or the operation fails.
    pub async fn call(&self, name: &str, arguments: Option<&JsonObject>) -> Result<Value, ToolError> {
        let call = ToolCall::parse(name, arguments, self.registry.limits()).inspect_err(|e| {
            warn!(tool = name, error = %e, details = %e.details().unwrap_or_default(), "Rejected tool call");
        })?;
        self.execute(call).await
    }

    /// Executes an already validated tool call.
    ///
    /// # Errors
    ///
    /// Returns a `ToolError` if the operation fails.
    pub async fn execute(&self, call: ToolCall) -> Result<Value, ToolError> {
        match call {
            ToolCall::CreateSandbox(args) => self.create_sandbox(args).await,
            ToolCall::RunCommand(args) => self.run_command(args).await,
            ToolCall::ReadFile(args) => self.read_file(args).await,
            ToolCall::WriteFile(args) => self.write_file(args).await,
            ToolCall::ListFiles(args) => self.list_files(args).await,
            ToolCall::RunCode(args) => self.run_code(args).await,
            ToolCall::GetSandboxUrl(args) => self.get_sandbox_url(args).await,
            ToolCall::GetFileDownloadUrl(args) => self.get_file_download_url(args).await,
            ToolCall::KillSandbox(args) => self.kill_sandbox(args).await,
            ToolCall::ListSandboxIds(_) => Ok(self.list_sandbox_ids().await),
        }
    }

    async fn sandbox(&self, id: &str) -> Result<SandboxRef, ToolError> {
        Ok(self.registry.get(id).await?)
    }

    async fn create_sandbox(&self, args: CreateSandboxArgs) -> Result<Value, ToolError> {
        let created = self.registry.create(args.timeout_ms).await?;
        Ok(json!({
            "sandboxId": created.id,
            "message": format!(
                "Sandbox created successfully with timeout {}",
                describe_timeout(created.timeout_ms)
            ),
        }))
    }

    #[instrument(skip_all, fields(id = %args.sandbox_id, background = args.background))]
    async fn run_command(&self, args: RunCommandArgs) -> Result<Value, ToolError> {
        let sandbox = self.sandbox(&args.sandbox_id).await?;
        let result = sandbox
            .run_command(&args.command, args.background)
            .await
            .map_err(|e| failed("run command", &args.sandbox_id, e))?;

        info!("Command executed");
        Ok(match result {
            CommandResult::Background { pid } => json!({
                "message": "Command started in background",
                "pid": pid,
                "sandboxId": args.sandbox_id,
            }),
            CommandResult::Foreground(output) => json!({
                "stdout": output.stdout,
                "stderr": output.stderr,
                "exit_code": output.exit_code,
                "sandboxId": args.sandbox_id,
            }),
        })
    }

    #[instrument(skip_all, fields(id = %args.sandbox_id, path = %args.file_path))]
    async fn read_file(&self, args: ReadFileArgs) -> Result<Value, ToolError> {
        let sandbox = self.sandbox(&args.sandbox_id).await?;
        let content = sandbox
            .read_file(&args.file_path)
            .await
            .map_err(|e| failed("read file", &args.sandbox_id, e))?;

        info!(bytes = content.len(), "Read file");
        Ok(json!({
            "filePath": args.file_path,
            "content": content,
            "sandboxId": args.sandbox_id,
        }))
    }

    #[instrument(skip_all, fields(id = %args.sandbox_id, path = %args.file_path))]
    async fn write_file(&self, args: WriteFileArgs) -> Result<Value, ToolError> {
        let sandbox = self.sandbox(&args.sandbox_id).await?;
        sandbox
            .write_file(&args.file_path, &args.file_contents)
            .await
            .map_err(|e| failed("write file", &args.sandbox_id, e))?;

        let size = args.file_contents.len();
        info!(bytes = size, "Wrote file");
        Ok(json!({
            "filePath": args.file_path,
            "message": "File written successfully",
            "sandboxId": args.sandbox_id,
            "size": size,
        }))
    }

    #[instrument(skip_all, fields(id = %args.sandbox_id, path = %args.folder_path))]
    async fn list_files(&self, args: ListFilesArgs) -> Result<Value, ToolError> {
        let sandbox = self.sandbox(&args.sandbox_id).await?;
        let files = sandbox
            .list_files(&args.folder_path)
            .await
            .map_err(|e| failed("list files", &args.sandbox_id, e))?;

        info!(count = files.len(), "Listed files");
        Ok(json!({
            "folderPath": args.folder_path,
            "count": files.len(),
            "files": files,
            "sandboxId": args.sandbox_id,
        }))
    }

    async fn run_code(&self, args: RunCodeArgs) -> Result<Value, ToolError> {
        match args.sandbox_id {
            Some(id) => {
                info!(%id, "Running code in existing sandbox");
                let sandbox = self.sandbox(&id).await?;
                let execution = sandbox
                    .run_code(&args.code)
                    .await
                    .map_err(|e| failed("run code", &id, e))?;

                let mut output = execution_json(execution);
                output.insert("sandboxId".into(), Value::from(id));
                Ok(Value::Object(output))
            }
            None => {
                info!("Running code in temporary sandbox");
                let mut output = self.run_code_ephemeral(&args.code).await?;
                output.insert("message".into(), Value::from("Executed in temporary sandbox"));
                Ok(Value::Object(output))
            }
        }
    }

    /// Runs code in a sandbox that bypasses the registry and is always torn
    /// down afterwards.
    ///
    /// The sandbox is tracked as temporary while the code runs, so shutdown
    /// cleanup can reach it; if this future is dropped mid-run, the guard
    /// schedules the teardown instead.
    async fn run_code_ephemeral(&self, code: &str) -> Result<JsonObject, ToolError> {
        let limits = self.registry.limits();
        let sandbox = self
            .registry
            .provider()
            .create(limits.effective_timeout(None))
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to create temporary sandbox");
                ToolError::provider("create sandbox", e)
            })?;

        let id = sandbox.id().to_string();
        self.registry.track_temporary(Arc::clone(&sandbox)).await;
        let guard = TemporaryGuard::new(Arc::clone(&self.registry), id.clone());

        let result = sandbox.run_code(code).await;

        guard.disarm();
        teardown_temporary(&self.registry, &id).await;

        let execution = result.map_err(|e| failed("run code", &id, e))?;
        Ok(execution_json(execution))
    }

    #[instrument(skip_all, fields(id = %args.sandbox_id, port = args.port))]
    async fn get_sandbox_url(&self, args: GetSandboxUrlArgs) -> Result<Value, ToolError> {
        let sandbox = self.sandbox(&args.sandbox_id).await?;
        let url = format!("https://{}", sandbox.host(args.port));

        info!(%url, "Resolved sandbox URL");
        Ok(json!({
            "sandboxId": args.sandbox_id,
            "port": args.port,
            "url": url,
        }))
    }

    #[instrument(skip_all, fields(id = %args.sandbox_id, path = %args.file_path))]
    async fn get_file_download_url(&self, args: GetFileDownloadUrlArgs) -> Result<Value, ToolError> {
        let sandbox = self.sandbox(&args.sandbox_id).await?;
        let url = sandbox
            .download_url(&args.file_path, args.use_signature_expiration)
            .map_err(|e| failed("get file download URL", &args.sandbox_id, e))?;

        info!("Resolved download URL");
        Ok(json!({
            "sandboxId": args.sandbox_id,
            "filePath": args.file_path,
            "url": url,
        }))
    }

    async fn kill_sandbox(&self, args: KillSandboxArgs) -> Result<Value, ToolError> {
        self.registry.kill(&args.sandbox_id).await?;
        let stats = self.registry.stats().await;
        Ok(json!({
            "sandboxId": args.sandbox_id,
            "message": "Sandbox killed successfully",
            "stats": stats,
        }))
    }

    async fn list_sandbox_ids(&self) -> Value {
        let stats = self.registry.stats().await;
        info!(active = stats.active_sandboxes, "Listed active sandboxes");
        json!({
            "sandbox_ids": stats.sandbox_ids,
            "active_sandboxes": stats.active_sandboxes,
            "max_sandboxes": stats.max_sandboxes,
        })
    }
}

/// Tears down a temporary sandbox unless shutdown cleanup already did.
async fn teardown_temporary(registry: &SandboxRegistry, id: &str) {
    let Some(sandbox) = registry.release_temporary(id).await else {
        debug!(%id, "Temporary sandbox already cleaned up");
        return;
    };
    match sandbox.kill().await {
        Ok(()) => info!(%id, "Temporary sandbox cleaned up"),
        Err(e) => warn!(%id, error = %e, "Error cleaning up temporary sandbox"),
    }
}

/// Schedules teardown of a temporary sandbox if dropped while still armed.
struct TemporaryGuard {
    registry: Arc<SandboxRegistry>,
    id: Option<String>,
}

impl TemporaryGuard {
    fn new(registry: Arc<SandboxRegistry>, id: String) -> Self {
        Self {
            registry,
            id: Some(id),
        }
    }

    fn disarm(mut self) {
        self.id = None;
    }
}

impl Drop for TemporaryGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(%id, "Code run cancelled, tearing down temporary sandbox");
                let registry = Arc::clone(&self.registry);
                handle.spawn(async move { teardown_temporary(&registry, &id).await });
            }
            Err(_) => {
                warn!(%id, "No runtime to tear down temporary sandbox, left to provider expiry");
            }
        }
    }
}

fn failed(operation: &'static str, id: &str, source: ProviderError) -> ToolError {
    error!(%id, operation, error = %source, "Sandbox operation failed");
    ToolError::provider(operation, source)
}

fn execution_json(execution: Execution) -> JsonObject {
    let mut output = JsonObject::new();
    output.insert("stdout".into(), json!(execution.stdout));
    output.insert("stderr".into(), json!(execution.stderr));
    if !execution.results.is_empty() {
        output.insert("results".into(), json!(execution.results));
    }
    if let Some(err) = execution.error {
        output.insert("error".into(), json!(err));
    }
    output
}

//! Tool catalogue and argument validation.
//!
//! Every tool is a variant of [`ToolCall`] carrying its own typed arguments.
//! [`ToolCall::parse`] turns an MCP `tools/call` request (name plus JSON
//! object) into one of these variants, collecting every violated field.
//!
//! The argument structs derive `JsonSchema` (reading their `serde` renames);
//! the generated schemas are what `tools/list` advertises. Bounds that depend
//! on configuration are filled in from [`SandboxLimits`].

use std::sync::Arc;

use schemars::JsonSchema;
use serde_json::{Map, Value};

use crate::config::{MAX_SIGNATURE_EXPIRATION_SECS, MIN_SANDBOX_TIMEOUT_MS, SandboxLimits};
use crate::error::{FieldViolation, ToolError};

/// JSON object as carried by MCP requests.
pub type JsonObject = Map<String, Value>;

/// Arguments of `create_sandbox`.
#[derive(Debug, Clone, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSandboxArgs {
    /// Sandbox lifetime in milliseconds
    #[schemars(range(min = MIN_SANDBOX_TIMEOUT_MS))]
    pub timeout_ms: Option<u64>,
}

/// Arguments of `run_command`.
#[derive(Debug, Clone, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunCommandArgs {
    /// Sandbox ID
    pub sandbox_id: String,
    /// Shell command to execute
    #[schemars(length(min = 1))]
    pub command: String,
    /// Run command in background
    #[serde(default)]
    pub background: bool,
}

/// Arguments of `read_file`.
#[derive(Debug, Clone, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadFileArgs {
    /// Sandbox ID
    pub sandbox_id: String,
    /// Path to the file
    #[schemars(length(min = 1))]
    pub file_path: String,
}

/// Arguments of `write_file`.
#[derive(Debug, Clone, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WriteFileArgs {
    /// Sandbox ID
    pub sandbox_id: String,
    /// Path to the file
    #[schemars(length(min = 1))]
    pub file_path: String,
    /// Content to write to the file
    pub file_contents: String,
}

/// Arguments of `list_files`.
#[derive(Debug, Clone, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesArgs {
    /// Sandbox ID
    pub sandbox_id: String,
    /// Path to the folder
    #[schemars(length(min = 1))]
    pub folder_path: String,
}

/// Arguments of `run_code`.
#[derive(Debug, Clone, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunCodeArgs {
    /// Python code to execute
    #[schemars(length(min = 1))]
    pub code: String,
    /// Optional sandbox ID. If not provided, a temporary sandbox will be created.
    pub sandbox_id: Option<String>,
}

/// Arguments of `get_sandbox_url`.
#[derive(Debug, Clone, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetSandboxUrlArgs {
    /// Sandbox ID
    pub sandbox_id: String,
    /// Port number
    #[schemars(range(min = 1, max = 65535))]
    pub port: u16,
}

/// Arguments of `get_file_download_url`.
#[derive(Debug, Clone, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetFileDownloadUrlArgs {
    /// Sandbox ID
    pub sandbox_id: String,
    /// Path to the file
    #[schemars(length(min = 1))]
    pub file_path: String,
    /// Seconds the signed URL stays valid
    #[schemars(range(min = 1, max = MAX_SIGNATURE_EXPIRATION_SECS))]
    pub use_signature_expiration: Option<u64>,
}

/// Arguments of `kill_sandbox`.
#[derive(Debug, Clone, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KillSandboxArgs {
    /// Sandbox ID
    pub sandbox_id: String,
}

/// Arguments of `list_sandbox_ids` (none).
#[derive(Debug, Clone, Default, PartialEq, Eq, JsonSchema)]
pub struct ListSandboxIdsArgs {}

/// Names of every tool, in the order they are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    CreateSandbox,
    RunCommand,
    ReadFile,
    WriteFile,
    ListFiles,
    RunCode,
    GetSandboxUrl,
    GetFileDownloadUrl,
    KillSandbox,
    ListSandboxIds,
}

impl ToolKind {
    pub const ALL: [ToolKind; 10] = [
        Self::CreateSandbox,
        Self::RunCommand,
        Self::ReadFile,
        Self::WriteFile,
        Self::ListFiles,
        Self::RunCode,
        Self::GetSandboxUrl,
        Self::GetFileDownloadUrl,
        Self::KillSandbox,
        Self::ListSandboxIds,
    ];

    /// Wire name of the tool.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::CreateSandbox => "create_sandbox",
            Self::RunCommand => "run_command",
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::ListFiles => "list_files",
            Self::RunCode => "run_code",
            Self::GetSandboxUrl => "get_sandbox_url",
            Self::GetFileDownloadUrl => "get_file_download_url",
            Self::KillSandbox => "kill_sandbox",
            Self::ListSandboxIds => "list_sandbox_ids",
        }
    }

    /// Human-readable description shown to the model.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::CreateSandbox => "Create a new E2B sandbox",
            Self::RunCommand => "Run a command in the sandbox",
            Self::ReadFile => "Read a file from the sandbox",
            Self::WriteFile => "Write content to a file in the sandbox",
            Self::ListFiles => "List files in a directory",
            Self::RunCode => {
                "Run python code in a secure sandbox by E2B. Using the Jupyter Notebook syntax. \
                 Optionally specify sandboxId to use an existing sandbox."
            }
            Self::GetSandboxUrl => "Get the URL for a sandbox on a specific port",
            Self::GetFileDownloadUrl => "Get a download URL for a file in the sandbox",
            Self::KillSandbox => "Kill a sandbox",
            Self::ListSandboxIds => "List all active sandbox IDs and statistics",
        }
    }

    /// JSON schema of the tool's arguments under `limits`.
    #[must_use]
    pub fn input_schema(self, limits: &SandboxLimits) -> Arc<JsonObject> {
        match self {
            Self::CreateSandbox => {
                let mut schema = schema_for::<CreateSandboxArgs>();
                set_maximum(&mut schema, "timeoutMs", limits.max_timeout_ms);
                Arc::new(schema)
            }
            Self::RunCommand => Arc::new(schema_for::<RunCommandArgs>()),
            Self::ReadFile => Arc::new(schema_for::<ReadFileArgs>()),
            Self::WriteFile => Arc::new(schema_for::<WriteFileArgs>()),
            Self::ListFiles => Arc::new(schema_for::<ListFilesArgs>()),
            Self::RunCode => Arc::new(schema_for::<RunCodeArgs>()),
            Self::GetSandboxUrl => Arc::new(schema_for::<GetSandboxUrlArgs>()),
            Self::GetFileDownloadUrl => Arc::new(schema_for::<GetFileDownloadUrlArgs>()),
            Self::KillSandbox => Arc::new(schema_for::<KillSandboxArgs>()),
            Self::ListSandboxIds => Arc::new(schema_for::<ListSandboxIdsArgs>()),
        }
    }

    /// Looks a tool up by its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn schema_for<T: JsonSchema>() -> JsonObject {
    let mut object = match serde_json::to_value(schemars::schema_for!(T)) {
        Ok(Value::Object(object)) => object,
        _ => JsonObject::new(),
    };
    object.entry("type").or_insert_with(|| Value::from("object"));
    object
        .entry("properties")
        .or_insert_with(|| Value::Object(JsonObject::new()));
    object
}

fn set_maximum(schema: &mut JsonObject, field: &str, maximum: u64) {
    if let Some(Value::Object(property)) = schema
        .get_mut("properties")
        .and_then(|p| p.get_mut(field))
    {
        property.insert("maximum".to_string(), Value::from(maximum));
    }
}

/// A validated tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    CreateSandbox(CreateSandboxArgs),
    RunCommand(RunCommandArgs),
    ReadFile(ReadFileArgs),
    WriteFile(WriteFileArgs),
    ListFiles(ListFilesArgs),
    RunCode(RunCodeArgs),
    GetSandboxUrl(GetSandboxUrlArgs),
    GetFileDownloadUrl(GetFileDownloadUrlArgs),
    KillSandbox(KillSandboxArgs),
    ListSandboxIds(ListSandboxIdsArgs),
}

impl ToolCall {
    /// Which tool this call targets.
    #[must_use]
    pub fn kind(&self) -> ToolKind {
        match self {
            Self::CreateSandbox(_) => ToolKind::CreateSandbox,
            Self::RunCommand(_) => ToolKind::RunCommand,
            Self::ReadFile(_) => ToolKind::ReadFile,
            Self::WriteFile(_) => ToolKind::WriteFile,
            Self::ListFiles(_) => ToolKind::ListFiles,
            Self::RunCode(_) => ToolKind::RunCode,
            Self::GetSandboxUrl(_) => ToolKind::GetSandboxUrl,
            Self::GetFileDownloadUrl(_) => ToolKind::GetFileDownloadUrl,
            Self::KillSandbox(_) => ToolKind::KillSandbox,
            Self::ListSandboxIds(_) => ToolKind::ListSandboxIds,
        }
    }

    /// Resolves `name` and validates `arguments` against its schema.
    ///
    /// `limits` supplies the upper bound for `timeoutMs`.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `ToolError::UnknownOperation` if no tool has this name
    /// - `ToolError::InvalidArguments` listing every violated field
    pub fn parse(
        name: &str,
        arguments: Option<&JsonObject>,
        limits: &SandboxLimits,
    ) -> Result<Self, ToolError> {
        let kind = ToolKind::from_name(name).ok_or_else(|| ToolError::UnknownOperation {
            name: name.to_string(),
        })?;

        let empty = JsonObject::new();
        let mut args = ArgumentReader::new(arguments.unwrap_or(&empty));

        let call = match kind {
            ToolKind::CreateSandbox => Self::CreateSandbox(CreateSandboxArgs {
                timeout_ms: args.optional_integer(
                    "timeoutMs",
                    MIN_SANDBOX_TIMEOUT_MS,
                    limits.max_timeout_ms,
                ),
            }),
            ToolKind::RunCommand => Self::RunCommand(RunCommandArgs {
                sandbox_id: args.required_string("sandboxId"),
                command: args.required_string("command"),
                background: args.optional_bool("background").unwrap_or(false),
            }),
            ToolKind::ReadFile => Self::ReadFile(ReadFileArgs {
                sandbox_id: args.required_string("sandboxId"),
                file_path: args.required_string("filePath"),
            }),
            ToolKind::WriteFile => Self::WriteFile(WriteFileArgs {
                sandbox_id: args.required_string("sandboxId"),
                file_path: args.required_string("filePath"),
                file_contents: args.required_text("fileContents"),
            }),
            ToolKind::ListFiles => Self::ListFiles(ListFilesArgs {
                sandbox_id: args.required_string("sandboxId"),
                folder_path: args.required_string("folderPath"),
            }),
            ToolKind::RunCode => Self::RunCode(RunCodeArgs {
                code: args.required_string("code"),
                sandbox_id: args.optional_string("sandboxId"),
            }),
            ToolKind::GetSandboxUrl => Self::GetSandboxUrl(GetSandboxUrlArgs {
                sandbox_id: args.required_string("sandboxId"),
                port: args
                    .required_integer("port", 1, u64::from(u16::MAX))
                    .and_then(|p| u16::try_from(p).ok())
                    .unwrap_or_default(),
            }),
            ToolKind::GetFileDownloadUrl => Self::GetFileDownloadUrl(GetFileDownloadUrlArgs {
                sandbox_id: args.required_string("sandboxId"),
                file_path: args.required_string("filePath"),
                use_signature_expiration: args.optional_integer(
                    "useSignatureExpiration",
                    1,
                    MAX_SIGNATURE_EXPIRATION_SECS,
                ),
            }),
            ToolKind::KillSandbox => Self::KillSandbox(KillSandboxArgs {
                sandbox_id: args.required_string("sandboxId"),
            }),
            ToolKind::ListSandboxIds => Self::ListSandboxIds(ListSandboxIdsArgs {}),
        };

        args.finish(kind, call)
    }
}

/// Reads fields out of an argument object, recording violations as it goes.
///
/// Missing or mistyped fields yield a placeholder value so parsing can carry
/// on and report every problem at once; `finish` discards the placeholder
/// result if anything was recorded.
struct ArgumentReader<'a> {
    object: &'a JsonObject,
    violations: Vec<FieldViolation>,
}

impl<'a> ArgumentReader<'a> {
    fn new(object: &'a JsonObject) -> Self {
        Self {
            object,
            violations: Vec::new(),
        }
    }

    fn violation(&mut self, field: &str, message: impl Into<String>) {
        self.violations.push(FieldViolation::new(field, message));
    }

    /// Present, non-null field.
    fn value(&self, field: &str) -> Option<&'a Value> {
        self.object.get(field).filter(|v| !v.is_null())
    }

    /// Required string that may be empty.
    fn required_text(&mut self, field: &str) -> String {
        match self.value(field) {
            Some(Value::String(s)) => s.clone(),
            Some(_) => {
                self.violation(field, "must be a string");
                String::new()
            }
            None => {
                self.violation(field, "is required");
                String::new()
            }
        }
    }

    /// Required, non-empty string.
    fn required_string(&mut self, field: &str) -> String {
        match self.value(field) {
            Some(Value::String(s)) if s.is_empty() => {
                self.violation(field, "must not be empty");
                String::new()
            }
            _ => self.required_text(field),
        }
    }

    /// Optional string; if present it must be non-empty.
    fn optional_string(&mut self, field: &str) -> Option<String> {
        match self.value(field) {
            None => None,
            Some(Value::String(s)) if s.is_empty() => {
                self.violation(field, "must not be empty");
                None
            }
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                self.violation(field, "must be a string");
                None
            }
        }
    }

    fn optional_bool(&mut self, field: &str) -> Option<bool> {
        match self.value(field) {
            None => None,
            Some(Value::Bool(b)) => Some(*b),
            Some(_) => {
                self.violation(field, "must be a boolean");
                None
            }
        }
    }

    /// Optional integer within `[min, max]`.
    fn optional_integer(&mut self, field: &str, min: u64, max: u64) -> Option<u64> {
        let value = self.value(field)?;
        let Some(number) = as_integer(value) else {
            self.violation(field, "must be an integer");
            return None;
        };

        if number < i128::from(min) || number > i128::from(max) {
            self.violation(field, format!("must be between {min} and {max}"));
            return None;
        }
        u64::try_from(number).ok()
    }

    /// Required integer within `[min, max]`.
    fn required_integer(&mut self, field: &str, min: u64, max: u64) -> Option<u64> {
        if self.value(field).is_none() {
            self.violation(field, "is required");
            return None;
        }
        self.optional_integer(field, min, max)
    }

    fn finish(self, kind: ToolKind, call: ToolCall) -> Result<ToolCall, ToolError> {
        if self.violations.is_empty() {
            Ok(call)
        } else {
            Err(ToolError::InvalidArguments {
                tool: kind.name(),
                violations: self.violations,
            })
        }
    }
}

/// Accepts JSON integers and integral floats (`5000.0`).
#[allow(clippy::cast_possible_truncation)]
fn as_integer(value: &Value) -> Option<i128> {
    let number = value.as_number()?;
    if let Some(n) = number.as_i64() {
        return Some(i128::from(n));
    }
    if let Some(n) = number.as_u64() {
        return Some(i128::from(n));
    }
    number
        .as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < 1e30)
        .map(|f| f as i128)
}

//! In-process sandbox provider.
//!
//! Sandboxes live in memory: files are kept in a map, commands and code
//! return canned output, and every create/kill is recorded so callers can
//! inspect what happened. Faults can be injected per operation class.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{
    CommandOutput, CommandResult, EntryInfo, Execution, FileType, Sandbox, SandboxProvider,
    SandboxRef,
};
use crate::error::ProviderError;

/// First pid handed out to background commands.
const FIRST_PID: u32 = 1000;

/// Directories every fresh sandbox starts with.
const DEFAULT_DIRS: &[&str] = &["/", "/home", "/home/user", "/tmp"];

/// Which operations should fail.
#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    fail_create: bool,
    reject_create: bool,
    fail_kill: bool,
    fail_operations: bool,
}

#[derive(Debug, Default)]
struct State {
    faults: Faults,
    created: Vec<String>,
    killed: Vec<String>,
    timeouts: Vec<Duration>,
    next_pid: u32,
    command_output: CommandOutput,
    code_output: Execution,
}

/// Pauses `run_code` until released, so callers can observe state mid-execution.
#[derive(Debug, Default)]
pub struct CodeGate {
    started: Notify,
    release: Notify,
}

impl CodeGate {
    /// Waits until a `run_code` call has reached the gate.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Lets the paused `run_code` call finish.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// Provider whose sandboxes live in this process.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use e2b_mcp_server::provider::{SandboxProvider, memory::MemoryProvider};
///
/// # async fn demo() {
/// let provider = MemoryProvider::new();
/// let sandbox = provider.create(Duration::from_secs(60)).await.unwrap();
/// sandbox.write_file("/tmp/a.txt", "hello").await.unwrap();
/// assert_eq!(sandbox.read_file("/tmp/a.txt").await.unwrap(), "hello");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    state: Arc<Mutex<State>>,
    gate: Option<Arc<CodeGate>>,
}

impl MemoryProvider {
    /// Creates a provider with no faults and empty canned output.
    #[must_use]
    pub fn new() -> Self {
        let state = State {
            next_pid: FIRST_PID,
            ..State::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            gate: None,
        }
    }

    /// Makes every create fail with a generic error.
    #[must_use]
    pub fn failing_creates(self) -> Self {
        self.lock().faults.fail_create = true;
        self
    }

    /// Makes every create fail as a provider-side rejection (HTTP 429).
    #[must_use]
    pub fn rejecting_creates(self) -> Self {
        self.lock().faults.reject_create = true;
        self
    }

    /// Makes every teardown fail.
    #[must_use]
    pub fn failing_kills(self) -> Self {
        self.lock().faults.fail_kill = true;
        self
    }

    /// Makes every per-sandbox operation (commands, files, code) fail.
    #[must_use]
    pub fn failing_operations(self) -> Self {
        self.lock().faults.fail_operations = true;
        self
    }

    /// Sets the output returned by foreground commands.
    #[must_use]
    pub fn with_command_output(self, output: CommandOutput) -> Self {
        self.lock().command_output = output;
        self
    }

    /// Sets the execution returned by `run_code`.
    #[must_use]
    pub fn with_code_output(self, execution: Execution) -> Self {
        self.lock().code_output = execution;
        self
    }

    /// Holds every `run_code` call at `gate` until it is released.
    #[must_use]
    pub fn with_code_gate(mut self, gate: Arc<CodeGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Toggles teardown failures after construction.
    pub fn set_fail_kills(&self, fail: bool) {
        self.lock().faults.fail_kill = fail;
    }

    /// Identifiers of every sandbox created so far, in creation order.
    #[must_use]
    pub fn created(&self) -> Vec<String> {
        self.lock().created.clone()
    }

    /// Identifiers of every sandbox whose teardown was attempted.
    #[must_use]
    pub fn killed(&self) -> Vec<String> {
        self.lock().killed.clone()
    }

    /// Timeouts passed to `create`, in call order.
    #[must_use]
    pub fn requested_timeouts(&self) -> Vec<Duration> {
        self.lock().timeouts.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock_state(&self.state)
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxProvider for MemoryProvider {
    async fn create(&self, timeout: Duration) -> Result<SandboxRef, ProviderError> {
        let mut state = self.lock();
        state.timeouts.push(timeout);

        if state.faults.reject_create {
            return Err(ProviderError::Rejected {
                status: 429,
                message: "rate limit exceeded".to_string(),
            });
        }
        if state.faults.fail_create {
            return Err(ProviderError::Failed {
                reason: "sandbox allocation failed".to_string(),
            });
        }

        let id = format!("mem-{}", Uuid::new_v4().simple());
        state.created.push(id.clone());
        debug!(%id, ?timeout, "Created in-memory sandbox");

        Ok(Arc::new(MemorySandbox {
            id,
            shared: Arc::clone(&self.state),
            gate: self.gate.clone(),
            fs: Mutex::new(FileTree::new()),
        }))
    }
}

/// Files and directories of one in-memory sandbox.
#[derive(Debug)]
struct FileTree {
    files: BTreeMap<String, String>,
    dirs: BTreeSet<String>,
    alive: bool,
}

impl FileTree {
    fn new() -> Self {
        Self {
            files: BTreeMap::new(),
            dirs: DEFAULT_DIRS.iter().map(|d| (*d).to_string()).collect(),
            alive: true,
        }
    }

    fn add_parents(&mut self, path: &str) {
        let mut current = parent_of(path);
        while let Some(dir) = current {
            self.dirs.insert(dir.to_string());
            current = parent_of(dir);
        }
    }
}

/// Parent directory of an absolute path, `None` for the root.
fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/home/user/{trimmed}")
    }
}

fn lock_state(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// A sandbox created by [`MemoryProvider`].
#[derive(Debug)]
pub struct MemorySandbox {
    id: String,
    shared: Arc<Mutex<State>>,
    gate: Option<Arc<CodeGate>>,
    fs: Mutex<FileTree>,
}

impl MemorySandbox {
    fn tree(&self) -> MutexGuard<'_, FileTree> {
        self.fs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_operation(&self) -> Result<(), ProviderError> {
        if !self.tree().alive {
            return Err(ProviderError::Failed {
                reason: format!("sandbox {} is not running", self.id),
            });
        }
        if lock_state(&self.shared).faults.fail_operations {
            return Err(ProviderError::Failed {
                reason: "sandbox operation failed".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Sandbox for MemorySandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_command(
        &self,
        command: &str,
        background: bool,
    ) -> Result<CommandResult, ProviderError> {
        self.check_operation()?;
        trace!(id = %self.id, command, background, "Running in-memory command");

        let mut state = lock_state(&self.shared);
        if background {
            let pid = state.next_pid;
            state.next_pid += 1;
            Ok(CommandResult::Background { pid })
        } else {
            Ok(CommandResult::Foreground(state.command_output.clone()))
        }
    }

    async fn read_file(&self, path: &str) -> Result<String, ProviderError> {
        self.check_operation()?;
        let path = normalize(path);
        self.tree()
            .files
            .get(&path)
            .cloned()
            .ok_or_else(|| ProviderError::Api {
                status: 404,
                message: format!("file not found: {path}"),
            })
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), ProviderError> {
        self.check_operation()?;
        let path = normalize(path);
        let mut tree = self.tree();
        if tree.dirs.contains(&path) {
            return Err(ProviderError::Api {
                status: 400,
                message: format!("path is a directory: {path}"),
            });
        }
        tree.add_parents(&path);
        tree.files.insert(path, contents.to_string());
        Ok(())
    }

    async fn list_files(&self, path: &str) -> Result<Vec<EntryInfo>, ProviderError> {
        self.check_operation()?;
        let folder = normalize(path);
        let tree = self.tree();
        if !tree.dirs.contains(&folder) {
            return Err(ProviderError::Api {
                status: 404,
                message: format!("directory not found: {folder}"),
            });
        }

        let dirs = tree
            .dirs
            .iter()
            .filter(|d| parent_of(d) == Some(folder.as_str()))
            .map(|d| (d, FileType::Dir));
        let files = tree
            .files
            .keys()
            .filter(|f| parent_of(f) == Some(folder.as_str()))
            .map(|f| (f, FileType::File));

        let mut entries: Vec<EntryInfo> = dirs
            .chain(files)
            .map(|(full, kind)| {
                let name = full.rsplit('/').next().unwrap_or(full);
                EntryInfo::new(name, kind)
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn run_code(&self, code: &str) -> Result<Execution, ProviderError> {
        self.check_operation()?;
        trace!(id = %self.id, chars = code.len(), "Running in-memory code");

        if let Some(gate) = &self.gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }

        Ok(lock_state(&self.shared).code_output.clone())
    }

    fn host(&self, port: u16) -> String {
        format!("{port}-{}.sandbox.localhost", self.id)
    }

    fn download_url(
        &self,
        path: &str,
        signature_expiration_secs: Option<u64>,
    ) -> Result<String, ProviderError> {
        let path = normalize(path);
        Ok(match signature_expiration_secs {
            Some(secs) => format!("memory://{}{path}?expires_in={secs}", self.id),
            None => format!("memory://{}{path}", self.id),
        })
    }

    async fn kill(&self) -> Result<(), ProviderError> {
        let mut state = lock_state(&self.shared);
        state.killed.push(self.id.clone());
        if state.faults.fail_kill {
            return Err(ProviderError::Failed {
                reason: format!("failed to kill sandbox {}", self.id),
            });
        }
        drop(state);

        self.tree().alive = false;
        debug!(id = %self.id, "Killed in-memory sandbox");
        Ok(())
    }
}

//! Bounded registry of live sandboxes.
//!
//! The registry is the single source of truth for which sandboxes exist. It
//! maps provider-assigned identifiers to sandbox handles, refuses to grow past
//! a configured capacity, and tears everything down on shutdown.
//!
//! # Locking
//!
//! All table operations go through one async mutex. `create` holds it across
//! the capacity check, the provider call and the insert so two concurrent
//! creates can never overshoot the capacity. Per-sandbox operations only hold
//! it long enough to clone the handle.
//!
//! # Temporary sandboxes
//!
//! Sandboxes created outside the table (for one-off code runs) can be tracked
//! separately while they are alive. They count against neither capacity nor
//! [`SandboxRegistry::stats`], but `cleanup_all` tears them down too.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use e2b_mcp_server::config::SandboxLimits;
//! use e2b_mcp_server::provider::memory::MemoryProvider;
//! use e2b_mcp_server::registry::SandboxRegistry;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = SandboxRegistry::new(Arc::new(MemoryProvider::new()), SandboxLimits::default());
//!
//! let created = registry.create(None).await?;
//! println!("Sandbox ID: {} ({}ms)", created.id, created.timeout_ms);
//!
//! registry.kill(&created.id).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SandboxLimits;
use crate::error::{ProviderError, RegistryError};
use crate::provider::{SandboxProvider, SandboxRef};

/// A sandbox that was just created and registered.
#[derive(Clone)]
pub struct CreatedSandbox {
    /// Identifier assigned by the provider.
    pub id: String,
    /// Handle to the sandbox.
    pub sandbox: SandboxRef,
    /// Timeout handed to the provider, after defaulting and clamping.
    pub timeout_ms: u64,
}

impl std::fmt::Debug for CreatedSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatedSandbox")
            .field("id", &self.id)
            .field("timeout_ms", &self.timeout_ms)
            .finish_non_exhaustive()
    }
}

/// Snapshot of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Number of registered sandboxes.
    pub active_sandboxes: usize,
    /// Configured capacity.
    pub max_sandboxes: usize,
    /// Registered identifiers, oldest first.
    pub sandbox_ids: Vec<String>,
}

/// A teardown that failed during [`SandboxRegistry::cleanup_all`].
#[derive(Debug)]
pub struct CleanupFailure {
    pub id: String,
    pub error: ProviderError,
}

/// Outcome of [`SandboxRegistry::cleanup_all`].
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Sandboxes torn down successfully.
    pub cleaned: Vec<String>,
    /// Sandboxes whose teardown failed. They are deregistered regardless.
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    /// Returns true if every teardown succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Total number of sandboxes that were deregistered.
    #[must_use]
    pub fn total(&self) -> usize {
        self.cleaned.len() + self.failures.len()
    }
}

/// Bounded table of live sandboxes.
pub struct SandboxRegistry {
    provider: Arc<dyn SandboxProvider>,
    limits: SandboxLimits,
    entries: Mutex<Vec<(String, SandboxRef)>>,
    temporaries: Mutex<Vec<(String, SandboxRef)>>,
}

impl std::fmt::Debug for SandboxRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxRegistry")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl SandboxRegistry {
    /// Creates an empty registry backed by `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn SandboxProvider>, limits: SandboxLimits) -> Self {
        info!(
            max_sandboxes = limits.max_active_sandboxes,
            "Sandbox registry initialized"
        );
        Self {
            provider,
            limits,
            entries: Mutex::new(Vec::new()),
            temporaries: Mutex::new(Vec::new()),
        }
    }

    /// Returns the provider sandboxes are allocated from.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn SandboxProvider> {
        &self.provider
    }

    /// Returns the limits this registry enforces.
    #[must_use]
    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Creates a sandbox and registers it.
    ///
    /// The effective timeout is `min(requested or default, max)`.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `RegistryError::CapacityExceeded` if the registry is full (checked before calling the provider)
    /// - `RegistryError::Provider` if the provider fails; nothing is registered
    #[instrument(skip(self))]
    pub async fn create(&self, timeout_ms: Option<u64>) -> Result<CreatedSandbox, RegistryError> {
        let mut entries = self.entries.lock().await;

        let max = self.limits.max_active_sandboxes;
        if entries.len() >= max {
            warn!(active = entries.len(), max, "Sandbox capacity reached");
            return Err(RegistryError::CapacityExceeded { max });
        }

        let effective_ms = self.limits.effective_timeout_ms(timeout_ms);
        let sandbox = self
            .provider
            .create(self.limits.effective_timeout(timeout_ms))
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to create sandbox");
                RegistryError::Provider {
                    operation: "create sandbox",
                    source: e,
                }
            })?;

        let id = sandbox.id().to_string();
        entries.push((id.clone(), Arc::clone(&sandbox)));
        info!(
            %id,
            timeout_ms = effective_ms,
            active = entries.len(),
            "Sandbox created"
        );

        Ok(CreatedSandbox {
            id,
            sandbox,
            timeout_ms: effective_ms,
        })
    }

    /// Looks up a registered sandbox.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` if no sandbox has this identifier.
    pub async fn get(&self, id: &str) -> Result<SandboxRef, RegistryError> {
        self.entries
            .lock()
            .await
            .iter()
            .find(|(entry_id, _)| entry_id == id)
            .map(|(_, sandbox)| Arc::clone(sandbox))
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })
    }

    /// Deregisters a sandbox and tears it down.
    ///
    /// The entry is removed whether or not teardown succeeds, so a failed kill
    /// never holds on to capacity.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `RegistryError::NotFound` if no sandbox has this identifier
    /// - `RegistryError::Provider` if teardown failed (the entry is already gone)
    #[instrument(skip(self))]
    pub async fn kill(&self, id: &str) -> Result<(), RegistryError> {
        let (sandbox, remaining) = {
            let mut entries = self.entries.lock().await;
            let index = entries
                .iter()
                .position(|(entry_id, _)| entry_id == id)
                .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;
            let (_, sandbox) = entries.remove(index);
            (sandbox, entries.len())
        };

        match sandbox.kill().await {
            Ok(()) => {
                info!(%id, active = remaining, "Sandbox killed");
                Ok(())
            }
            Err(e) => {
                error!(%id, error = %e, active = remaining, "Error killing sandbox, removed anyway");
                Err(RegistryError::Provider {
                    operation: "kill sandbox",
                    source: e,
                })
            }
        }
    }

    /// Tracks a sandbox that lives outside the table until it is released.
    pub async fn track_temporary(&self, sandbox: SandboxRef) {
        let id = sandbox.id().to_string();
        debug!(%id, "Tracking temporary sandbox");
        self.temporaries.lock().await.push((id, sandbox));
    }

    /// Stops tracking a temporary sandbox.
    ///
    /// Returns the handle if it was still tracked, or `None` if `cleanup_all`
    /// has already torn it down.
    pub async fn release_temporary(&self, id: &str) -> Option<SandboxRef> {
        let mut temporaries = self.temporaries.lock().await;
        let index = temporaries.iter().position(|(entry_id, _)| entry_id == id)?;
        Some(temporaries.remove(index).1)
    }

    /// Returns the current count, capacity and identifiers.
    pub async fn stats(&self) -> RegistryStats {
        let entries = self.entries.lock().await;
        RegistryStats {
            active_sandboxes: entries.len(),
            max_sandboxes: self.limits.max_active_sandboxes,
            sandbox_ids: entries.iter().map(|(id, _)| id.clone()).collect(),
        }
    }

    /// Tears down every registered sandbox and every tracked temporary one.
    ///
    /// Never stops early: each failure is recorded in the report and the
    /// table ends up empty regardless.
    #[instrument(skip(self))]
    pub async fn cleanup_all(&self) -> CleanupReport {
        let mut drained: Vec<(String, SandboxRef)> = self.entries.lock().await.drain(..).collect();
        let temporary = {
            let mut temporaries = self.temporaries.lock().await;
            let count = temporaries.len();
            drained.extend(temporaries.drain(..));
            count
        };
        info!(count = drained.len(), temporary, "Cleaning up sandboxes");

        let mut report = CleanupReport::default();
        for (id, sandbox) in drained {
            match sandbox.kill().await {
                Ok(()) => {
                    debug!(%id, "Cleaned up sandbox");
                    report.cleaned.push(id);
                }
                Err(e) => {
                    warn!(%id, error = %e, "Error cleaning up sandbox");
                    report.failures.push(CleanupFailure { id, error: e });
                }
            }
        }

        info!(
            cleaned = report.cleaned.len(),
            failed = report.failures.len(),
            "All sandboxes cleaned up"
        );
        report
    }
}

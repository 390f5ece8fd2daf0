//! Sandbox limits shared by the registry and argument validation.

use std::time::Duration;

use crate::error::ConfigError;

/// Default lifetime of a sandbox when the caller does not ask for one (5 minutes).
pub const DEFAULT_SANDBOX_TIMEOUT_MS: u64 = 300_000;

/// Upper bound on a sandbox lifetime (1 hour).
pub const MAX_SANDBOX_TIMEOUT_MS: u64 = 3_600_000;

/// Smallest timeout a caller may request.
pub const MIN_SANDBOX_TIMEOUT_MS: u64 = 1_000;

/// Longest validity a signed download URL may be given (one year).
pub const MAX_SIGNATURE_EXPIRATION_SECS: u64 = 31_536_000;

/// Default number of sandboxes that may be alive at once.
pub const DEFAULT_MAX_ACTIVE_SANDBOXES: usize = 10;

/// Limits applied to sandbox creation.
///
/// # Example
///
/// ```
/// use e2b_mcp_server::config::SandboxLimits;
///
/// let limits = SandboxLimits::default()
///     .with_max_active_sandboxes(3)
///     .with_max_timeout_ms(600_000);
///
/// assert_eq!(limits.effective_timeout_ms(None), 300_000);
/// assert_eq!(limits.effective_timeout_ms(Some(10_000_000)), 600_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    /// Maximum number of registered sandboxes.
    pub max_active_sandboxes: usize,

    /// Timeout used when a create call does not specify one.
    pub default_timeout_ms: u64,

    /// Hard cap on any requested timeout.
    pub max_timeout_ms: u64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_active_sandboxes: DEFAULT_MAX_ACTIVE_SANDBOXES,
            default_timeout_ms: DEFAULT_SANDBOX_TIMEOUT_MS,
            max_timeout_ms: MAX_SANDBOX_TIMEOUT_MS,
        }
    }
}

impl SandboxLimits {
    /// Creates limits with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of live sandboxes.
    #[must_use]
    pub fn with_max_active_sandboxes(mut self, max: usize) -> Self {
        self.max_active_sandboxes = max;
        self
    }

    /// Sets the timeout used when none is requested.
    #[must_use]
    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// Sets the cap on requested timeouts.
    #[must_use]
    pub fn with_max_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.max_timeout_ms = timeout_ms;
        self
    }

    /// Computes the timeout actually handed to the provider.
    ///
    /// A missing or zero request falls back to the default; the result never
    /// exceeds `max_timeout_ms`.
    #[must_use]
    pub fn effective_timeout_ms(&self, requested_ms: Option<u64>) -> u64 {
        requested_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(self.default_timeout_ms)
            .min(self.max_timeout_ms)
    }

    /// Same as [`effective_timeout_ms`](Self::effective_timeout_ms), as a `Duration`.
    #[must_use]
    pub fn effective_timeout(&self, requested_ms: Option<u64>) -> Duration {
        Duration::from_millis(self.effective_timeout_ms(requested_ms))
    }

    /// Checks that the limits are usable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if capacity is zero or the timeout bounds are inconsistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_active_sandboxes == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.max_timeout_ms < MIN_SANDBOX_TIMEOUT_MS {
            return Err(ConfigError::InvalidTimeout {
                reason: format!(
                    "max timeout {}ms is below the minimum of {}ms",
                    self.max_timeout_ms, MIN_SANDBOX_TIMEOUT_MS
                ),
            });
        }
        if self.default_timeout_ms < MIN_SANDBOX_TIMEOUT_MS
            || self.default_timeout_ms > self.max_timeout_ms
        {
            return Err(ConfigError::InvalidTimeout {
                reason: format!(
                    "default timeout {}ms must be between {}ms and {}ms",
                    self.default_timeout_ms, MIN_SANDBOX_TIMEOUT_MS, self.max_timeout_ms
                ),
            });
        }
        Ok(())
    }
}

/// Renders a millisecond timeout the way it is reported back to callers.
#[must_use]
pub fn describe_timeout(timeout_ms: u64) -> String {
    const MINUTE_MS: u64 = 60_000;

    let human = if timeout_ms % MINUTE_MS == 0 {
        match timeout_ms / MINUTE_MS {
            1 => "1 minute".to_string(),
            n => format!("{n} minutes"),
        }
    } else if timeout_ms % 1_000 == 0 {
        match timeout_ms / 1_000 {
            1 => "1 second".to_string(),
            n => format!("{n} seconds"),
        }
    } else {
        return format!("{timeout_ms}ms");
    };
    format!("{timeout_ms}ms ({human})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = SandboxLimits::default();
        assert_eq!(limits.max_active_sandboxes, 10);
        assert_eq!(limits.default_timeout_ms, 300_000);
        assert_eq!(limits.max_timeout_ms, 3_600_000);
        limits.validate().expect("defaults should be valid");
    }

    #[test]
    fn test_effective_timeout() {
        let limits = SandboxLimits::default();
        assert_eq!(limits.effective_timeout_ms(None), 300_000);
        assert_eq!(limits.effective_timeout_ms(Some(0)), 300_000);
        assert_eq!(limits.effective_timeout_ms(Some(60_000)), 60_000);
        assert_eq!(limits.effective_timeout_ms(Some(10_000_000)), 3_600_000);
        assert_eq!(
            limits.effective_timeout(Some(2_000)),
            Duration::from_millis(2_000)
        );
    }

    #[test]
    fn test_builder_chain() {
        let limits = SandboxLimits::new()
            .with_max_active_sandboxes(2)
            .with_default_timeout_ms(10_000)
            .with_max_timeout_ms(20_000);

        assert_eq!(limits.max_active_sandboxes, 2);
        assert_eq!(limits.effective_timeout_ms(None), 10_000);
        assert_eq!(limits.effective_timeout_ms(Some(30_000)), 20_000);
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        assert!(matches!(
            SandboxLimits::new().with_max_active_sandboxes(0).validate(),
            Err(ConfigError::ZeroCapacity)
        ));
        assert!(
            SandboxLimits::new()
                .with_default_timeout_ms(7_200_000)
                .validate()
                .is_err()
        );
        assert!(SandboxLimits::new().with_max_timeout_ms(500).validate().is_err());
    }

    #[test]
    fn test_describe_timeout() {
        assert_eq!(describe_timeout(300_000), "300000ms (5 minutes)");
        assert_eq!(describe_timeout(60_000), "60000ms (1 minute)");
        assert_eq!(describe_timeout(1_000), "1000ms (1 second)");
        assert_eq!(describe_timeout(90_000), "90000ms (90 seconds)");
        assert_eq!(describe_timeout(1_500), "1500ms");
    }
}

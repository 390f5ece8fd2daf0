//! E2B cloud sandbox provider.
//!
//! Sandboxes are allocated through the E2B control plane and driven through
//! the `envd` daemon and the code interpreter running inside each sandbox.
//!
//! # Hosts
//!
//! Every sandbox port is reachable at `{port}-{sandbox_id}.{domain}`:
//!
//! ```text
//! api.e2b.app                    control plane (create / kill)
//! 49983-{id}.e2b.app             envd (files, processes, directory listing)
//! 49999-{id}.e2b.app             code interpreter
//! {port}-{id}.e2b.app            anything the sandbox serves
//! ```

mod api;
mod envd;
mod interpreter;

pub use envd::{DEFAULT_USER, ENVD_PORT, EnvelopeDecoder, Frame, encode_envelope};
pub use interpreter::INTERPRETER_PORT;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use super::{CommandResult, EntryInfo, Execution, Sandbox, SandboxProvider, SandboxRef};
use crate::error::{ConfigError, ProviderError};

/// Default E2B domain.
pub const DEFAULT_DOMAIN: &str = "e2b.app";

/// Template with the code interpreter preinstalled.
pub const DEFAULT_TEMPLATE: &str = "code-interpreter-v1";

/// Configuration for the E2B provider.
///
/// # Example
///
/// ```
/// use e2b_mcp_server::provider::e2b::E2bConfig;
/// use std::time::Duration;
///
/// let config = E2bConfig::new("e2b_123")
///     .with_domain("e2b.dev")
///     .with_template("base")
///     .with_request_timeout(Duration::from_secs(30));
///
/// assert_eq!(config.api_url(), "https://api.e2b.dev");
/// ```
#[derive(Clone)]
pub struct E2bConfig {
    /// API key sent to the control plane.
    pub api_key: String,

    /// Domain sandboxes and the API live under.
    ///
    /// Defaults to `e2b.app`.
    pub domain: String,

    /// Template new sandboxes are created from.
    ///
    /// Defaults to `code-interpreter-v1`.
    pub template: String,

    /// Ask for sandboxes whose `envd` requires an access token.
    pub secure: bool,

    /// Deadline for each HTTP request, including streamed command output.
    ///
    /// Defaults to 60 seconds.
    pub request_timeout: Duration,
}

impl std::fmt::Debug for E2bConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("E2bConfig")
            .field("api_key", &"<redacted>")
            .field("domain", &self.domain)
            .field("template", &self.template)
            .field("secure", &self.secure)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl E2bConfig {
    /// Creates a configuration with default settings for the given API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            domain: DEFAULT_DOMAIN.to_string(),
            template: DEFAULT_TEMPLATE.to_string(),
            secure: true,
            request_timeout: Duration::from_secs(60),
        }
    }

    /// Sets the E2B domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Sets the sandbox template.
    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Sets whether sandboxes are created in secure mode.
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Sets the per-request deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Control plane base URL.
    #[must_use]
    pub fn api_url(&self) -> String {
        format!("https://api.{}", self.domain)
    }

    /// Checks that the configuration can reach E2B.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the API key or domain is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Missing {
                name: "E2B_API_KEY",
            });
        }
        if self.domain.trim().is_empty() {
            return Err(ConfigError::Missing { name: "E2B_DOMAIN" });
        }
        Ok(())
    }
}

/// Provider that allocates E2B cloud sandboxes.
#[derive(Debug, Clone)]
pub struct E2bProvider {
    client: reqwest::Client,
    config: Arc<E2bConfig>,
}

impl E2bProvider {
    /// Creates a provider.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Http` if the HTTP client cannot be built.
    pub fn new(config: E2bConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("e2b-mcp-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Http {
                context: "failed to build HTTP client".to_string(),
                source: e,
            })?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    /// Returns a reference to the configuration.
    #[must_use]
    pub fn config(&self) -> &E2bConfig {
        &self.config
    }
}

#[async_trait]
impl SandboxProvider for E2bProvider {
    #[instrument(skip(self))]
    async fn create(&self, timeout: Duration) -> Result<SandboxRef, ProviderError> {
        let timeout_secs = api::timeout_secs(timeout.as_millis());
        let created = api::create_sandbox(&self.client, &self.config, timeout_secs).await?;

        let domain = created
            .domain
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| self.config.domain.clone());
        info!(id = %created.sandbox_id, timeout_secs, "E2B sandbox created");

        Ok(Arc::new(E2bSandbox {
            id: created.sandbox_id,
            domain,
            access_token: created.envd_access_token,
            client: self.client.clone(),
            config: Arc::clone(&self.config),
        }))
    }
}

/// A live E2B sandbox.
pub struct E2bSandbox {
    id: String,
    domain: String,
    access_token: Option<String>,
    client: reqwest::Client,
    config: Arc<E2bConfig>,
}

impl std::fmt::Debug for E2bSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("E2bSandbox")
            .field("id", &self.id)
            .field("domain", &self.domain)
            .field("secure", &self.access_token.is_some())
            .finish_non_exhaustive()
    }
}

impl E2bSandbox {
    /// Host name routing to `port` inside this sandbox.
    pub(crate) fn host_name(&self, port: u16) -> String {
        format!("{port}-{}.{}", self.id, self.domain)
    }
}

/// Signs a file URL the way `envd` verifies it.
///
/// The signature is `v1_` followed by the unpadded base64 SHA-256 of
/// `path:operation:user:token`, with `:expiration` appended when set.
#[must_use]
pub fn file_signature(
    path: &str,
    operation: &str,
    user: &str,
    access_token: &str,
    expiration: Option<i64>,
) -> String {
    let mut raw = format!("{path}:{operation}:{user}:{access_token}");
    if let Some(expiration) = expiration {
        raw.push_str(&format!(":{expiration}"));
    }
    let digest = Sha256::digest(raw.as_bytes());
    format!("v1_{}", STANDARD_NO_PAD.encode(digest))
}

#[async_trait]
impl Sandbox for E2bSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_command(
        &self,
        command: &str,
        background: bool,
    ) -> Result<CommandResult, ProviderError> {
        self.envd_run_command(command, background).await
    }

    async fn read_file(&self, path: &str) -> Result<String, ProviderError> {
        self.envd_read_file(path).await
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), ProviderError> {
        self.envd_write_file(path, contents).await
    }

    async fn list_files(&self, path: &str) -> Result<Vec<EntryInfo>, ProviderError> {
        self.envd_list_dir(path).await
    }

    async fn run_code(&self, code: &str) -> Result<Execution, ProviderError> {
        self.interpreter_run_code(code).await
    }

    fn host(&self, port: u16) -> String {
        self.host_name(port)
    }

    fn download_url(
        &self,
        path: &str,
        signature_expiration_secs: Option<u64>,
    ) -> Result<String, ProviderError> {
        let base = format!("{}/files", self.envd_url());
        let mut params = vec![
            ("path".to_string(), path.to_string()),
            ("username".to_string(), DEFAULT_USER.to_string()),
        ];

        match (&self.access_token, signature_expiration_secs) {
            (Some(token), expiration_secs) => {
                let expiration = expiration_secs
                    .map(|secs| {
                        i64::try_from(secs)
                            .ok()
                            .and_then(|secs| chrono::Utc::now().timestamp().checked_add(secs))
                            .ok_or_else(|| ProviderError::Failed {
                                reason: format!("signature expiration of {secs}s is out of range"),
                            })
                    })
                    .transpose()?;
                let signature = file_signature(path, "read", DEFAULT_USER, token, expiration);
                params.push(("signature".to_string(), signature));
                if let Some(expiration) = expiration {
                    params.push(("signature_expiration".to_string(), expiration.to_string()));
                }
            }
            (None, Some(_)) => {
                return Err(ProviderError::Failed {
                    reason: "signature expiration requires a secure sandbox".to_string(),
                });
            }
            (None, None) => {}
        }

        let url = reqwest::Url::parse_with_params(&base, &params).map_err(|e| {
            ProviderError::Protocol {
                reason: format!("invalid download URL: {e}"),
            }
        })?;
        Ok(url.to_string())
    }

    #[instrument(skip(self), fields(id = %self.id))]
    async fn kill(&self) -> Result<(), ProviderError> {
        api::kill_sandbox(&self.client, &self.config, &self.id).await?;
        debug!("E2B sandbox killed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox(token: Option<&str>) -> E2bSandbox {
        E2bSandbox {
            id: "sbx123".to_string(),
            domain: DEFAULT_DOMAIN.to_string(),
            access_token: token.map(str::to_string),
            client: reqwest::Client::new(),
            config: Arc::new(E2bConfig::new("key")),
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = E2bConfig::new("key");
        assert_eq!(config.domain, "e2b.app");
        assert_eq!(config.template, "code-interpreter-v1");
        assert_eq!(config.api_url(), "https://api.e2b.app");
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        config.validate().expect("config should be valid");
    }

    #[test]
    fn test_config_requires_api_key() {
        assert!(matches!(
            E2bConfig::new("  ").validate(),
            Err(ConfigError::Missing {
                name: "E2B_API_KEY"
            })
        ));
    }

    #[test]
    fn test_config_debug_hides_key() {
        let rendered = format!("{:?}", E2bConfig::new("super-secret"));
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn test_host_names() {
        let sbx = sandbox(None);
        assert_eq!(sbx.host(3000), "3000-sbx123.e2b.app");
        assert_eq!(sbx.envd_url(), "https://49983-sbx123.e2b.app");
    }

    #[test]
    fn test_signature_is_stable() {
        let a = file_signature("/home/user/a.txt", "read", "user", "tok", None);
        let b = file_signature("/home/user/a.txt", "read", "user", "tok", None);
        let c = file_signature("/home/user/a.txt", "read", "user", "tok", Some(1_700_000_000));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("v1_"));
        assert!(!a.ends_with('='));
        // 32 byte digest is 43 unpadded base64 characters
        assert_eq!(a.len(), 3 + 43);
    }

    #[test]
    fn test_download_url_unsigned() {
        let url = sandbox(None)
            .download_url("/home/user/out.csv", None)
            .expect("download url");
        assert_eq!(
            url,
            "https://49983-sbx123.e2b.app/files?path=%2Fhome%2Fuser%2Fout.csv&username=user"
        );
    }

    #[test]
    fn test_download_url_rejects_overflowing_expiration() {
        let err = sandbox(Some("tok"))
            .download_url("/tmp/a.txt", Some(i64::MAX as u64))
            .expect_err("expiration past the end of time");
        assert!(matches!(err, ProviderError::Failed { .. }));

        let err = sandbox(Some("tok"))
            .download_url("/tmp/a.txt", Some(u64::MAX))
            .expect_err("expiration beyond i64");
        assert!(matches!(err, ProviderError::Failed { .. }));
    }

    #[test]
    fn test_download_url_signed() {
        let url = sandbox(Some("tok"))
            .download_url("/tmp/a.txt", Some(60))
            .expect("download url");
        assert!(url.contains("signature=v1_"));
        assert!(url.contains("signature_expiration="));
    }

    #[test]
    fn test_download_url_expiration_needs_token() {
        assert!(sandbox(None).download_url("/tmp/a.txt", Some(60)).is_err());
    }
}

//! E2B control plane: sandbox allocation and teardown.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::E2bConfig;
use crate::error::ProviderError;

const API_KEY_HEADER: &str = "X-API-KEY";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewSandbox<'a> {
    #[serde(rename = "templateID")]
    template_id: &'a str,
    /// Lifetime in seconds.
    timeout: u64,
    secure: bool,
}

/// Sandbox as returned by `POST /sandboxes`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSandbox {
    #[serde(rename = "sandboxID")]
    pub sandbox_id: String,
    #[serde(rename = "templateID", default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub envd_version: Option<String>,
    #[serde(default)]
    pub envd_access_token: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

/// Converts a millisecond timeout to whole seconds, rounding up.
pub(crate) fn timeout_secs(timeout_ms: u128) -> u64 {
    u64::try_from(timeout_ms.div_ceil(1_000)).unwrap_or(u64::MAX)
}

/// Allocates a new sandbox.
#[instrument(skip(client, config), fields(template = %config.template))]
pub async fn create_sandbox(
    client: &reqwest::Client,
    config: &E2bConfig,
    timeout_secs: u64,
) -> Result<CreatedSandbox, ProviderError> {
    let url = format!("{}/sandboxes", config.api_url());
    let body = NewSandbox {
        template_id: &config.template,
        timeout: timeout_secs,
        secure: config.secure,
    };

    let response = client
        .post(&url)
        .header(API_KEY_HEADER, &config.api_key)
        .timeout(config.request_timeout)
        .json(&body)
        .send()
        .await
        .map_err(|e| ProviderError::Http {
            context: format!("POST {url}"),
            source: e,
        })?;

    let response = check_status(response).await?;
    let created: CreatedSandbox = response.json().await.map_err(|e| ProviderError::Protocol {
        reason: format!("invalid create response: {e}"),
    })?;

    debug!(
        id = %created.sandbox_id,
        template = ?created.template_id,
        envd = ?created.envd_version,
        "Sandbox allocated"
    );
    Ok(created)
}

/// Kills a sandbox.
#[instrument(skip(client, config))]
pub async fn kill_sandbox(
    client: &reqwest::Client,
    config: &E2bConfig,
    sandbox_id: &str,
) -> Result<(), ProviderError> {
    let url = format!("{}/sandboxes/{sandbox_id}", config.api_url());

    let response = client
        .delete(&url)
        .header(API_KEY_HEADER, &config.api_key)
        .timeout(config.request_timeout)
        .send()
        .await
        .map_err(|e| ProviderError::Http {
            context: format!("DELETE {url}"),
            source: e,
        })?;

    check_status(response).await?;
    Ok(())
}

/// Turns a non-success response into a `ProviderError`, keeping the body as the message.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::from_status(status.as_u16(), error_message(&body, status)))
}

/// Extracts the `message` field of a JSON error body, falling back to the raw text.
fn error_message(body: &str, status: reqwest::StatusCode) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.message,
        Err(_) if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        Err(_) => body.trim().to_string(),
    }
}

//! Code interpreter running inside code-interpreter sandboxes.
//!
//! `POST /execute` answers with newline-delimited JSON, one message per line.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::E2bSandbox;
use super::api::check_status;
use crate::error::ProviderError;
use crate::provider::{Execution, ExecutionError};

/// Port the Jupyter-backed interpreter listens on.
pub const INTERPRETER_PORT: u16 = 49999;

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    code: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputMessage {
    Stdout {
        #[serde(default)]
        text: String,
    },
    Stderr {
        #[serde(default)]
        text: String,
    },
    Result {
        #[serde(default)]
        text: Option<String>,
    },
    Error {
        #[serde(default)]
        name: String,
        #[serde(default)]
        value: String,
        #[serde(default)]
        traceback: String,
    },
    #[serde(other)]
    Other,
}

/// Folds an NDJSON interpreter response into an `Execution`.
pub(crate) fn parse_execution(body: &str) -> Result<Execution, ProviderError> {
    let mut execution = Execution::default();

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let message: OutputMessage =
            serde_json::from_str(line).map_err(|e| ProviderError::Protocol {
                reason: format!("invalid interpreter message: {e}"),
            })?;

        match message {
            OutputMessage::Stdout { text } => execution.stdout.push(text),
            OutputMessage::Stderr { text } => execution.stderr.push(text),
            OutputMessage::Result { text } => execution.results.extend(text),
            OutputMessage::Error {
                name,
                value,
                traceback,
            } => {
                execution.error = Some(ExecutionError {
                    name,
                    value,
                    traceback,
                });
            }
            OutputMessage::Other => {}
        }
    }

    Ok(execution)
}

impl E2bSandbox {
    /// Runs `code` in the sandbox's default interpreter context.
    #[instrument(skip(self, code), fields(id = %self.id, chars = code.len()))]
    pub(crate) async fn interpreter_run_code(&self, code: &str) -> Result<Execution, ProviderError> {
        let url = format!("https://{}/execute", self.host_name(INTERPRETER_PORT));
        let mut builder = self
            .client
            .post(&url)
            .timeout(self.config.request_timeout)
            .json(&ExecuteRequest { code });
        if let Some(token) = &self.access_token {
            builder = builder.header("X-Access-Token", token);
        }

        let response = builder.send().await.map_err(|e| ProviderError::Http {
            context: format!("POST {url}"),
            source: e,
        })?;
        let body = check_status(response)
            .await?
            .text()
            .await
            .map_err(|e| ProviderError::Http {
                context: "read execution output".to_string(),
                source: e,
            })?;

        let execution = parse_execution(&body)?;
        debug!(
            stdout = execution.stdout.len(),
            stderr = execution.stderr.len(),
            failed = execution.error.is_some(),
            "Code execution finished"
        );
        Ok(execution)
    }
}

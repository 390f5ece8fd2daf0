//! Client for `envd`, the daemon running inside every E2B sandbox.
//!
//! `envd` serves two kinds of endpoints:
//!
//! - plain HTTP `/files` for reading and uploading files
//! - Connect RPC services (`filesystem.Filesystem`, `process.Process`) using
//!   the JSON codec
//!
//! # Connect streaming framing
//!
//! Server-streaming calls exchange *envelopes*: one flags byte, a big-endian
//! `u32` payload length, then the JSON payload. The final envelope has the
//! end-of-stream flag set and may carry an error.
//!
//! ```text
//! +-------+----------------+-------------------+
//! | flags | length (u32be) | payload (length)  |
//! +-------+----------------+-------------------+
//! ```

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::E2bSandbox;
use super::api::check_status;
use crate::error::ProviderError;
use crate::provider::{CommandOutput, CommandResult, EntryInfo, FileType};

/// Port `envd` listens on inside the sandbox.
pub const ENVD_PORT: u16 = 49983;

/// Default user commands and file operations run as.
pub const DEFAULT_USER: &str = "user";

const ACCESS_TOKEN_HEADER: &str = "X-Access-Token";
const CONNECT_PROTOCOL_VERSION: &str = "1";
const ENVELOPE_HEADER_LEN: usize = 5;
const END_STREAM_FLAG: u8 = 0x02;

/// One decoded Connect envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Returns true for the trailing end-of-stream envelope.
    #[must_use]
    pub fn is_end_stream(&self) -> bool {
        self.flags & END_STREAM_FLAG != 0
    }
}

/// Wraps a JSON message in a Connect envelope.
#[must_use]
pub fn encode_envelope(payload: &[u8]) -> Vec<u8> {
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    let mut out = Vec::with_capacity(ENVELOPE_HEADER_LEN + payload.len());
    out.push(0);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Incremental decoder for a stream of Connect envelopes.
///
/// Network chunks do not line up with envelope boundaries, so bytes are
/// buffered until a whole envelope is available.
#[derive(Debug, Default)]
pub struct EnvelopeDecoder {
    buf: Vec<u8>,
}

impl EnvelopeDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes received from the network.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pops the next complete envelope, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Frame> {
        if self.buf.len() < ENVELOPE_HEADER_LEN {
            return None;
        }
        let len_bytes = [self.buf[1], self.buf[2], self.buf[3], self.buf[4]];
        let len = u32::from_be_bytes(len_bytes) as usize;
        if self.buf.len() < ENVELOPE_HEADER_LEN + len {
            return None;
        }

        let flags = self.buf[0];
        let payload = self.buf[ENVELOPE_HEADER_LEN..ENVELOPE_HEADER_LEN + len].to_vec();
        self.buf.drain(..ENVELOPE_HEADER_LEN + len);
        Some(Frame { flags, payload })
    }

    /// Number of buffered bytes not yet returned as a frame.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

// =============================================================================
// Process service messages
// =============================================================================

#[derive(Debug, Serialize)]
struct StartRequest<'a> {
    process: ProcessConfig<'a>,
    stdin: bool,
}

#[derive(Debug, Serialize)]
struct ProcessConfig<'a> {
    cmd: &'a str,
    args: Vec<&'a str>,
    envs: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct StartResponse {
    #[serde(default)]
    event: Option<ProcessEvent>,
}

#[derive(Debug, Default, Deserialize)]
struct ProcessEvent {
    #[serde(default)]
    start: Option<StartEvent>,
    #[serde(default)]
    data: Option<DataEvent>,
    #[serde(default)]
    end: Option<EndEvent>,
}

#[derive(Debug, Deserialize)]
struct StartEvent {
    pid: u32,
}

#[derive(Debug, Default, Deserialize)]
struct DataEvent {
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndEvent {
    #[serde(default)]
    exit_code: i32,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EndOfStream {
    #[serde(default)]
    error: Option<ConnectError>,
}

#[derive(Debug, Deserialize)]
struct ConnectError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl ConnectError {
    fn into_provider_error(self) -> ProviderError {
        let status = match self.code.as_str() {
            "unauthenticated" => 401,
            "permission_denied" => 403,
            "resource_exhausted" => 429,
            "not_found" => 404,
            "invalid_argument" => 400,
            _ => 500,
        };
        ProviderError::from_status(status, format!("{}: {}", self.code, self.message))
    }
}

/// What the process stream has produced so far.
#[derive(Debug, Default)]
struct ProcessState {
    pid: Option<u32>,
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
}

impl ProcessState {
    /// Applies one message; returns true once the process has ended.
    fn apply(&mut self, message: StartResponse) -> Result<bool, ProviderError> {
        let Some(event) = message.event else {
            return Ok(false);
        };

        if let Some(start) = event.start {
            trace!(pid = start.pid, "Process started");
            self.pid = Some(start.pid);
        }
        if let Some(data) = event.data {
            if let Some(chunk) = data.stdout {
                self.stdout.push_str(&decode_output(&chunk)?);
            }
            if let Some(chunk) = data.stderr {
                self.stderr.push_str(&decode_output(&chunk)?);
            }
        }
        if let Some(end) = event.end {
            if let Some(error) = end.error.filter(|e| !e.is_empty()) {
                self.stderr.push_str(&error);
            }
            self.exit_code = Some(end.exit_code);
            return Ok(true);
        }
        Ok(false)
    }
}

fn decode_output(chunk: &str) -> Result<String, ProviderError> {
    let bytes = STANDARD
        .decode(chunk)
        .map_err(|e| ProviderError::Protocol {
            reason: format!("invalid base64 process output: {e}"),
        })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn parse_json<T: for<'de> Deserialize<'de>>(payload: &[u8], what: &str) -> Result<T, ProviderError> {
    serde_json::from_slice(payload).map_err(|e| ProviderError::Protocol {
        reason: format!("invalid {what}: {e}"),
    })
}

// =============================================================================
// Filesystem service messages
// =============================================================================

#[derive(Debug, Serialize)]
struct ListDirRequest<'a> {
    path: &'a str,
    depth: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ListDirResponse {
    #[serde(default)]
    entries: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
}

impl RawEntry {
    fn into_entry(self) -> Option<EntryInfo> {
        let kind = match self.kind.as_str() {
            "FILE_TYPE_FILE" => FileType::File,
            "FILE_TYPE_DIRECTORY" => FileType::Dir,
            _ => return None,
        };
        Some(EntryInfo::new(self.name, kind))
    }
}

// =============================================================================
// Requests
// =============================================================================

impl E2bSandbox {
    /// Base URL of this sandbox's `envd`.
    pub(crate) fn envd_url(&self) -> String {
        format!("https://{}", self.host_name(ENVD_PORT))
    }

    fn envd_request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.envd_url());
        let user = STANDARD.encode(format!("{DEFAULT_USER}:"));
        let mut builder = self
            .client
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, format!("Basic {user}"))
            .timeout(self.config.request_timeout);
        if let Some(token) = &self.access_token {
            builder = builder.header(ACCESS_TOKEN_HEADER, token);
        }
        builder
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = builder.send().await.map_err(|e| ProviderError::Http {
            context: context.to_string(),
            source: e,
        })?;
        check_status(response).await
    }

    /// Reads a file via `GET /files`.
    pub(crate) async fn envd_read_file(&self, path: &str) -> Result<String, ProviderError> {
        let builder = self
            .envd_request(reqwest::Method::GET, "/files")
            .query(&[("path", path), ("username", DEFAULT_USER)]);
        let response = self.send(builder, &format!("read {path}")).await?;

        response.text().await.map_err(|e| ProviderError::Http {
            context: format!("read body of {path}"),
            source: e,
        })
    }

    /// Uploads a file via multipart `POST /files`.
    pub(crate) async fn envd_write_file(
        &self,
        path: &str,
        contents: &str,
    ) -> Result<(), ProviderError> {
        let part = Part::text(contents.to_string()).file_name(path.to_string());
        let form = Form::new().part("file", part);
        let builder = self
            .envd_request(reqwest::Method::POST, "/files")
            .query(&[("path", path), ("username", DEFAULT_USER)])
            .multipart(form);
        self.send(builder, &format!("write {path}")).await?;
        Ok(())
    }

    /// Lists one level of a directory via `filesystem.Filesystem/ListDir`.
    pub(crate) async fn envd_list_dir(&self, path: &str) -> Result<Vec<EntryInfo>, ProviderError> {
        let builder = self
            .envd_request(reqwest::Method::POST, "/filesystem.Filesystem/ListDir")
            .header("Connect-Protocol-Version", CONNECT_PROTOCOL_VERSION)
            .json(&ListDirRequest { path, depth: 1 });
        let response = self.send(builder, &format!("list {path}")).await?;

        let listing: ListDirResponse = response.json().await.map_err(|e| ProviderError::Protocol {
            reason: format!("invalid ListDir response: {e}"),
        })?;
        Ok(listing
            .entries
            .into_iter()
            .filter_map(RawEntry::into_entry)
            .collect())
    }

    /// Starts `command` under `bash -l -c` via `process.Process/Start`.
    ///
    /// In the background case this returns as soon as the process reports its
    /// pid; otherwise the output stream is drained until the process ends.
    pub(crate) async fn envd_run_command(
        &self,
        command: &str,
        background: bool,
    ) -> Result<CommandResult, ProviderError> {
        let request = StartRequest {
            process: ProcessConfig {
                cmd: "/bin/bash",
                args: vec!["-l", "-c", command],
                envs: HashMap::new(),
            },
            stdin: false,
        };
        let body = serde_json::to_vec(&request).map_err(|e| ProviderError::Protocol {
            reason: format!("failed to encode start request: {e}"),
        })?;

        let builder = self
            .envd_request(reqwest::Method::POST, "/process.Process/Start")
            .header("Connect-Protocol-Version", CONNECT_PROTOCOL_VERSION)
            .header(reqwest::header::CONTENT_TYPE, "application/connect+json")
            .body(encode_envelope(&body));
        let mut response = self.send(builder, "start process").await?;

        let mut decoder = EnvelopeDecoder::new();
        let mut state = ProcessState::default();

        loop {
            while let Some(frame) = decoder.next_frame() {
                if frame.is_end_stream() {
                    let end: EndOfStream = if frame.payload.is_empty() {
                        EndOfStream::default()
                    } else {
                        parse_json(&frame.payload, "end of stream")?
                    };
                    if let Some(error) = end.error {
                        return Err(error.into_provider_error());
                    }
                    return finish(state, background);
                }

                let ended = state.apply(parse_json(&frame.payload, "process event")?)?;
                if background {
                    if let Some(pid) = state.pid {
                        debug!(pid, "Background process started");
                        return Ok(CommandResult::Background { pid });
                    }
                }
                if ended {
                    return finish(state, background);
                }
            }

            let chunk = response.chunk().await.map_err(|e| ProviderError::Http {
                context: "read process stream".to_string(),
                source: e,
            })?;
            match chunk {
                Some(bytes) => decoder.push(&bytes),
                None => return finish(state, background),
            }
        }
    }
}

/// Builds the command result once the stream is over.
fn finish(state: ProcessState, background: bool) -> Result<CommandResult, ProviderError> {
    if background {
        return state
            .pid
            .map(|pid| CommandResult::Background { pid })
            .ok_or_else(|| ProviderError::Protocol {
                reason: "process stream ended before the process started".to_string(),
            });
    }

    let exit_code = state.exit_code.ok_or_else(|| ProviderError::Protocol {
        reason: "process stream ended without an exit code".to_string(),
    })?;
    Ok(CommandResult::Foreground(CommandOutput {
        stdout: state.stdout,
        stderr: state.stderr,
        exit_code,
    }))
}

//! Integration tests for tool dispatch.
//!
//! These tests verify:
//! - Response shapes for every tool
//! - Capacity and lookup errors surface with the right kind
//! - Argument validation reports every violated field
//! - Temporary run_code sandboxes never enter the registry, and are torn
//!   down on shutdown or cancellation
//! - Provider rejections are distinguished from failures
//! - Error results carry `{error, details}`

use std::sync::Arc;

use serde_json::{Value, json};

use e2b_mcp_server::config::SandboxLimits;
use e2b_mcp_server::error::ToolError;
use e2b_mcp_server::provider::memory::{CodeGate, MemoryProvider};
use e2b_mcp_server::provider::{CommandOutput, Execution};
use e2b_mcp_server::registry::SandboxRegistry;
use e2b_mcp_server::server::{Dispatcher, SandboxServer};

/// Helper to build a dispatcher over a memory provider.
fn dispatcher_with(provider: &MemoryProvider, limits: SandboxLimits) -> Dispatcher {
    Dispatcher::new(Arc::new(SandboxRegistry::new(
        Arc::new(provider.clone()),
        limits,
    )))
}

fn dispatcher(provider: &MemoryProvider) -> Dispatcher {
    dispatcher_with(provider, SandboxLimits::default())
}

/// Helper to call a tool with a JSON object literal.
async fn call(dispatcher: &Dispatcher, name: &str, args: Value) -> Result<Value, ToolError> {
    let object = args.as_object().cloned();
    dispatcher.call(name, object.as_ref()).await
}

/// Helper to create a sandbox and return its identifier.
async fn create(dispatcher: &Dispatcher) -> String {
    let value = call(dispatcher, "create_sandbox", json!({}))
        .await
        .expect("failed to create sandbox");
    value["sandboxId"]
        .as_str()
        .expect("sandboxId should be a string")
        .to_string()
}

fn violated_fields(err: &ToolError) -> Vec<&str> {
    match err {
        ToolError::InvalidArguments { violations, .. } => {
            violations.iter().map(|v| v.field.as_str()).collect()
        }
        other => panic!("expected InvalidArguments, got {other:?}"),
    }
}

// =============================================================================
// Sandbox Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_create_sandbox_reports_timeout() {
    let provider = MemoryProvider::new();
    let dispatcher = dispatcher(&provider);

    let value = call(&dispatcher, "create_sandbox", json!({}))
        .await
        .expect("failed to create sandbox");
    let message = value["message"].as_str().expect("message");
    assert!(message.starts_with("Sandbox created successfully"));
    assert!(message.contains("5 minutes"), "message was: {message}");

    let ids = call(&dispatcher, "list_sandbox_ids", json!({}))
        .await
        .expect("failed to list sandboxes");
    assert_eq!(ids["active_sandboxes"], json!(1));
    assert_eq!(ids["max_sandboxes"], json!(10));
    assert_eq!(ids["sandbox_ids"], json!([value["sandboxId"]]));
}

#[tokio::test]
async fn test_create_sandbox_at_capacity() {
    let provider = MemoryProvider::new();
    let dispatcher = dispatcher_with(
        &provider,
        SandboxLimits::default().with_max_active_sandboxes(1),
    );

    create(&dispatcher).await;
    let err = call(&dispatcher, "create_sandbox", json!({ "timeoutMs": 60_000 }))
        .await
        .expect_err("second create should fail");
    assert!(matches!(err, ToolError::CapacityExceeded { max: 1 }));
}

#[tokio::test]
async fn test_kill_sandbox_returns_stats() {
    let provider = MemoryProvider::new();
    let dispatcher = dispatcher(&provider);

    let keep = create(&dispatcher).await;
    let id = create(&dispatcher).await;

    let value = call(&dispatcher, "kill_sandbox", json!({ "sandboxId": id }))
        .await
        .expect("failed to kill sandbox");
    assert_eq!(value["sandboxId"], json!(id));
    assert_eq!(value["message"], json!("Sandbox killed successfully"));
    assert_eq!(value["stats"]["active_sandboxes"], json!(1));
    assert_eq!(value["stats"]["sandbox_ids"], json!([keep]));

    let err = call(&dispatcher, "kill_sandbox", json!({ "sandboxId": id }))
        .await
        .expect_err("second kill should fail");
    assert!(matches!(err, ToolError::NotFound { .. }));
}

#[tokio::test]
async fn test_provider_rejection_kind() {
    let provider = MemoryProvider::new().rejecting_creates();
    let dispatcher = dispatcher(&provider);

    let err = call(&dispatcher, "create_sandbox", json!({}))
        .await
        .expect_err("create should be rejected");
    assert!(matches!(err, ToolError::ProviderRejected { .. }));

    let provider = MemoryProvider::new().failing_creates();
    let dispatcher = self::dispatcher(&provider);
    let err = call(&dispatcher, "create_sandbox", json!({}))
        .await
        .expect_err("create should fail");
    assert!(matches!(err, ToolError::OperationFailed { .. }));
}

// =============================================================================
// Command Tests
// =============================================================================

#[tokio::test]
async fn test_run_command_foreground() {
    let provider = MemoryProvider::new().with_command_output(CommandOutput {
        stdout: "hello\n".into(),
        stderr: String::new(),
        exit_code: 0,
    });
    let dispatcher = dispatcher(&provider);
    let id = create(&dispatcher).await;

    let value = call(
        &dispatcher,
        "run_command",
        json!({ "sandboxId": id, "command": "echo hello" }),
    )
    .await
    .expect("failed to run command");
    assert_eq!(
        value,
        json!({ "stdout": "hello\n", "stderr": "", "exit_code": 0, "sandboxId": id })
    );
}

#[tokio::test]
async fn test_run_command_nonzero_exit_is_not_an_error() {
    let provider = MemoryProvider::new().with_command_output(CommandOutput {
        stdout: String::new(),
        stderr: "ls: cannot access 'missing'\n".into(),
        exit_code: 2,
    });
    let dispatcher = dispatcher(&provider);
    let id = create(&dispatcher).await;

    let value = call(
        &dispatcher,
        "run_command",
        json!({ "sandboxId": id, "command": "ls missing" }),
    )
    .await
    .expect("non-zero exit is still a result");
    assert_eq!(value["exit_code"], json!(2));
}

#[tokio::test]
async fn test_run_command_background() {
    let provider = MemoryProvider::new();
    let dispatcher = dispatcher(&provider);
    let id = create(&dispatcher).await;

    let value = call(
        &dispatcher,
        "run_command",
        json!({ "sandboxId": id, "command": "python -m http.server", "background": true }),
    )
    .await
    .expect("failed to start command");
    assert_eq!(value["message"], json!("Command started in background"));
    assert!(value["pid"].as_u64().is_some());
    assert_eq!(value["sandboxId"], json!(id));
    assert!(value.get("stdout").is_none());
}

#[tokio::test]
async fn test_operation_failure_kind() {
    let provider = MemoryProvider::new().failing_operations();
    let dispatcher = dispatcher(&provider);
    let id = create(&dispatcher).await;

    let err = call(
        &dispatcher,
        "run_command",
        json!({ "sandboxId": id, "command": "true" }),
    )
    .await
    .expect_err("command should fail");
    assert!(matches!(
        err,
        ToolError::OperationFailed {
            operation: "run command",
            ..
        }
    ));
    assert!(err.details().is_some());
}

// =============================================================================
// File Tests
// =============================================================================

#[tokio::test]
async fn test_write_then_read_file() {
    let provider = MemoryProvider::new();
    let dispatcher = dispatcher(&provider);
    let id = create(&dispatcher).await;
    let contents = "héllo wörld\n";

    let written = call(
        &dispatcher,
        "write_file",
        json!({ "sandboxId": id, "filePath": "/tmp/greeting.txt", "fileContents": contents }),
    )
    .await
    .expect("failed to write file");
    assert_eq!(written["message"], json!("File written successfully"));
    assert_eq!(written["size"], json!(contents.len()));
    assert_eq!(written["filePath"], json!("/tmp/greeting.txt"));

    let read = call(
        &dispatcher,
        "read_file",
        json!({ "sandboxId": id, "filePath": "/tmp/greeting.txt" }),
    )
    .await
    .expect("failed to read file");
    assert_eq!(read["content"], json!(contents));
    assert_eq!(read["sandboxId"], json!(id));
}

#[tokio::test]
async fn test_list_files() {
    let provider = MemoryProvider::new();
    let dispatcher = dispatcher(&provider);
    let id = create(&dispatcher).await;

    let empty = call(
        &dispatcher,
        "list_files",
        json!({ "sandboxId": id, "folderPath": "/tmp" }),
    )
    .await
    .expect("failed to list files");
    assert_eq!(empty["files"], json!([]));
    assert_eq!(empty["count"], json!(0));

    call(
        &dispatcher,
        "write_file",
        json!({ "sandboxId": id, "filePath": "/tmp/project/main.py", "fileContents": "print(1)" }),
    )
    .await
    .expect("failed to write file");
    call(
        &dispatcher,
        "write_file",
        json!({ "sandboxId": id, "filePath": "/tmp/notes.md", "fileContents": "" }),
    )
    .await
    .expect("failed to write file");

    let listed = call(
        &dispatcher,
        "list_files",
        json!({ "sandboxId": id, "folderPath": "/tmp" }),
    )
    .await
    .expect("failed to list files");
    assert_eq!(listed["count"], json!(2));
    assert_eq!(
        listed["files"],
        json!([
            { "name": "notes.md", "type": "file" },
            { "name": "project", "type": "dir" },
        ])
    );
}

#[tokio::test]
async fn test_read_missing_file_fails() {
    let provider = MemoryProvider::new();
    let dispatcher = dispatcher(&provider);
    let id = create(&dispatcher).await;

    let err = call(
        &dispatcher,
        "read_file",
        json!({ "sandboxId": id, "filePath": "/tmp/absent" }),
    )
    .await
    .expect_err("missing file should fail");
    assert!(matches!(
        err,
        ToolError::OperationFailed {
            operation: "read file",
            ..
        }
    ));
}

#[tokio::test]
async fn test_unknown_sandbox_is_not_found() {
    let provider = MemoryProvider::new();
    let dispatcher = dispatcher(&provider);

    let err = call(
        &dispatcher,
        "read_file",
        json!({ "sandboxId": "ghost", "filePath": "/etc/hosts" }),
    )
    .await
    .expect_err("unknown sandbox");
    assert!(matches!(err, ToolError::NotFound { ref id } if id == "ghost"));
}

// =============================================================================
// URL Tests
// =============================================================================

#[tokio::test]
async fn test_urls() {
    let provider = MemoryProvider::new();
    let dispatcher = dispatcher(&provider);
    let id = create(&dispatcher).await;

    let url = call(
        &dispatcher,
        "get_sandbox_url",
        json!({ "sandboxId": id, "port": 3000 }),
    )
    .await
    .expect("failed to get sandbox url");
    assert_eq!(url["port"], json!(3000));
    assert!(
        url["url"]
            .as_str()
            .expect("url")
            .starts_with(&format!("https://3000-{id}"))
    );

    let download = call(
        &dispatcher,
        "get_file_download_url",
        json!({ "sandboxId": id, "filePath": "/tmp/out.csv", "useSignatureExpiration": 60 }),
    )
    .await
    .expect("failed to get download url");
    assert_eq!(download["filePath"], json!("/tmp/out.csv"));
    assert!(download["url"].as_str().expect("url").contains("out.csv"));
}

// =============================================================================
// Code Execution Tests
// =============================================================================

#[tokio::test]
async fn test_run_code_in_existing_sandbox() {
    let provider = MemoryProvider::new().with_code_output(Execution {
        stdout: vec!["3\n".into()],
        ..Execution::default()
    });
    let dispatcher = dispatcher(&provider);
    let id = create(&dispatcher).await;

    let value = call(
        &dispatcher,
        "run_code",
        json!({ "sandboxId": id, "code": "print(1 + 2)" }),
    )
    .await
    .expect("failed to run code");
    assert_eq!(value["stdout"], json!(["3\n"]));
    assert_eq!(value["stderr"], json!([]));
    assert_eq!(value["sandboxId"], json!(id));
    assert!(value.get("message").is_none());
    assert!(provider.killed().is_empty());
}

#[tokio::test]
async fn test_run_code_temporary_sandbox_is_untracked() {
    let gate = Arc::new(CodeGate::default());
    let provider = MemoryProvider::new().with_code_gate(Arc::clone(&gate));
    let dispatcher = Arc::new(dispatcher_with(
        &provider,
        SandboxLimits::default().with_max_active_sandboxes(1),
    ));
    create(&dispatcher).await;

    let running = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            call(&dispatcher, "run_code", json!({ "code": "print('hi')" })).await
        })
    };

    // Mid-execution: the registry is full, yet the temporary sandbox exists
    gate.wait_started().await;
    let ids = call(&dispatcher, "list_sandbox_ids", json!({}))
        .await
        .expect("failed to list sandboxes");
    assert_eq!(ids["active_sandboxes"], json!(1));
    assert_eq!(provider.created().len(), 2);

    gate.release();
    let value = running
        .await
        .expect("run_code task panicked")
        .expect("failed to run code");
    assert_eq!(value["message"], json!("Executed in temporary sandbox"));
    assert!(value.get("sandboxId").is_none());

    let temporary = provider.created()[1].clone();
    assert_eq!(provider.killed(), vec![temporary]);
    assert_eq!(
        call(&dispatcher, "list_sandbox_ids", json!({}))
            .await
            .expect("failed to list sandboxes")["active_sandboxes"],
        json!(1)
    );
}

#[tokio::test]
async fn test_run_code_teardown_failure_keeps_result() {
    let provider = MemoryProvider::new().failing_kills();
    let dispatcher = dispatcher(&provider);

    let value = call(&dispatcher, "run_code", json!({ "code": "x = 1" }))
        .await
        .expect("teardown failure should not fail the call");
    assert_eq!(value["message"], json!("Executed in temporary sandbox"));
    assert_eq!(provider.killed().len(), 1);
}

#[tokio::test]
async fn test_shutdown_cleanup_reaches_running_temporary_sandbox() {
    let gate = Arc::new(CodeGate::default());
    let provider = MemoryProvider::new().with_code_gate(Arc::clone(&gate));
    let dispatcher = Arc::new(dispatcher(&provider));

    let running = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            call(&dispatcher, "run_code", json!({ "code": "import time" })).await
        })
    };

    gate.wait_started().await;
    let report = dispatcher.registry().cleanup_all().await;
    assert_eq!(report.total(), 1);
    assert_eq!(provider.killed(), provider.created());

    // The run finishes normally and does not tear the sandbox down twice
    gate.release();
    let value = running
        .await
        .expect("run_code task panicked")
        .expect("failed to run code");
    assert_eq!(value["message"], json!("Executed in temporary sandbox"));
    assert_eq!(provider.killed().len(), 1);
}

#[tokio::test]
async fn test_cancelled_run_code_tears_down_temporary_sandbox() {
    let gate = Arc::new(CodeGate::default());
    let provider = MemoryProvider::new().with_code_gate(Arc::clone(&gate));
    let dispatcher = Arc::new(dispatcher(&provider));

    let running = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            call(&dispatcher, "run_code", json!({ "code": "while True: pass" })).await
        })
    };

    gate.wait_started().await;
    running.abort();
    assert!(
        running
            .await
            .expect_err("task should be cancelled")
            .is_cancelled()
    );

    for _ in 0..100 {
        if !provider.killed().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(provider.killed(), provider.created());

    let report = dispatcher.registry().cleanup_all().await;
    assert_eq!(report.total(), 0);
}

// =============================================================================
// Validation Tests
// =============================================================================

#[tokio::test]
async fn test_unknown_tool() {
    let provider = MemoryProvider::new();
    let dispatcher = dispatcher(&provider);

    let err = call(&dispatcher, "delete_everything", json!({}))
        .await
        .expect_err("unknown tool");
    assert!(matches!(err, ToolError::UnknownOperation { .. }));
}

#[tokio::test]
async fn test_invalid_arguments_list_every_field() {
    let provider = MemoryProvider::new();
    let dispatcher = dispatcher(&provider);

    let err = call(
        &dispatcher,
        "write_file",
        json!({ "sandboxId": 42, "filePath": "" }),
    )
    .await
    .expect_err("invalid arguments");
    assert_eq!(
        violated_fields(&err),
        vec!["sandboxId", "filePath", "fileContents"]
    );

    let err = call(&dispatcher, "create_sandbox", json!({ "timeoutMs": 500 }))
        .await
        .expect_err("timeout below minimum");
    assert_eq!(violated_fields(&err), vec!["timeoutMs"]);

    let err = call(
        &dispatcher,
        "get_sandbox_url",
        json!({ "sandboxId": "x", "port": 70000 }),
    )
    .await
    .expect_err("port out of range");
    assert_eq!(violated_fields(&err), vec!["port"]);

    for expiration in [json!(0), json!(9_223_372_036_854_775_807_u64)] {
        let err = call(
            &dispatcher,
            "get_file_download_url",
            json!({ "sandboxId": "x", "filePath": "/tmp/a", "useSignatureExpiration": expiration }),
        )
        .await
        .expect_err("signature expiration out of range");
        assert_eq!(violated_fields(&err), vec!["useSignatureExpiration"]);
    }

    // Validation happens before any provider call
    assert!(provider.created().is_empty());
}

// =============================================================================
// Transport Mapping Tests
// =============================================================================

#[tokio::test]
async fn test_server_wraps_errors_as_results() {
    let server = SandboxServer::new(Arc::new(SandboxRegistry::new(
        Arc::new(MemoryProvider::new()),
        SandboxLimits::default(),
    )));

    let args = json!({ "sandboxId": "missing" });
    let result = server
        .handle_call("kill_sandbox", args.as_object())
        .await;
    assert_eq!(result.is_error, Some(true));

    let text = &result
        .content
        .first()
        .expect("one content item")
        .as_text()
        .expect("text content")
        .text;
    let body: Value = serde_json::from_str(text).expect("error body is JSON");
    assert_eq!(body["error"], json!("Sandbox missing not found"));

    let result = server.handle_call("list_sandbox_ids", None).await;
    assert_ne!(result.is_error, Some(true));
}

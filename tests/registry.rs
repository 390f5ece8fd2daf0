//! Integration tests for the sandbox registry.
//!
//! These tests verify:
//! - Capacity is never exceeded, even under concurrent creates
//! - Timeout defaulting and clamping
//! - Lookup and kill of unknown identifiers
//! - Forced removal when teardown fails
//! - Cleanup empties the table and reports every failure

use std::sync::Arc;
use std::time::Duration;

use e2b_mcp_server::config::SandboxLimits;
use e2b_mcp_server::error::RegistryError;
use e2b_mcp_server::provider::memory::MemoryProvider;
use e2b_mcp_server::registry::SandboxRegistry;

/// Helper to build a registry over a memory provider with the given capacity.
fn registry_with(provider: &MemoryProvider, max: usize) -> Arc<SandboxRegistry> {
    Arc::new(SandboxRegistry::new(
        Arc::new(provider.clone()),
        SandboxLimits::default().with_max_active_sandboxes(max),
    ))
}

// =============================================================================
// Capacity Tests
// =============================================================================

#[tokio::test]
async fn test_capacity_rejects_at_limit() {
    let provider = MemoryProvider::new();
    let registry = registry_with(&provider, 2);

    registry.create(None).await.expect("failed to create first sandbox");
    registry.create(None).await.expect("failed to create second sandbox");

    let err = registry
        .create(None)
        .await
        .expect_err("third create should be rejected");
    assert!(matches!(err, RegistryError::CapacityExceeded { max: 2 }));

    let stats = registry.stats().await;
    assert_eq!(stats.active_sandboxes, 2);
    assert_eq!(stats.max_sandboxes, 2);
    assert_eq!(provider.created().len(), 2);
}

#[tokio::test]
async fn test_concurrent_creates_never_overshoot() {
    let provider = MemoryProvider::new();
    let registry = registry_with(&provider, 5);

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.create(None).await })
        })
        .collect();

    let mut succeeded = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.expect("create task panicked") {
            Ok(_) => succeeded += 1,
            Err(RegistryError::CapacityExceeded { max: 5 }) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(succeeded, 5);
    assert_eq!(rejected, 15);
    assert_eq!(registry.stats().await.active_sandboxes, 5);
    assert_eq!(provider.created().len(), 5);
}

#[tokio::test]
async fn test_kill_frees_capacity() {
    let provider = MemoryProvider::new();
    let registry = registry_with(&provider, 1);

    let first = registry.create(None).await.expect("failed to create sandbox");
    registry.kill(&first.id).await.expect("failed to kill sandbox");

    let second = registry
        .create(None)
        .await
        .expect("capacity should be free after kill");
    assert_ne!(first.id, second.id);
}

// =============================================================================
// Timeout Tests
// =============================================================================

#[tokio::test]
async fn test_timeout_defaults_and_clamps() {
    let provider = MemoryProvider::new();
    let registry = registry_with(&provider, 10);

    let defaulted = registry.create(None).await.expect("failed to create sandbox");
    let clamped = registry
        .create(Some(10_000_000))
        .await
        .expect("failed to create sandbox");
    let explicit = registry
        .create(Some(5_000))
        .await
        .expect("failed to create sandbox");

    assert_eq!(defaulted.timeout_ms, 300_000);
    assert_eq!(clamped.timeout_ms, 3_600_000);
    assert_eq!(explicit.timeout_ms, 5_000);
    assert_eq!(
        provider.requested_timeouts(),
        vec![
            Duration::from_millis(300_000),
            Duration::from_millis(3_600_000),
            Duration::from_millis(5_000),
        ]
    );
}

// =============================================================================
// Lookup and Kill Tests
// =============================================================================

#[tokio::test]
async fn test_unknown_id_is_not_found() {
    let provider = MemoryProvider::new();
    let registry = registry_with(&provider, 10);

    let err = registry.get("nope").await.err().expect("get should fail");
    assert!(matches!(err, RegistryError::NotFound { ref id } if id == "nope"));

    let err = registry.kill("nope").await.expect_err("kill should fail");
    assert!(matches!(err, RegistryError::NotFound { .. }));
    assert!(provider.killed().is_empty());
}

#[tokio::test]
async fn test_double_kill_is_not_found() {
    let provider = MemoryProvider::new();
    let registry = registry_with(&provider, 10);

    let created = registry.create(None).await.expect("failed to create sandbox");
    registry.kill(&created.id).await.expect("failed to kill sandbox");

    let err = registry
        .kill(&created.id)
        .await
        .expect_err("second kill should fail");
    assert!(matches!(err, RegistryError::NotFound { .. }));
}

#[tokio::test]
async fn test_failed_teardown_still_removes_entry() {
    let provider = MemoryProvider::new().failing_kills();
    let registry = registry_with(&provider, 10);

    let created = registry.create(None).await.expect("failed to create sandbox");
    let err = registry
        .kill(&created.id)
        .await
        .expect_err("teardown should fail");

    assert!(matches!(
        err,
        RegistryError::Provider {
            operation: "kill sandbox",
            ..
        }
    ));
    assert_eq!(registry.stats().await.active_sandboxes, 0);
    assert!(registry.get(&created.id).await.is_err());
    assert_eq!(provider.killed(), vec![created.id]);
}

#[tokio::test]
async fn test_stats_keep_insertion_order() {
    let provider = MemoryProvider::new();
    let registry = registry_with(&provider, 10);

    let a = registry.create(None).await.expect("failed to create sandbox");
    let b = registry.create(None).await.expect("failed to create sandbox");
    let c = registry.create(None).await.expect("failed to create sandbox");
    registry.kill(&b.id).await.expect("failed to kill sandbox");

    let stats = registry.stats().await;
    assert_eq!(stats.sandbox_ids, vec![a.id, c.id]);
    assert_eq!(stats.active_sandboxes, 2);
}

// =============================================================================
// Cleanup Tests
// =============================================================================

#[tokio::test]
async fn test_cleanup_all_survives_every_failure() {
    let provider = MemoryProvider::new();
    let registry = registry_with(&provider, 10);

    for _ in 0..3 {
        registry.create(None).await.expect("failed to create sandbox");
    }
    provider.set_fail_kills(true);

    let report = registry.cleanup_all().await;
    assert!(!report.is_clean());
    assert!(report.cleaned.is_empty());
    assert_eq!(report.failures.len(), 3);
    assert_eq!(report.total(), 3);
    assert_eq!(provider.killed().len(), 3);
    assert_eq!(registry.stats().await.active_sandboxes, 0);
}

#[tokio::test]
async fn test_cleanup_all_on_empty_registry() {
    let provider = MemoryProvider::new();
    let registry = registry_with(&provider, 10);

    let report = registry.cleanup_all().await;
    assert!(report.is_clean());
    assert_eq!(report.total(), 0);
}

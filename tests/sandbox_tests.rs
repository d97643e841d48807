//! Integration tests for sandbox environments and the registry
//!
//! Most tests use the local backend inside a temporary workspace root. Tests
//! that need command-level isolation use the default container environment
//! and are ignored unless Docker is available.

use std::sync::Arc;
use std::time::Duration;

use reactbox::config::RegistryConfig;
use reactbox::sandbox::{
    EnvironmentConfig, FileContent, SandboxEnvironment, SandboxError, SandboxRegistry,
    SandboxStatus, DEFAULT_ENVIRONMENT_TYPE,
};
use tempfile::TempDir;

fn registry() -> (TempDir, SandboxRegistry) {
    let root = tempfile::tempdir().unwrap();
    let registry = SandboxRegistry::new(RegistryConfig::with_workspace_root(root.path()));
    (root, registry)
}

async fn local(registry: &SandboxRegistry, id: &str) -> Arc<dyn SandboxEnvironment> {
    registry
        .create_or_reuse(id, "local", &EnvironmentConfig::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_create_or_reuse_is_idempotent() {
    let (_root, registry) = registry();
    let first = local(&registry, "conv-a").await;
    let second = local(&registry, "conv-a").await;

    assert_eq!(first.id(), second.id());
    assert_eq!(first.workspace_path(), second.workspace_path());
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_conversations_are_disjoint() {
    let (_root, registry) = registry();
    let a = local(&registry, "conv-a").await;
    let b = local(&registry, "conv-b").await;

    assert_ne!(a.id(), b.id());
    assert_ne!(a.workspace_path(), b.workspace_path());
    assert!(!a.workspace_path().starts_with(b.workspace_path()));
    assert!(!b.workspace_path().starts_with(a.workspace_path()));
    assert!(a.id().contains("conv-a"));

    a.write_file("/workspace/only_a.txt", b"a").await.unwrap();
    assert!(matches!(
        b.read_file("/workspace/only_a.txt").await,
        Err(SandboxError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_file_api_cannot_reach_another_conversation() {
    let (_root, registry) = registry();
    let a = local(&registry, "conv-a").await;
    let b = local(&registry, "conv-b").await;
    let b_host = b.workspace_path().join("hack.txt");

    assert!(a
        .write_file("/workspace/../conv-b/hack.txt", b"pwned")
        .await
        .is_err());
    assert!(a
        .write_file(&b_host.to_string_lossy(), b"pwned")
        .await
        .is_err());

    b.write_file("/workspace/secret.txt", b"b only").await.unwrap();
    assert!(a.read_file("/workspace/../conv-b/secret.txt").await.is_err());

    assert!(matches!(
        b.read_file("/workspace/hack.txt").await,
        Err(SandboxError::NotFound(_))
    ));
    assert!(!b_host.exists());
}

#[tokio::test]
#[ignore = "Requires a docker daemon"]
async fn test_container_commands_cannot_reach_another_conversation() {
    let (_root, registry) = registry();
    let config = EnvironmentConfig::default();
    let a = registry
        .create_or_reuse("conv-a", DEFAULT_ENVIRONMENT_TYPE, &config)
        .await
        .unwrap();
    let b = registry
        .create_or_reuse("conv-b", DEFAULT_ENVIRONMENT_TYPE, &config)
        .await
        .unwrap();
    b.write_file("/workspace/secret.txt", b"b only").await.unwrap();

    let command = format!(
        "echo pwned > ../conv-b/hack.txt; echo pwned > {}/hack.txt; cat ../conv-b/secret.txt",
        b.workspace_path().display()
    );
    let out = a
        .execute(&command, None, Duration::from_secs(30))
        .await
        .unwrap();
    assert!(!out.stdout.contains("b only"));

    assert!(matches!(
        b.read_file("/workspace/hack.txt").await,
        Err(SandboxError::NotFound(_))
    ));
    assert!(!b.workspace_path().join("hack.txt").exists());

    registry.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_create_yields_one_environment() {
    let (_root, registry) = registry();
    let registry = Arc::new(registry);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .create_or_reuse("shared", "local", &EnvironmentConfig::default())
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut envs = Vec::new();
    for handle in handles {
        envs.push(handle.await.unwrap());
    }
    assert!(envs.iter().all(|env| Arc::ptr_eq(env, &envs[0])));
}

#[tokio::test]
async fn test_text_round_trip_is_exact() {
    let (_root, registry) = registry();
    let env = local(&registry, "conv-a").await;

    let content = "line one\n\ttabbed — ünïcode\n\nno trailing newline";
    assert!(env.write_file("/workspace/dir/file.txt", content.as_bytes()).await.unwrap());

    match env.read_file("/workspace/dir/file.txt").await.unwrap() {
        FileContent::Text(text) => assert_eq!(text, content),
        other => panic!("expected text, got {other:?}"),
    }
}

#[tokio::test]
async fn test_binary_round_trip_is_exact() {
    let (_root, registry) = registry();
    let env = local(&registry, "conv-a").await;
    let bytes: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

    assert!(env.write_file("/workspace/blob.bin", &bytes).await.unwrap());
    let on_disk = std::fs::read(env.workspace_path().join("blob.bin")).unwrap();
    assert_eq!(on_disk, bytes);

    match env.read_file("/workspace/blob.bin").await.unwrap() {
        FileContent::Binary(file) => {
            assert_eq!(file.size, bytes.len() as u64);
            assert_eq!(file.filename, "blob.bin");
            assert!(file.preview.is_none());
        }
        other => panic!("expected binary descriptor, got {other:?}"),
    }
}

#[tokio::test]
async fn test_paths_outside_workspace_rejected() {
    let (_root, registry) = registry();
    let env = local(&registry, "conv-a").await;

    assert!(matches!(
        env.read_file("/workspace/../etc/passwd").await,
        Err(SandboxError::Security(_))
    ));
    assert!(env.write_file("/etc/evil.txt", b"x").await.is_err());
}

#[tokio::test]
async fn test_missing_file_is_an_error() {
    let (_root, registry) = registry();
    let env = local(&registry, "conv-a").await;
    assert!(matches!(
        env.read_file("/workspace/missing.py").await,
        Err(SandboxError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_execute_sees_written_files() {
    let (_root, registry) = registry();
    let env = local(&registry, "conv-a").await;
    env.write_file("/workspace/hello.sh", b"echo hello from script\n")
        .await
        .unwrap();

    let out = env
        .execute("sh hello.sh", None, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(out.exit_code, 0);
    assert_eq!(out.stdout.trim(), "hello from script");
}

#[tokio::test]
async fn test_destroy_then_create_provisions_again() {
    let (_root, registry) = registry();
    let env = local(&registry, "conv-a").await;
    env.write_file("/workspace/keep.txt", b"kept").await.unwrap();

    assert!(registry.destroy("conv-a").await);
    assert_eq!(env.status().await, SandboxStatus::Stopped);
    assert!(!registry.destroy("conv-a").await);
    assert!(registry.get("conv-a").await.is_none());

    let again = local(&registry, "conv-a").await;
    assert_eq!(again.id(), env.id());
    assert!(again.is_running().await);
    assert!(matches!(
        again.read_file("/workspace/keep.txt").await,
        Ok(FileContent::Text(text)) if text == "kept"
    ));
}

#[tokio::test]
async fn test_reset_wipes_workspace() {
    let (_root, registry) = registry();
    let env = local(&registry, "conv-a").await;
    env.write_file("/workspace/old.txt", b"old").await.unwrap();

    assert!(registry.reset("conv-a").await.unwrap());
    let fresh = registry.get("conv-a").await.unwrap();
    assert!(fresh.is_running().await);
    assert_eq!(fresh.id(), env.id());
    assert!(matches!(
        fresh.read_file("/workspace/old.txt").await,
        Err(SandboxError::NotFound(_))
    ));

    assert!(!registry.reset("never-created").await.unwrap());
}

#[tokio::test]
async fn test_unknown_environment_type() {
    let (_root, registry) = registry();
    let err = registry
        .create_or_reuse("conv-a", "cobol85", &EnvironmentConfig::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SandboxError::UnknownEnvironment(_)));
}

#[tokio::test]
async fn test_shutdown_cancels_runs_and_destroys() {
    let (_root, registry) = registry();
    let env = local(&registry, "conv-a").await;
    let ticket = registry.register_run("conv-a");

    registry.shutdown().await;

    assert!(ticket.token.is_cancelled());
    assert!(!env.is_running().await);
    assert!(registry.active_run("conv-a").is_none());
}

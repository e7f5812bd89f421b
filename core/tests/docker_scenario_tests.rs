// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! End-to-end sandbox scenarios against a live Docker daemon.
//!
//! These exercise the real runtime and are ignored by default; run with
//! `cargo test -- --ignored` on a machine with Docker available.

use aegis_isolator_core::domain::config::IsolatorConfig;
use aegis_isolator_core::domain::container::{
    ContainerStatus, CreateContainerRequest, ExecuteCommandRequest, FileOperation,
    FileOperationRequest,
};
use aegis_isolator_core::IsolatorError;
use aegis_isolator_core::Isolator;
use std::collections::HashMap;
use tempfile::TempDir;

fn isolator(temp: &TempDir) -> Isolator {
    let config = IsolatorConfig {
        workspace_root: temp.path().to_path_buf(),
        network_name: format!("aegis-isolator-test-{}", std::process::id()),
        ..Default::default()
    };
    Isolator::connect(config).unwrap()
}

fn create_request(workspace_id: &str) -> CreateContainerRequest {
    CreateContainerRequest {
        image: None,
        workspace_id: Some(workspace_id.to_string()),
        environment: HashMap::new(),
        memory_limit: "512m".to_string(),
        cpu_limit: 1.0,
        timeout: 3600,
    }
}

fn exec_request(command: &str) -> ExecuteCommandRequest {
    ExecuteCommandRequest {
        command: command.to_string(),
        working_dir: "/workspace".to_string(),
        timeout: 60,
        environment: HashMap::new(),
    }
}

fn file_request(
    operation: FileOperation,
    path: &str,
    content: Option<&str>,
) -> FileOperationRequest {
    FileOperationRequest {
        operation,
        path: path.to_string(),
        content: content.map(str::to_string),
        destination: None,
    }
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_full_sandbox_scenario() {
    let temp = TempDir::new().unwrap();
    let isolator = isolator(&temp);
    isolator.initialize().await.unwrap();

    let container_id = isolator
        .create_container(create_request("ws-1"))
        .await
        .unwrap();

    // Immediately resolvable with live running status.
    let info = isolator.container_info(&container_id).await.unwrap();
    assert_eq!(info.status, ContainerStatus::Running);
    assert_eq!(info.workspace_id, "ws-1");
    let workspace_path = info.workspace_path.clone();
    assert!(workspace_path.exists());

    let echo = isolator
        .execute_command(&container_id, exec_request("echo hello"))
        .await
        .unwrap();
    assert_eq!(echo.exit_code, 0);
    assert_eq!(echo.stdout, "hello\n");
    assert_eq!(echo.stderr, "");
    assert!(echo.execution_time > 0.0);

    // Host-side write is visible to a host-side read (round-trip law).
    let write = isolator
        .file_operation(
            &container_id,
            file_request(FileOperation::Write, "notes.txt", Some("abc")),
        )
        .await
        .unwrap();
    assert!(write.success);

    let read = isolator
        .file_operation(
            &container_id,
            file_request(FileOperation::Read, "notes.txt", None),
        )
        .await
        .unwrap();
    assert!(read.success);
    assert_eq!(read.content.as_deref(), Some("abc"));

    // The bind mount makes the file visible inside the container too.
    let cat = isolator
        .execute_command(&container_id, exec_request("cat /workspace/notes.txt"))
        .await
        .unwrap();
    assert_eq!(cat.stdout, "abc");

    isolator.delete_container(&container_id).await.unwrap();
    assert!(!workspace_path.exists());

    // Second delete fails in the registry before any runtime call.
    let again = isolator.delete_container(&container_id).await;
    assert!(matches!(again, Err(IsolatorError::ContainerNotFound(_))));

    isolator.cleanup().await;
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_container_ids_are_unique() {
    let temp = TempDir::new().unwrap();
    let isolator = isolator(&temp);
    isolator.initialize().await.unwrap();

    let first = isolator
        .create_container(create_request("ws-unique-a"))
        .await
        .unwrap();
    let second = isolator
        .create_container(create_request("ws-unique-b"))
        .await
        .unwrap();
    assert_ne!(first, second);

    isolator.cleanup().await;
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_non_zero_exit_is_data_not_error() {
    let temp = TempDir::new().unwrap();
    let isolator = isolator(&temp);
    isolator.initialize().await.unwrap();

    let container_id = isolator
        .create_container(create_request("ws-exit"))
        .await
        .unwrap();

    let result = isolator
        .execute_command(&container_id, exec_request("exit 3"))
        .await
        .unwrap();
    assert_eq!(result.exit_code, 3);

    isolator.cleanup().await;
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_missing_file_read_reports_failure() {
    let temp = TempDir::new().unwrap();
    let isolator = isolator(&temp);
    isolator.initialize().await.unwrap();

    let container_id = isolator
        .create_container(create_request("ws-missing"))
        .await
        .unwrap();

    let read = isolator
        .file_operation(
            &container_id,
            file_request(FileOperation::Read, "missing.txt", None),
        )
        .await
        .unwrap();
    assert!(!read.success);
    assert!(read.not_found);
    assert!(read.message.unwrap().contains("not found"));

    isolator.cleanup().await;
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_concurrent_exec_no_cross_talk() {
    let temp = TempDir::new().unwrap();
    let isolator = isolator(&temp);
    isolator.initialize().await.unwrap();

    let first = isolator
        .create_container(create_request("ws-par-a"))
        .await
        .unwrap();
    let second = isolator
        .create_container(create_request("ws-par-b"))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        isolator.execute_command(&first, exec_request("echo alpha")),
        isolator.execute_command(&second, exec_request("echo beta")),
    );

    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a.stdout, "alpha\n");
    assert_eq!(b.stdout, "beta\n");
    assert_eq!(a.stderr, "");
    assert_eq!(b.stderr, "");

    isolator.cleanup().await;
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_command_timeout_enforced() {
    let temp = TempDir::new().unwrap();
    let isolator = isolator(&temp);
    isolator.initialize().await.unwrap();

    let container_id = isolator
        .create_container(create_request("ws-timeout"))
        .await
        .unwrap();

    let mut request = exec_request("sleep 30");
    request.timeout = 1;
    let result = isolator.execute_command(&container_id, request).await;
    assert!(matches!(result, Err(IsolatorError::ExecutionFailed(_))));

    isolator.cleanup().await;
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_restart_readopts_managed_containers() {
    let temp = TempDir::new().unwrap();
    let first = isolator(&temp);
    first.initialize().await.unwrap();

    let container_id = first
        .create_container(create_request("ws-adopt"))
        .await
        .unwrap();

    // A second engine over the same configuration stands in for a process
    // restart; reconciliation rebuilds the record from the managed labels.
    let second = isolator(&temp);
    second.initialize().await.unwrap();

    let adopted = second.container_info(&container_id).await.unwrap();
    assert_eq!(adopted.workspace_id, "ws-adopt");
    assert_eq!(adopted.status, ContainerStatus::Running);
    assert!(adopted.workspace_path.exists());

    second.cleanup().await;
    // The runtime container is gone; the first engine's live view agrees.
    let stale = first.container_info(&container_id).await.unwrap();
    assert_eq!(stale.status, ContainerStatus::NotFound);
    first.cleanup().await;
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_reap_idle_deletes_expired_container() {
    let temp = TempDir::new().unwrap();
    let isolator = isolator(&temp);
    isolator.initialize().await.unwrap();

    let mut request = create_request("ws-reap");
    request.timeout = 0;
    let container_id = isolator.create_container(request).await.unwrap();
    let workspace_path = isolator
        .container_info(&container_id)
        .await
        .unwrap()
        .workspace_path;

    let reaped = isolator.reap_idle().await;
    assert_eq!(reaped, vec![container_id.clone()]);
    assert!(!workspace_path.exists());
    assert!(matches!(
        isolator.container_info(&container_id).await,
        Err(IsolatorError::ContainerNotFound(_))
    ));

    isolator.cleanup().await;
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_execute_on_unknown_container() {
    let temp = TempDir::new().unwrap();
    let isolator = isolator(&temp);
    isolator.initialize().await.unwrap();

    let result = isolator
        .execute_command("no-such-id", exec_request("echo hello"))
        .await;
    assert!(matches!(result, Err(IsolatorError::ContainerNotFound(_))));

    isolator.cleanup().await;
}

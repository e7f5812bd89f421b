// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Container lifecycle manager
//!
//! Creates sandboxes with resource and security constraints, executes
//! commands in them, serves workspace file operations, and tears them down.
//! The only writer of the container registry.
//!
//! Operations against the same container id are serialized through a
//! per-id mutex table, so a command can never execute inside a container
//! that a concurrent delete is tearing down. Different ids proceed in
//! parallel.

use crate::domain::config::IsolatorConfig;
use crate::domain::container::{
    cpu_quota, parse_memory_limit, ContainerRecord, ContainerStatus, CreateContainerRequest,
    ExecResult, ExecuteCommandRequest, FileOperationRequest, FileOperationResult, CPU_PERIOD_US,
    MANAGED_LABEL, WORKSPACE_LABEL, WORKSPACE_MOUNT,
};
use crate::domain::error::IsolatorError;
use crate::infrastructure::image::ImageCache;
use crate::infrastructure::registry::ContainerRegistry;
use crate::infrastructure::workspace::WorkspaceStore;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::ContainerStateStatusEnum;
use bollard::service::HostConfig;
use bollard::Docker;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Grace period in seconds for a graceful stop before force removal.
const STOP_GRACE_SECONDS: i64 = 10;

/// Capabilities kept after dropping ALL: the minimal file-ownership set the
/// sandbox needs to manage workspace files as different users.
const KEPT_CAPABILITIES: [&str; 5] = ["CHOWN", "DAC_OVERRIDE", "FOWNER", "SETGID", "SETUID"];

/// Best-effort provisioning run after creation. Each step may fail without
/// failing container creation; the sandbox is usable even when setup is
/// partial.
const SETUP_COMMANDS: [&str; 4] = [
    "apt-get update",
    "apt-get install -y curl wget git nano vim",
    "pip install --upgrade pip",
    "pip install requests beautifulsoup4 pandas numpy matplotlib seaborn",
];

/// Wall-clock budget per setup command, in seconds.
const SETUP_COMMAND_TIMEOUT: u64 = 300;

/// Idle timeout assigned to containers re-adopted during reconciliation,
/// where the original request's timeout is no longer known.
const RECONCILED_TIMEOUT: u64 = 3600;

pub struct ContainerLifecycleManager {
    docker: Docker,
    config: IsolatorConfig,
    workspaces: Arc<WorkspaceStore>,
    images: Arc<ImageCache>,
    registry: Arc<ContainerRegistry>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

impl ContainerLifecycleManager {
    pub fn new(
        docker: Docker,
        config: IsolatorConfig,
        workspaces: Arc<WorkspaceStore>,
        images: Arc<ImageCache>,
        registry: Arc<ContainerRegistry>,
    ) -> Self {
        Self {
            docker,
            config,
            workspaces,
            images,
            registry,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, container_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(container_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Create a new sandbox and return its container id.
    ///
    /// The record is registered only after the runtime confirms the
    /// container running; any failure before that point rolls back the
    /// container and workspace directory, so the caller never observes a
    /// partial or orphaned record.
    pub async fn create_container(
        &self,
        request: CreateContainerRequest,
    ) -> Result<String, IsolatorError> {
        let image = request
            .image
            .unwrap_or_else(|| self.config.default_image.clone());
        let workspace_id = request
            .workspace_id
            .unwrap_or_else(|| format!("workspace-{}", Uuid::new_v4()));

        let memory = parse_memory_limit(&request.memory_limit)?;
        let quota = cpu_quota(request.cpu_limit)?;

        let workspace_path = self.workspaces.allocate(&workspace_id).await?;

        let mut env: HashMap<String, String> = HashMap::from([
            ("WORKSPACE_ID".to_string(), workspace_id.clone()),
            ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
            ("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string()),
        ]);
        env.extend(request.environment);
        let env_vars: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();

        if let Err(e) = self.images.ensure(&image).await {
            self.workspaces.remove(&workspace_path).await;
            return Err(e);
        }

        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}:rw",
                workspace_path.display(),
                WORKSPACE_MOUNT
            )]),
            memory: Some(memory),
            cpu_quota: Some(quota),
            cpu_period: Some(CPU_PERIOD_US),
            network_mode: Some(self.config.network_name.clone()),
            security_opt: Some(vec!["no-new-privileges:true".to_string()]),
            cap_drop: Some(vec!["ALL".to_string()]),
            cap_add: Some(KEPT_CAPABILITIES.iter().map(|c| c.to_string()).collect()),
            tmpfs: Some(HashMap::from([(
                "/tmp".to_string(),
                "noexec,nosuid,size=100m".to_string(),
            )])),
            ..Default::default()
        };

        let labels = HashMap::from([
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (WORKSPACE_LABEL.to_string(), workspace_id.clone()),
        ]);

        let container_config = Config {
            image: Some(image.clone()),
            // No-op foreground command: the sandbox is a persistent exec
            // target, not a run-to-completion job.
            cmd: Some(vec![
                "tail".to_string(),
                "-f".to_string(),
                "/dev/null".to_string(),
            ]),
            env: Some(env_vars),
            working_dir: Some(WORKSPACE_MOUNT.to_string()),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: format!("aegis-sandbox-{}", Uuid::new_v4()),
            platform: None,
        };

        let created = match self
            .docker
            .create_container(Some(options), container_config)
            .await
        {
            Ok(created) => created,
            Err(e) => {
                self.workspaces.remove(&workspace_path).await;
                return Err(IsolatorError::CreationFailed(e.to_string()));
            }
        };
        let container_id = created.id;

        if let Err(e) = self
            .docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
        {
            self.rollback(&container_id, &workspace_path).await;
            return Err(IsolatorError::CreationFailed(format!(
                "Failed to start container: {}",
                e
            )));
        }

        // Register only once the runtime corroborates the running state.
        match self.live_status(&container_id).await {
            ContainerStatus::Running => {}
            other => {
                self.rollback(&container_id, &workspace_path).await;
                return Err(IsolatorError::CreationFailed(format!(
                    "Container did not reach running state (observed: {:?})",
                    other
                )));
            }
        }

        let now = Utc::now();
        self.registry.put(ContainerRecord {
            container_id: container_id.clone(),
            workspace_id: workspace_id.clone(),
            image,
            status: ContainerStatus::Running,
            created_at: now,
            workspace_path,
            timeout: request.timeout,
            last_activity: now,
        });

        info!(container_id = %container_id, workspace_id = %workspace_id, "Container created");

        self.run_setup(&container_id).await;

        Ok(container_id)
    }

    async fn rollback(&self, container_id: &str, workspace_path: &std::path::Path) {
        if let Err(e) = self
            .docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            if !is_not_found(&e) {
                warn!(container_id = %container_id, error = %e, "Rollback: failed to remove container");
            }
        }
        self.workspaces.remove(workspace_path).await;
    }

    /// Run the post-create setup sequence. A fold over independent fallible
    /// steps: every failure is logged and counted, none aborts the sequence
    /// or the creation that triggered it.
    async fn run_setup(&self, container_id: &str) {
        let mut failures = 0usize;
        for command in SETUP_COMMANDS {
            let request = ExecuteCommandRequest {
                command: command.to_string(),
                working_dir: WORKSPACE_MOUNT.to_string(),
                timeout: SETUP_COMMAND_TIMEOUT,
                environment: HashMap::new(),
            };
            match self.execute_command(container_id, request).await {
                Ok(result) if result.exit_code == 0 => {}
                Ok(result) => {
                    failures += 1;
                    warn!(
                        container_id = %container_id,
                        command = %command,
                        exit_code = result.exit_code,
                        "Setup command exited non-zero"
                    );
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        container_id = %container_id,
                        command = %command,
                        error = %e,
                        "Setup command failed"
                    );
                }
            }
        }
        if failures > 0 {
            warn!(
                container_id = %container_id,
                failures,
                total = SETUP_COMMANDS.len(),
                "Container setup completed with failures"
            );
        } else {
            info!(container_id = %container_id, "Container setup completed");
        }
    }

    /// Execute a command inside an existing running sandbox.
    ///
    /// The request timeout bounds the exec wall clock; elapse yields
    /// `ExecutionFailed`. Docker cannot kill a running exec, so a timed-out
    /// command may keep running inside the container; only the output drain
    /// is abandoned. A non-zero exit code is returned as data.
    pub async fn execute_command(
        &self,
        container_id: &str,
        request: ExecuteCommandRequest,
    ) -> Result<ExecResult, IsolatorError> {
        let lock = self.lock_for(container_id);
        let _guard = lock.lock().await;

        if !self.registry.contains(container_id) {
            return Err(IsolatorError::ContainerNotFound(container_id.to_string()));
        }
        self.registry.touch(container_id);

        let env: Option<Vec<String>> = if request.environment.is_empty() {
            None
        } else {
            Some(
                request
                    .environment
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect(),
            )
        };

        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions::<String> {
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some(request.working_dir.clone()),
                    env,
                    cmd: Some(vec![
                        "/bin/sh".to_string(),
                        "-c".to_string(),
                        request.command.clone(),
                    ]),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| IsolatorError::ExecutionFailed(e.to_string()))?;

        let started = Instant::now();
        let results = self
            .docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: false,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| IsolatorError::ExecutionFailed(e.to_string()))?;

        let (stdout, stderr) = match results {
            StartExecResults::Attached { mut output, .. } => {
                let drain = async {
                    let mut stdout = String::new();
                    let mut stderr = String::new();
                    while let Some(chunk) = output.next().await {
                        match chunk {
                            Ok(LogOutput::StdOut { message }) => {
                                stdout.push_str(&String::from_utf8_lossy(&message));
                            }
                            Ok(LogOutput::StdErr { message }) => {
                                stderr.push_str(&String::from_utf8_lossy(&message));
                            }
                            Ok(_) => {}
                            Err(e) => {
                                return Err(IsolatorError::ExecutionFailed(e.to_string()));
                            }
                        }
                    }
                    Ok((stdout, stderr))
                };

                match tokio::time::timeout(Duration::from_secs(request.timeout), drain).await {
                    Ok(drained) => drained?,
                    Err(_) => {
                        return Err(IsolatorError::ExecutionFailed(format!(
                            "Command timed out after {}s",
                            request.timeout
                        )));
                    }
                }
            }
            StartExecResults::Detached => (String::new(), String::new()),
        };

        let execution_time = started.elapsed().as_secs_f64();

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| IsolatorError::ExecutionFailed(format!("Failed to inspect exec: {}", e)))?;
        let exit_code = inspect.exit_code.unwrap_or(0);

        self.registry.touch(container_id);

        Ok(ExecResult {
            exit_code,
            stdout,
            stderr,
            execution_time,
        })
    }

    /// Perform a file operation on a sandbox's workspace. Only an unknown
    /// container id is a typed error; operation failures come back in the
    /// result value.
    pub async fn file_operation(
        &self,
        container_id: &str,
        request: FileOperationRequest,
    ) -> Result<FileOperationResult, IsolatorError> {
        let lock = self.lock_for(container_id);
        let _guard = lock.lock().await;

        let record = self
            .registry
            .get(container_id)
            .ok_or_else(|| IsolatorError::ContainerNotFound(container_id.to_string()))?;
        self.registry.touch(container_id);

        Ok(self
            .workspaces
            .file_operation(&record.workspace_path, &request)
            .await)
    }

    /// Stop and remove a sandbox, reclaim its workspace, drop its record.
    ///
    /// The record is removed last, after runtime cleanup was attempted: a
    /// crash mid-delete leaves a stale-but-discoverable record rather than a
    /// silently lost container.
    pub async fn delete_container(&self, container_id: &str) -> Result<(), IsolatorError> {
        let lock = self.lock_for(container_id);
        let _guard = lock.lock().await;

        let record = self
            .registry
            .get(container_id)
            .ok_or_else(|| IsolatorError::ContainerNotFound(container_id.to_string()))?;

        match self
            .docker
            .stop_container(
                container_id,
                Some(StopContainerOptions {
                    t: STOP_GRACE_SECONDS,
                }),
            )
            .await
        {
            Ok(()) => {}
            Err(e) if is_not_found(&e) => {
                warn!(container_id = %container_id, "Container already absent from Docker");
            }
            Err(e) => {
                // Fall through to a forced remove.
                warn!(container_id = %container_id, error = %e, "Graceful stop failed");
            }
        }

        match self
            .docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => {}
            Err(e) if is_not_found(&e) => {
                warn!(container_id = %container_id, "Container already removed from Docker");
            }
            Err(e) => return Err(IsolatorError::DeletionFailed(e.to_string())),
        }

        self.workspaces.remove(&record.workspace_path).await;

        self.registry.remove(container_id);
        drop(_guard);
        self.locks.remove(container_id);

        info!(container_id = %container_id, workspace_id = %record.workspace_id, "Container deleted");
        Ok(())
    }

    /// Registry record overlaid with live runtime status.
    pub async fn container_info(
        &self,
        container_id: &str,
    ) -> Result<ContainerRecord, IsolatorError> {
        let mut record = self
            .registry
            .get(container_id)
            .ok_or_else(|| IsolatorError::ContainerNotFound(container_id.to_string()))?;

        record.status = self.live_status(container_id).await;
        self.registry.set_status(container_id, record.status);
        Ok(record)
    }

    /// All tracked sandboxes with live status. A container missing from the
    /// runtime is reported with status `not_found`, never as an error, so
    /// monitoring can tell "existed but disappeared" from "never existed".
    pub async fn list_containers(&self) -> Vec<ContainerRecord> {
        let mut records = self.registry.list();
        for record in &mut records {
            record.status = self.live_status(&record.container_id).await;
            self.registry.set_status(&record.container_id, record.status);
        }
        records
    }

    async fn live_status(&self, container_id: &str) -> ContainerStatus {
        match self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => match inspect.state.and_then(|s| s.status) {
                Some(ContainerStateStatusEnum::RUNNING) => ContainerStatus::Running,
                Some(
                    ContainerStateStatusEnum::CREATED
                    | ContainerStateStatusEnum::PAUSED
                    | ContainerStateStatusEnum::RESTARTING
                    | ContainerStateStatusEnum::REMOVING
                    | ContainerStateStatusEnum::EXITED
                    | ContainerStateStatusEnum::DEAD,
                ) => ContainerStatus::Stopped,
                _ => ContainerStatus::Error,
            },
            Err(e) if is_not_found(&e) => ContainerStatus::NotFound,
            Err(_) => ContainerStatus::Error,
        }
    }

    /// Delete every sandbox idle past its timeout. A container with an open
    /// terminal session is never idle, whatever its last-activity timestamp
    /// says. Returns the reaped ids.
    pub async fn reap_idle(&self) -> Vec<String> {
        let now = Utc::now();
        let idle: Vec<String> = self
            .registry
            .list()
            .into_iter()
            .filter(|record| {
                record.is_idle(now) && self.registry.active_sessions(&record.container_id) == 0
            })
            .map(|record| record.container_id)
            .collect();

        let mut reaped = Vec::new();
        for container_id in idle {
            match self.delete_container(&container_id).await {
                Ok(()) => {
                    info!(container_id = %container_id, "Reaped idle container");
                    reaped.push(container_id);
                }
                Err(e) => {
                    warn!(container_id = %container_id, error = %e, "Failed to reap idle container");
                }
            }
        }
        reaped
    }

    /// Rebuild registry records from runtime containers carrying the managed
    /// label. Run at startup so a process restart does not orphan sandboxes
    /// created by a previous incarnation.
    pub async fn reconcile(&self) -> Result<usize, IsolatorError> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}=true", MANAGED_LABEL)],
        );

        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| IsolatorError::RuntimeUnavailable(e.to_string()))?;

        let mut adopted = 0usize;
        for summary in summaries {
            let Some(container_id) = summary.id else {
                continue;
            };
            if self.registry.contains(&container_id) {
                continue;
            }

            let labels = summary.labels.unwrap_or_default();
            let Some(workspace_id) = labels.get(WORKSPACE_LABEL).cloned() else {
                warn!(container_id = %container_id, "Managed container lacks a workspace label; skipping");
                continue;
            };

            // Invariant: the workspace path exists for the record's lifetime.
            let workspace_path = self.workspaces.allocate(&workspace_id).await?;

            let created_at = summary
                .created
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                .unwrap_or_else(Utc::now);
            let status = summary
                .state
                .as_deref()
                .map(ContainerStatus::from_docker_state)
                .unwrap_or(ContainerStatus::Error);

            self.registry.put(ContainerRecord {
                container_id: container_id.clone(),
                workspace_id: workspace_id.clone(),
                image: summary.image.unwrap_or_default(),
                status,
                created_at,
                workspace_path,
                timeout: RECONCILED_TIMEOUT,
                last_activity: Utc::now(),
            });

            info!(container_id = %container_id, workspace_id = %workspace_id, "Re-adopted container from runtime");
            adopted += 1;
        }

        Ok(adopted)
    }
}

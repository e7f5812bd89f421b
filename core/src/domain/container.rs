// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Container domain types
//!
//! The `ContainerRecord` is the bookkeeping entry for one sandbox: identity,
//! image, cached status, timestamps and idle timeout. The registry owns
//! records exclusively; readers always reconcile the status field against
//! the live Docker daemon, since the runtime is the source of truth for
//! liveness and the registry only for workspace association.

use crate::domain::error::IsolatorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Default sandbox image when the caller does not name one.
pub const DEFAULT_IMAGE: &str = "python:3.11-slim";

/// Mount point of the workspace inside every sandbox.
pub const WORKSPACE_MOUNT: &str = "/workspace";

/// Docker CPU quota period in microseconds; quota = cpu_limit * period.
pub const CPU_PERIOD_US: i64 = 100_000;

/// Label marking containers managed by this service, used for startup
/// reconciliation against the live daemon.
pub const MANAGED_LABEL: &str = "ai.100monkeys.isolator.managed";

/// Label carrying the workspace id a managed container belongs to.
pub const WORKSPACE_LABEL: &str = "ai.100monkeys.isolator.workspace-id";

/// Live status of a sandbox as last observed from the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Error,
    /// Tracked in the registry but missing from the runtime: "existed but
    /// disappeared", distinct from a registry miss ("never existed").
    NotFound,
}

impl ContainerStatus {
    /// Map a Docker state string (`running`, `exited`, ...) onto the
    /// isolator's status set.
    pub fn from_docker_state(state: &str) -> Self {
        match state {
            "running" => Self::Running,
            "created" | "paused" | "restarting" | "removing" | "exited" | "dead" => Self::Stopped,
            _ => Self::Error,
        }
    }
}

/// Bookkeeping entry for one managed sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub container_id: String,
    pub workspace_id: String,
    pub image: String,
    pub status: ContainerStatus,
    pub created_at: DateTime<Utc>,
    pub workspace_path: PathBuf,
    /// Idle timeout in seconds; the sandbox is eligible for reclamation once
    /// this much time has elapsed since `last_activity`.
    pub timeout: u64,
    pub last_activity: DateTime<Utc>,
}

impl ContainerRecord {
    /// Whether the sandbox has been idle past its timeout.
    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_activity)
            .num_seconds()
            .max(0) as u64
            >= self.timeout
    }
}

fn default_memory_limit() -> String {
    "512m".to_string()
}

fn default_cpu_limit() -> f64 {
    1.0
}

fn default_container_timeout() -> u64 {
    3600
}

fn default_working_dir() -> String {
    WORKSPACE_MOUNT.to_string()
}

fn default_command_timeout() -> u64 {
    30
}

/// Request to create a new sandbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateContainerRequest {
    /// Docker image; falls back to the configured default.
    pub image: Option<String>,
    /// Caller-supplied workspace id; generated when absent.
    pub workspace_id: Option<String>,
    /// Environment merged over the sandbox baseline.
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Human-readable memory limit, e.g. "512m" or "2g".
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
    /// Fractional CPU cores, translated to a quota/period pair.
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f64,
    /// Idle timeout in seconds.
    #[serde(default = "default_container_timeout")]
    pub timeout: u64,
}

/// Request to execute a command inside an existing sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteCommandRequest {
    pub command: String,
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    /// Wall-clock budget in seconds, enforced around the exec call.
    #[serde(default = "default_command_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

/// Outcome of a command execution. A non-zero `exit_code` is data, not an
/// error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    /// Wall-clock seconds spent in the exec call.
    pub execution_time: f64,
}

/// File operations supported against the bind-mounted workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOperation {
    Read,
    Write,
    Delete,
    List,
    Copy,
}

/// Request for a workspace file operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOperationRequest {
    pub operation: FileOperation,
    pub path: String,
    /// Content for `write`.
    pub content: Option<String>,
    /// Target path for `copy`.
    pub destination: Option<String>,
}

/// Structured result of a file operation. Failures are reported here rather
/// than raised, so one failed operation cannot abort sibling operations at
/// the request boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileOperationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Marks failures caused by a missing source path, so the HTTP layer can
    /// answer 404 instead of 422 without string-matching the message.
    #[serde(skip)]
    pub not_found: bool,
}

impl FileOperationResult {
    pub fn ok_content(content: String) -> Self {
        Self {
            success: true,
            content: Some(content),
            ..Default::default()
        }
    }

    pub fn ok_files(files: Vec<String>) -> Self {
        Self {
            success: true,
            files: Some(files),
            ..Default::default()
        }
    }

    pub fn ok_message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn missing(path: &str) -> Self {
        Self {
            success: false,
            message: Some(format!("File {} not found", path)),
            not_found: true,
            ..Default::default()
        }
    }
}

/// Parse a human-readable memory limit ("512m", "2g", "1048576") into bytes.
pub fn parse_memory_limit(limit: &str) -> Result<i64, IsolatorError> {
    let trimmed = limit.trim();
    if trimmed.is_empty() {
        return Err(IsolatorError::InvalidRequest(
            "Memory limit must not be empty".to_string(),
        ));
    }

    let (digits, unit) = match trimmed.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => trimmed.split_at(idx),
        None => (trimmed, ""),
    };

    let value: i64 = digits.parse().map_err(|_| {
        IsolatorError::InvalidRequest(format!("Invalid memory limit: {}", limit))
    })?;

    let multiplier: i64 = match unit.to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        _ => {
            return Err(IsolatorError::InvalidRequest(format!(
                "Unknown memory unit in limit: {}",
                limit
            )))
        }
    };

    value.checked_mul(multiplier).ok_or_else(|| {
        IsolatorError::InvalidRequest(format!("Memory limit out of range: {}", limit))
    })
}

/// Translate a fractional core count into a Docker CPU quota in
/// microseconds per `CPU_PERIOD_US` period.
pub fn cpu_quota(cpu_limit: f64) -> Result<i64, IsolatorError> {
    if !cpu_limit.is_finite() || cpu_limit <= 0.0 {
        return Err(IsolatorError::InvalidRequest(format!(
            "CPU limit must be a positive number, got {}",
            cpu_limit
        )));
    }
    Ok((cpu_limit * CPU_PERIOD_US as f64) as i64)
}

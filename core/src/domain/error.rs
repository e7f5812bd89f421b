// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Isolator error taxonomy
//!
//! Closed set of failure kinds the engine can surface. Callers pattern-match
//! on these instead of catching broad error hierarchies; the presentation
//! layer maps them onto HTTP status codes. Note that a non-zero exit code
//! from a command is a *successful* execution outcome, not an
//! `ExecutionFailed`, and that file-operation failures are reported as
//! structured values rather than raised (see `FileOperationResult`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IsolatorError {
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Failed to create container: {0}")]
    CreationFailed(String),

    #[error("Failed to pull image {image}: {reason}")]
    ImagePullFailed { image: String, reason: String },

    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Failed to delete container: {0}")]
    DeletionFailed(String),

    #[error("Network setup failed: {0}")]
    NetworkSetupFailed(String),

    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Workspace storage error: {0}")]
    Workspace(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

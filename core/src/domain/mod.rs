// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod config;
pub mod container;
pub mod error;
pub mod workspace_path;

pub use config::IsolatorConfig;
pub use container::{
    ContainerRecord, ContainerStatus, CreateContainerRequest, ExecResult,
    ExecuteCommandRequest, FileOperation, FileOperationRequest, FileOperationResult,
};
pub use error::IsolatorError;

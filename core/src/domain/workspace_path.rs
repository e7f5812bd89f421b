// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workspace path resolution
//!
//! File operations run host-side against the bind-mounted workspace
//! directory, so every caller-supplied path must be confined to that
//! directory. Resolution strips the leading separator (callers address
//! paths relative to the mount point), normalizes `.` components, and
//! rejects anything that could escape the workspace.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspacePathError {
    #[error("Path traversal attempt detected: {0}")]
    PathTraversal(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Resolve a caller-supplied path to an absolute path inside `workspace`.
///
/// Rejects `..` components and null bytes outright; absolute input paths are
/// treated as workspace-relative, matching the container's view where the
/// workspace is mounted at `/workspace`.
pub fn resolve(workspace: &Path, path: &str) -> Result<PathBuf, WorkspacePathError> {
    if path.contains('\0') {
        return Err(WorkspacePathError::InvalidPath(
            "Path contains null byte".to_string(),
        ));
    }

    let relative = path.trim_start_matches('/');
    let mut resolved = workspace.to_path_buf();

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                tracing::warn!(path = %path, "Path traversal attempt rejected");
                return Err(WorkspacePathError::PathTraversal(path.to_string()));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(WorkspacePathError::InvalidPath(path.to_string()));
            }
        }
    }

    Ok(resolved)
}

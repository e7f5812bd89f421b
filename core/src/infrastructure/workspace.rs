// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workspace store
//!
//! Filesystem-backed per-workspace directory tree. Each sandbox gets one
//! directory under the root, bind-mounted read-write into its container at
//! `/workspace`. File operations run directly against the host side of the
//! mount, never through the container runtime; the bind mount keeps both
//! views consistent.
//!
//! **Limitations:**
//! - Host and container must agree on file ownership (the sandbox keeps
//!   CHOWN/DAC_OVERRIDE capabilities for this)
//! - No quota enforcement on workspace size

use crate::domain::container::{FileOperation, FileOperationRequest, FileOperationResult};
use crate::domain::error::IsolatorError;
use crate::domain::workspace_path;
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct WorkspaceStore {
    root: PathBuf,
}

impl WorkspaceStore {
    /// Create the store, ensuring the root directory exists and is writable.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, IsolatorError> {
        let root = root.into();

        std::fs::create_dir_all(&root).map_err(|e| {
            IsolatorError::Workspace(format!(
                "Failed to create workspace root {}: {}",
                root.display(),
                e
            ))
        })?;

        let probe = root.join(".aegis-isolator-probe");
        std::fs::write(&probe, b"probe").map_err(|e| {
            IsolatorError::Workspace(format!(
                "Workspace root {} is not writable: {}",
                root.display(),
                e
            ))
        })?;
        let _ = std::fs::remove_file(&probe);

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create (or re-create) the directory for a workspace and return its
    /// absolute path. Idempotent.
    pub async fn allocate(&self, workspace_id: &str) -> Result<PathBuf, IsolatorError> {
        if workspace_id.is_empty()
            || workspace_id.contains(['/', '\\', '\0'])
            || workspace_id.contains("..")
        {
            return Err(IsolatorError::InvalidRequest(format!(
                "Invalid workspace id: {:?}",
                workspace_id
            )));
        }

        let path = self.root.join(workspace_id);
        tokio::fs::create_dir_all(&path).await.map_err(|e| {
            IsolatorError::Workspace(format!(
                "Failed to create workspace directory {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(path)
    }

    /// Best-effort recursive removal of a workspace directory. Teardown must
    /// not fail the surrounding delete, so errors are only logged.
    pub async fn remove(&self, path: &Path) {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove workspace directory"),
        }
    }

    /// Perform a file operation inside a workspace directory.
    ///
    /// Failures are captured in the result rather than raised; the caller at
    /// the request boundary needs partial failure to be visible without
    /// aborting a batch.
    pub async fn file_operation(
        &self,
        workspace: &Path,
        request: &FileOperationRequest,
    ) -> FileOperationResult {
        let full_path = match workspace_path::resolve(workspace, &request.path) {
            Ok(path) => path,
            Err(e) => return FileOperationResult::failure(e.to_string()),
        };
        if escapes_workspace(workspace, &full_path) {
            return FileOperationResult::failure(format!(
                "Path {} escapes the workspace",
                request.path
            ));
        }

        match request.operation {
            FileOperation::Read => Self::read_file(&full_path, &request.path).await,
            FileOperation::Write => match &request.content {
                Some(content) => Self::write_file(&full_path, &request.path, content).await,
                None => {
                    FileOperationResult::failure("Content is required for write operation")
                }
            },
            FileOperation::Delete => Self::delete_path(&full_path, &request.path).await,
            FileOperation::List => Self::list_path(&full_path).await,
            FileOperation::Copy => match &request.destination {
                Some(destination) => {
                    let dest_path = match workspace_path::resolve(workspace, destination) {
                        Ok(path) => path,
                        Err(e) => return FileOperationResult::failure(e.to_string()),
                    };
                    if escapes_workspace(workspace, &dest_path) {
                        return FileOperationResult::failure(format!(
                            "Path {} escapes the workspace",
                            destination
                        ));
                    }
                    Self::copy_path(&full_path, &dest_path, &request.path, destination).await
                }
                None => {
                    FileOperationResult::failure("Destination is required for copy operation")
                }
            },
        }
    }

    async fn read_file(full_path: &Path, path: &str) -> FileOperationResult {
        match tokio::fs::read_to_string(full_path).await {
            Ok(content) => FileOperationResult::ok_content(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                FileOperationResult::missing(path)
            }
            Err(e) => FileOperationResult::failure(format!("Failed to read {}: {}", path, e)),
        }
    }

    async fn write_file(full_path: &Path, path: &str, content: &str) -> FileOperationResult {
        if let Some(parent) = full_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return FileOperationResult::failure(format!(
                    "Failed to create parent directories for {}: {}",
                    path, e
                ));
            }
        }
        match tokio::fs::write(full_path, content).await {
            Ok(()) => FileOperationResult::ok_message(format!("File {} written successfully", path)),
            Err(e) => FileOperationResult::failure(format!("Failed to write {}: {}", path, e)),
        }
    }

    /// Delete is idempotent: a missing path is a success, not an error.
    async fn delete_path(full_path: &Path, path: &str) -> FileOperationResult {
        let metadata = match tokio::fs::metadata(full_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return FileOperationResult::ok_message(format!(
                    "Path {} deleted successfully",
                    path
                ));
            }
            Err(e) => {
                return FileOperationResult::failure(format!("Failed to stat {}: {}", path, e))
            }
        };

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(full_path).await
        } else {
            tokio::fs::remove_file(full_path).await
        };

        match result {
            Ok(()) => FileOperationResult::ok_message(format!("Path {} deleted successfully", path)),
            Err(e) => FileOperationResult::failure(format!("Failed to delete {}: {}", path, e)),
        }
    }

    /// List is lenient: an absent path yields an empty listing, a file path
    /// yields a single-entry listing.
    async fn list_path(full_path: &Path) -> FileOperationResult {
        let metadata = match tokio::fs::metadata(full_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return FileOperationResult::ok_files(Vec::new());
            }
            Err(e) => {
                return FileOperationResult::failure(format!(
                    "Failed to stat {}: {}",
                    full_path.display(),
                    e
                ));
            }
        };

        if metadata.is_file() {
            let name = full_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return FileOperationResult::ok_files(vec![name]);
        }

        let mut entries = match tokio::fs::read_dir(full_path).await {
            Ok(entries) => entries,
            Err(e) => {
                return FileOperationResult::failure(format!(
                    "Failed to list {}: {}",
                    full_path.display(),
                    e
                ));
            }
        };

        let mut files = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => files.push(entry.file_name().to_string_lossy().into_owned()),
                Ok(None) => break,
                Err(e) => {
                    return FileOperationResult::failure(format!(
                        "Failed to read directory entry: {}",
                        e
                    ));
                }
            }
        }
        files.sort();
        FileOperationResult::ok_files(files)
    }

    async fn copy_path(
        source: &Path,
        dest: &Path,
        source_name: &str,
        dest_name: &str,
    ) -> FileOperationResult {
        let metadata = match tokio::fs::metadata(source).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return FileOperationResult::missing(source_name);
            }
            Err(e) => {
                return FileOperationResult::failure(format!(
                    "Failed to stat {}: {}",
                    source_name, e
                ));
            }
        };

        if let Some(parent) = dest.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return FileOperationResult::failure(format!(
                    "Failed to create parent directories for {}: {}",
                    dest_name, e
                ));
            }
        }

        let result = if metadata.is_dir() {
            copy_dir_recursive(source, dest)
        } else {
            std::fs::copy(source, dest).map(|_| ())
        };

        match result {
            Ok(()) => FileOperationResult::ok_message(format!(
                "Copied {} to {}",
                source_name, dest_name
            )),
            Err(e) => FileOperationResult::failure(format!(
                "Failed to copy {} to {}: {}",
                source_name, dest_name, e
            )),
        }
    }
}

/// A lexically confined path can still leave the workspace through a symlink
/// the sandbox created inside it. Canonicalize the nearest existing ancestor
/// and require it to land under the canonicalized workspace root.
fn escapes_workspace(workspace: &Path, resolved: &Path) -> bool {
    let root = match workspace.canonicalize() {
        Ok(root) => root,
        Err(_) => return true,
    };
    let mut probe = resolved.to_path_buf();
    loop {
        match probe.canonicalize() {
            Ok(real) => return !real.starts_with(&root),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !probe.pop() {
                    return true;
                }
            }
            Err(_) => return true,
        }
    }
}

fn copy_dir_recursive(source: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.metadata()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(
        operation: FileOperation,
        path: &str,
        content: Option<&str>,
        destination: Option<&str>,
    ) -> FileOperationRequest {
        FileOperationRequest {
            operation,
            path: path.to_string(),
            content: content.map(str::to_string),
            destination: destination.map(str::to_string),
        }
    }

    async fn store_with_workspace() -> (TempDir, WorkspaceStore, PathBuf) {
        let temp = TempDir::new().unwrap();
        let store = WorkspaceStore::new(temp.path()).unwrap();
        let workspace = store.allocate("ws-1").await.unwrap();
        (temp, store, workspace)
    }

    #[tokio::test]
    async fn test_allocate_creates_directory() {
        let (_temp, store, workspace) = store_with_workspace().await;
        assert!(workspace.exists());
        assert!(workspace.starts_with(store.root()));

        // Idempotent
        let again = store.allocate("ws-1").await.unwrap();
        assert_eq!(again, workspace);
    }

    #[tokio::test]
    async fn test_allocate_rejects_bad_ids() {
        let temp = TempDir::new().unwrap();
        let store = WorkspaceStore::new(temp.path()).unwrap();
        assert!(store.allocate("").await.is_err());
        assert!(store.allocate("a/b").await.is_err());
        assert!(store.allocate("..").await.is_err());
    }

    #[tokio::test]
    async fn test_write_read_round_trip_multibyte() {
        let (_temp, store, workspace) = store_with_workspace().await;
        let content = "héllo wörld — 日本語 ✓";

        let write = store
            .file_operation(
                &workspace,
                &request(FileOperation::Write, "sub/dir/notes.txt", Some(content), None),
            )
            .await;
        assert!(write.success);

        let read = store
            .file_operation(
                &workspace,
                &request(FileOperation::Read, "sub/dir/notes.txt", None, None),
            )
            .await;
        assert!(read.success);
        assert_eq!(read.content.as_deref(), Some(content));
    }

    #[tokio::test]
    async fn test_read_missing_reports_not_found() {
        let (_temp, store, workspace) = store_with_workspace().await;
        let read = store
            .file_operation(&workspace, &request(FileOperation::Read, "missing.txt", None, None))
            .await;
        assert!(!read.success);
        assert!(read.not_found);
        assert!(read.message.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_temp, store, workspace) = store_with_workspace().await;

        let delete = store
            .file_operation(&workspace, &request(FileOperation::Delete, "nothing.txt", None, None))
            .await;
        assert!(delete.success);

        store
            .file_operation(
                &workspace,
                &request(FileOperation::Write, "dir/file.txt", Some("x"), None),
            )
            .await;
        let delete_dir = store
            .file_operation(&workspace, &request(FileOperation::Delete, "dir", None, None))
            .await;
        assert!(delete_dir.success);
        assert!(!workspace.join("dir").exists());
    }

    #[tokio::test]
    async fn test_list_variants() {
        let (_temp, store, workspace) = store_with_workspace().await;

        let empty = store
            .file_operation(&workspace, &request(FileOperation::List, "absent", None, None))
            .await;
        assert!(empty.success);
        assert_eq!(empty.files.unwrap(), Vec::<String>::new());

        store
            .file_operation(&workspace, &request(FileOperation::Write, "a.txt", Some("a"), None))
            .await;
        store
            .file_operation(&workspace, &request(FileOperation::Write, "b.txt", Some("b"), None))
            .await;

        let listing = store
            .file_operation(&workspace, &request(FileOperation::List, "", None, None))
            .await;
        assert_eq!(listing.files.unwrap(), vec!["a.txt", "b.txt"]);

        let single = store
            .file_operation(&workspace, &request(FileOperation::List, "a.txt", None, None))
            .await;
        assert_eq!(single.files.unwrap(), vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_copy_file_and_directory() {
        let (_temp, store, workspace) = store_with_workspace().await;

        store
            .file_operation(
                &workspace,
                &request(FileOperation::Write, "src/one.txt", Some("one"), None),
            )
            .await;
        store
            .file_operation(
                &workspace,
                &request(FileOperation::Write, "src/nested/two.txt", Some("two"), None),
            )
            .await;

        let copy_file = store
            .file_operation(
                &workspace,
                &request(FileOperation::Copy, "src/one.txt", None, Some("copied.txt")),
            )
            .await;
        assert!(copy_file.success);
        assert_eq!(
            std::fs::read_to_string(workspace.join("copied.txt")).unwrap(),
            "one"
        );

        let copy_dir = store
            .file_operation(&workspace, &request(FileOperation::Copy, "src", None, Some("dst")))
            .await;
        assert!(copy_dir.success);
        assert_eq!(
            std::fs::read_to_string(workspace.join("dst/nested/two.txt")).unwrap(),
            "two"
        );
    }

    #[tokio::test]
    async fn test_copy_requires_destination() {
        let (_temp, store, workspace) = store_with_workspace().await;
        let result = store
            .file_operation(&workspace, &request(FileOperation::Copy, "a.txt", None, None))
            .await;
        assert!(!result.success);
        assert!(result.message.unwrap().contains("Destination"));
    }

    #[tokio::test]
    async fn test_traversal_is_rejected_as_failure() {
        let (_temp, store, workspace) = store_with_workspace().await;
        let result = store
            .file_operation(
                &workspace,
                &request(FileOperation::Read, "../outside.txt", None, None),
            )
            .await;
        assert!(!result.success);
        assert!(!result.not_found);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_out_of_workspace_is_rejected() {
        let (_temp, store, workspace) = store_with_workspace().await;
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(outside.path(), workspace.join("esc")).unwrap();

        let read = store
            .file_operation(
                &workspace,
                &request(FileOperation::Read, "esc/secret.txt", None, None),
            )
            .await;
        assert!(!read.success);
        assert!(!read.not_found);
        assert!(read.message.unwrap().contains("escapes the workspace"));

        let write = store
            .file_operation(
                &workspace,
                &request(FileOperation::Write, "esc/planted.txt", Some("x"), None),
            )
            .await;
        assert!(!write.success);
        assert!(!outside.path().join("planted.txt").exists());

        let copy = store
            .file_operation(
                &workspace,
                &request(FileOperation::Copy, "esc/secret.txt", None, Some("stolen.txt")),
            )
            .await;
        assert!(!copy.success);
        assert!(!workspace.join("stolen.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_within_workspace_is_allowed() {
        let (_temp, store, workspace) = store_with_workspace().await;
        store
            .file_operation(
                &workspace,
                &request(FileOperation::Write, "data/in.txt", Some("ok"), None),
            )
            .await;
        std::os::unix::fs::symlink(workspace.join("data"), workspace.join("alias")).unwrap();

        let read = store
            .file_operation(
                &workspace,
                &request(FileOperation::Read, "alias/in.txt", None, None),
            )
            .await;
        assert!(read.success);
        assert_eq!(read.content.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_write_requires_content() {
        let (_temp, store, workspace) = store_with_workspace().await;
        let result = store
            .file_operation(&workspace, &request(FileOperation::Write, "a.txt", None, None))
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_remove_workspace_best_effort() {
        let (_temp, store, workspace) = store_with_workspace().await;
        store.remove(&workspace).await;
        assert!(!workspace.exists());
        // A second removal of the same path is not an error.
        store.remove(&workspace).await;
    }
}

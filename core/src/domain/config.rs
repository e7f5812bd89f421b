// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Isolator service configuration
//!
//! All knobs are env-var driven with development-friendly defaults. The
//! daemon binary additionally exposes them as clap flags with the same env
//! fallbacks, so either path lands here.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::container::DEFAULT_IMAGE;

/// Environment variable naming the workspace root directory.
pub const ENV_WORKSPACE_DIR: &str = "WORKSPACE_DIR";
/// Environment variable naming the default sandbox image.
pub const ENV_DEFAULT_IMAGE: &str = "ISOLATOR_DEFAULT_IMAGE";
/// Environment variable naming the isolation network.
pub const ENV_NETWORK: &str = "ISOLATOR_NETWORK";
/// Environment variable overriding the Docker socket path.
pub const ENV_DOCKER_SOCKET: &str = "DOCKER_SOCKET";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolatorConfig {
    /// Host directory holding one subdirectory per workspace.
    pub workspace_root: PathBuf,

    /// Image used when a create request does not name one.
    pub default_image: String,

    /// Name of the shared bridge network all sandboxes join.
    pub network_name: String,

    /// Custom Docker socket path; auto-detect when absent.
    pub docker_socket: Option<String>,

    /// How often the idle reaper scans the registry, in seconds.
    pub reap_interval_seconds: u64,
}

impl Default for IsolatorConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("/var/lib/aegis/workspaces"),
            default_image: DEFAULT_IMAGE.to_string(),
            network_name: "aegis-isolator".to_string(),
            docker_socket: None,
            reap_interval_seconds: 60,
        }
    }
}

impl IsolatorConfig {
    /// Build a configuration from the process environment, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workspace_root: std::env::var(ENV_WORKSPACE_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            default_image: std::env::var(ENV_DEFAULT_IMAGE).unwrap_or(defaults.default_image),
            network_name: std::env::var(ENV_NETWORK).unwrap_or(defaults.network_name),
            docker_socket: std::env::var(ENV_DOCKER_SOCKET).ok(),
            reap_interval_seconds: defaults.reap_interval_seconds,
        }
    }
}

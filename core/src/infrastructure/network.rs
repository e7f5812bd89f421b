// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Network manager
//!
//! One named bridge network shared by every sandbox, created idempotently at
//! startup. Inter-container communication is disabled and egress NAT
//! enabled, so sandboxes can reach the outside world but not each other.
//! Removal at shutdown is best-effort: the network may still be referenced
//! by containers outside our registry, and a failed removal is not fatal.

use crate::domain::error::IsolatorError;
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::Docker;
use std::collections::HashMap;
use tracing::{info, warn};

pub struct NetworkManager {
    docker: Docker,
    name: String,
}

impl NetworkManager {
    pub fn new(docker: Docker, name: String) -> Self {
        Self { docker, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Idempotently create the isolation network.
    pub async fn ensure(&self) -> Result<(), IsolatorError> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![self.name.clone()]);

        let existing = self
            .docker
            .list_networks(Some(ListNetworksOptions { filters }))
            .await
            .map_err(|e| IsolatorError::NetworkSetupFailed(e.to_string()))?;

        // The name filter matches substrings; check for an exact hit.
        if existing
            .iter()
            .any(|n| n.name.as_deref() == Some(self.name.as_str()))
        {
            info!(network = %self.name, "Isolation network already exists");
            return Ok(());
        }

        let mut options = HashMap::new();
        options.insert(
            "com.docker.network.bridge.enable_icc".to_string(),
            "false".to_string(),
        );
        options.insert(
            "com.docker.network.bridge.enable_ip_masquerade".to_string(),
            "true".to_string(),
        );

        self.docker
            .create_network(CreateNetworkOptions {
                name: self.name.clone(),
                driver: "bridge".to_string(),
                options,
                ..Default::default()
            })
            .await
            .map_err(|e| IsolatorError::NetworkSetupFailed(e.to_string()))?;

        info!(network = %self.name, "Created isolation network");
        Ok(())
    }

    /// Best-effort removal; failures are logged, never raised.
    pub async fn remove(&self) {
        match self.docker.remove_network(&self.name).await {
            Ok(()) => info!(network = %self.name, "Removed isolation network"),
            Err(e) => warn!(network = %self.name, error = %e, "Failed to remove isolation network"),
        }
    }
}

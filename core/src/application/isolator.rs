// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Isolator facade
//!
//! The public operation surface of the isolation engine, composing the
//! workspace store, image cache, network manager, registry, lifecycle
//! manager and terminal multiplexer. Constructed once at process startup
//! and injected into the transport layer; `initialize()` at startup,
//! `cleanup()` at shutdown.

use crate::domain::config::IsolatorConfig;
use crate::domain::container::{
    ContainerRecord, CreateContainerRequest, ExecResult, ExecuteCommandRequest,
    FileOperationRequest, FileOperationResult,
};
use crate::domain::error::IsolatorError;
use crate::infrastructure::image::ImageCache;
use crate::infrastructure::lifecycle::ContainerLifecycleManager;
use crate::infrastructure::network::NetworkManager;
use crate::infrastructure::registry::ContainerRegistry;
use crate::infrastructure::terminal::{TerminalFrame, TerminalMultiplexer};
use crate::infrastructure::workspace::WorkspaceStore;
use bollard::Docker;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct Isolator {
    docker: Docker,
    config: IsolatorConfig,
    registry: Arc<ContainerRegistry>,
    images: Arc<ImageCache>,
    network: NetworkManager,
    lifecycle: ContainerLifecycleManager,
    terminal: TerminalMultiplexer,
}

impl Isolator {
    /// Build the engine and its Docker client. Connection is lazy; daemon
    /// reachability is verified by `initialize()`.
    pub fn connect(config: IsolatorConfig) -> Result<Self, IsolatorError> {
        let docker = match &config.docker_socket {
            Some(path) => Docker::connect_with_unix(path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| {
                    IsolatorError::RuntimeUnavailable(format!(
                        "Failed to connect to Docker at {}: {}",
                        path, e
                    ))
                })?,
            None => Docker::connect_with_local_defaults().map_err(|e| {
                IsolatorError::RuntimeUnavailable(format!("Failed to connect to Docker: {}", e))
            })?,
        };

        let workspaces = Arc::new(WorkspaceStore::new(&config.workspace_root)?);
        let registry = Arc::new(ContainerRegistry::new());
        let images = Arc::new(ImageCache::new(docker.clone()));
        let network = NetworkManager::new(docker.clone(), config.network_name.clone());
        let lifecycle = ContainerLifecycleManager::new(
            docker.clone(),
            config.clone(),
            workspaces,
            images.clone(),
            registry.clone(),
        );
        let terminal = TerminalMultiplexer::new(docker.clone(), registry.clone());

        Ok(Self {
            docker,
            config,
            registry,
            images,
            network,
            lifecycle,
            terminal,
        })
    }

    /// Verify daemon connectivity, ensure the isolation network, pre-warm
    /// the default image, and re-adopt containers left over from a previous
    /// process incarnation.
    pub async fn initialize(&self) -> Result<(), IsolatorError> {
        self.docker.ping().await.map_err(|e| {
            IsolatorError::RuntimeUnavailable(format!("Cannot reach Docker daemon: {}", e))
        })?;
        info!("Docker connection established");

        self.network.ensure().await?;
        self.images.ensure(&self.config.default_image).await?;

        let adopted = self.lifecycle.reconcile().await?;
        info!(
            tracked = self.registry.len(),
            adopted, "Isolator initialized"
        );
        Ok(())
    }

    /// Drain the registry by deleting every tracked sandbox, then remove the
    /// isolation network. Per-container failures are logged and skipped so
    /// shutdown always completes.
    pub async fn cleanup(&self) {
        for container_id in self.registry.ids() {
            if let Err(e) = self.lifecycle.delete_container(&container_id).await {
                warn!(container_id = %container_id, error = %e, "Failed to delete container during cleanup");
            }
        }
        self.network.remove().await;
        info!("Isolator cleanup completed");
    }

    pub async fn create_container(
        &self,
        request: CreateContainerRequest,
    ) -> Result<String, IsolatorError> {
        self.lifecycle.create_container(request).await
    }

    pub async fn execute_command(
        &self,
        container_id: &str,
        request: ExecuteCommandRequest,
    ) -> Result<ExecResult, IsolatorError> {
        self.lifecycle.execute_command(container_id, request).await
    }

    pub async fn file_operation(
        &self,
        container_id: &str,
        request: FileOperationRequest,
    ) -> Result<FileOperationResult, IsolatorError> {
        self.lifecycle.file_operation(container_id, request).await
    }

    pub async fn delete_container(&self, container_id: &str) -> Result<(), IsolatorError> {
        self.lifecycle.delete_container(container_id).await
    }

    pub async fn container_info(
        &self,
        container_id: &str,
    ) -> Result<ContainerRecord, IsolatorError> {
        self.lifecycle.container_info(container_id).await
    }

    pub async fn list_containers(&self) -> Vec<ContainerRecord> {
        self.lifecycle.list_containers().await
    }

    pub async fn reap_idle(&self) -> Vec<String> {
        self.lifecycle.reap_idle().await
    }

    pub async fn handle_terminal_session(
        &self,
        container_id: &str,
        inbound: mpsc::Receiver<TerminalFrame>,
        outbound: mpsc::Sender<TerminalFrame>,
    ) {
        self.terminal
            .handle_session(container_id, inbound, outbound)
            .await
    }

    /// Number of sandboxes currently tracked, for the health endpoint.
    pub fn tracked_containers(&self) -> usize {
        self.registry.len()
    }
}

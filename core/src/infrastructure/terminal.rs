// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Terminal session multiplexer
//!
//! Bridges one interactive bidirectional channel per container between a
//! remote caller and a shell spawned inside the sandbox. Frames are tagged
//! (`input`, `output`, `error`); the session loop is a `tokio::select!`
//! between the remote frame stream and the shell's output stream, so the
//! absence of shell output never blocks remote input and is never an error.
//! The loop ends on remote disconnect, shell exit, or an unrecoverable I/O
//! error on either side.
//!
//! Sessions against different containers are independent. Concurrent
//! sessions against the same container each get their own shell exec; the
//! shells share the container but not a pty.

use crate::domain::container::WORKSPACE_MOUNT;
use crate::infrastructure::registry::ContainerRegistry;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::Docker;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One frame of the terminal wire protocol:
/// `{"type": "input" | "output" | "error", "data": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TerminalFrame {
    /// Keystrokes from the remote caller to the shell's stdin.
    Input(String),
    /// Shell output forwarded to the remote caller.
    Output(String),
    /// Structured session error; the channel closes after sending one.
    Error(String),
}

pub struct TerminalMultiplexer {
    docker: Docker,
    registry: Arc<ContainerRegistry>,
}

impl TerminalMultiplexer {
    pub fn new(docker: Docker, registry: Arc<ContainerRegistry>) -> Self {
        Self { docker, registry }
    }

    /// Drive one terminal session until either side disconnects.
    ///
    /// An unknown or non-running container produces a single error frame and
    /// an immediate return; the caller observes the closed channel.
    ///
    /// An attached session registers itself with the registry and bumps the
    /// container's last-activity on every frame, so the idle reaper never
    /// deletes a container out from under a live terminal.
    pub async fn handle_session(
        &self,
        container_id: &str,
        mut inbound: mpsc::Receiver<TerminalFrame>,
        outbound: mpsc::Sender<TerminalFrame>,
    ) {
        if !self.registry.contains(container_id) {
            let _ = outbound
                .send(TerminalFrame::Error(format!(
                    "Container {} not found",
                    container_id
                )))
                .await;
            return;
        }

        let exec = match self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions::<String> {
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(true),
                    working_dir: Some(WORKSPACE_MOUNT.to_string()),
                    cmd: Some(vec!["/bin/bash".to_string()]),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(exec) => exec,
            Err(e) => {
                warn!(container_id = %container_id, error = %e, "Failed to create terminal exec");
                let _ = outbound.send(TerminalFrame::Error(e.to_string())).await;
                return;
            }
        };

        let results = match self
            .docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: false,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(results) => results,
            Err(e) => {
                warn!(container_id = %container_id, error = %e, "Failed to start terminal exec");
                let _ = outbound.send(TerminalFrame::Error(e.to_string())).await;
                return;
            }
        };

        let (mut output, mut input) = match results {
            StartExecResults::Attached { output, input } => (output, input),
            StartExecResults::Detached => {
                let _ = outbound
                    .send(TerminalFrame::Error(
                        "Terminal exec started detached".to_string(),
                    ))
                    .await;
                return;
            }
        };

        self.registry.touch(container_id);
        self.registry.session_started(container_id);
        debug!(container_id = %container_id, "Terminal session started");

        loop {
            tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(TerminalFrame::Input(data)) => {
                        self.registry.touch(container_id);
                        if input.write_all(data.as_bytes()).await.is_err() {
                            break;
                        }
                        if input.flush().await.is_err() {
                            break;
                        }
                    }
                    // Only input frames are meaningful inbound.
                    Some(_) => {}
                    // Remote disconnected.
                    None => break,
                },
                chunk = output.next() => match chunk {
                    Some(Ok(log)) => {
                        self.registry.touch(container_id);
                        let data = String::from_utf8_lossy(&log.into_bytes()).into_owned();
                        if outbound.send(TerminalFrame::Output(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        let _ = outbound.send(TerminalFrame::Error(e.to_string())).await;
                        break;
                    }
                    // Shell exited.
                    None => break,
                },
            }
        }

        self.registry.session_ended(container_id);
        self.registry.touch(container_id);
        debug!(container_id = %container_id, "Terminal session ended");
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Image cache
//!
//! Ensures a requested image is present locally before use, pulling on miss
//! and blocking until the pull stream completes. A tag that already exists
//! locally is never re-pulled, so stale tags are not refreshed. No eviction;
//! images accumulate.

use crate::domain::error::IsolatorError;
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info};

pub struct ImageCache {
    docker: Docker,
}

impl ImageCache {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Make sure `image` is available locally, pulling it if absent.
    pub async fn ensure(&self, image: &str) -> Result<(), IsolatorError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image already present locally");
            return Ok(());
        }

        info!(image = %image, "Pulling image");
        let options = Some(CreateImageOptions::<String> {
            from_image: image.to_string(),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| IsolatorError::ImagePullFailed {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
        }

        info!(image = %image, "Image pulled successfully");
        Ok(())
    }
}

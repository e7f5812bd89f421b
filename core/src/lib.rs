// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! AEGIS Isolator core
//!
//! Container isolation engine for agent execution: per-workspace Docker
//! sandboxes with resource limits, capability dropping and network
//! isolation, plus an interactive terminal bridge.
//!
//! # Architecture
//!
//! - `domain`: records, errors, configuration, path sanitization
//! - `infrastructure`: Docker-facing components (lifecycle, registry,
//!   image cache, network, workspace store, terminal multiplexer)
//! - `application`: the `Isolator` facade
//! - `presentation`: thin axum HTTP/WebSocket surface

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use application::isolator::Isolator;
pub use domain::*;

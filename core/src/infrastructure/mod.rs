// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod image;
pub mod lifecycle;
pub mod network;
pub mod registry;
pub mod terminal;
pub mod workspace;

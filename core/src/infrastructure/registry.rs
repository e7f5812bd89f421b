// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Container registry
//!
//! Authoritative in-memory bookkeeping for managed sandboxes: one record per
//! live container id. The lifecycle manager is the only writer; readers
//! reconcile the cached status against the live daemon before presenting it.
//! Memory-only: restart recovery happens through label-based reconciliation
//! at startup, not persistence.

use crate::domain::container::{ContainerRecord, ContainerStatus};
use chrono::Utc;
use dashmap::DashMap;

#[derive(Default)]
pub struct ContainerRegistry {
    records: DashMap<String, ContainerRecord>,
    sessions: DashMap<String, usize>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, record: ContainerRecord) {
        self.records.insert(record.container_id.clone(), record);
    }

    pub fn get(&self, container_id: &str) -> Option<ContainerRecord> {
        self.records.get(container_id).map(|r| r.clone())
    }

    pub fn contains(&self, container_id: &str) -> bool {
        self.records.contains_key(container_id)
    }

    pub fn remove(&self, container_id: &str) -> Option<ContainerRecord> {
        self.sessions.remove(container_id);
        self.records.remove(container_id).map(|(_, record)| record)
    }

    pub fn list(&self) -> Vec<ContainerRecord> {
        self.records.iter().map(|r| r.clone()).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Bump last-activity for a sandbox; no-op for unknown ids.
    pub fn touch(&self, container_id: &str) {
        if let Some(mut record) = self.records.get_mut(container_id) {
            record.last_activity = Utc::now();
        }
    }

    /// Refresh the cached status after a runtime query.
    pub fn set_status(&self, container_id: &str, status: ContainerStatus) {
        if let Some(mut record) = self.records.get_mut(container_id) {
            record.status = status;
        }
    }

    /// Record an interactive session opening against a container. The idle
    /// reaper treats a container with open sessions as active regardless of
    /// its last-activity timestamp.
    pub fn session_started(&self, container_id: &str) {
        *self
            .sessions
            .entry(container_id.to_string())
            .or_insert(0) += 1;
    }

    /// Record an interactive session closing. Saturates at zero.
    pub fn session_ended(&self, container_id: &str) {
        if let Some(mut count) = self.sessions.get_mut(container_id) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn active_sessions(&self, container_id: &str) -> usize {
        self.sessions
            .get(container_id)
            .map(|count| *count)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(id: &str) -> ContainerRecord {
        ContainerRecord {
            container_id: id.to_string(),
            workspace_id: format!("ws-{}", id),
            image: "python:3.11-slim".to_string(),
            status: ContainerStatus::Running,
            created_at: Utc::now(),
            workspace_path: PathBuf::from("/tmp").join(id),
            timeout: 3600,
            last_activity: Utc::now(),
        }
    }

    #[test]
    fn test_put_get_remove() {
        let registry = ContainerRegistry::new();
        assert!(registry.is_empty());

        registry.put(record("c1"));
        assert!(registry.contains("c1"));
        assert_eq!(registry.get("c1").unwrap().workspace_id, "ws-c1");
        assert_eq!(registry.len(), 1);

        let removed = registry.remove("c1").unwrap();
        assert_eq!(removed.container_id, "c1");
        assert!(registry.get("c1").is_none());
        assert!(registry.remove("c1").is_none());
    }

    #[test]
    fn test_list_and_ids() {
        let registry = ContainerRegistry::new();
        registry.put(record("c1"));
        registry.put(record("c2"));

        let mut ids = registry.ids();
        ids.sort();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_touch_bumps_last_activity() {
        let registry = ContainerRegistry::new();
        let mut stale = record("c1");
        stale.last_activity = Utc::now() - chrono::Duration::seconds(600);
        registry.put(stale);

        let before = registry.get("c1").unwrap().last_activity;
        registry.touch("c1");
        let after = registry.get("c1").unwrap().last_activity;
        assert!(after > before);

        // Unknown id is a no-op, not a panic.
        registry.touch("unknown");
    }

    #[test]
    fn test_set_status() {
        let registry = ContainerRegistry::new();
        registry.put(record("c1"));
        registry.set_status("c1", ContainerStatus::NotFound);
        assert_eq!(registry.get("c1").unwrap().status, ContainerStatus::NotFound);
    }

    #[test]
    fn test_session_tracking() {
        let registry = ContainerRegistry::new();
        registry.put(record("c1"));
        assert_eq!(registry.active_sessions("c1"), 0);

        registry.session_started("c1");
        registry.session_started("c1");
        assert_eq!(registry.active_sessions("c1"), 2);

        registry.session_ended("c1");
        assert_eq!(registry.active_sessions("c1"), 1);

        // Unbalanced ends saturate at zero instead of underflowing.
        registry.session_ended("c1");
        registry.session_ended("c1");
        assert_eq!(registry.active_sessions("c1"), 0);

        registry.session_started("c1");
        registry.remove("c1");
        assert_eq!(registry.active_sessions("c1"), 0);
    }

    #[test]
    fn test_put_replaces_existing() {
        let registry = ContainerRegistry::new();
        registry.put(record("c1"));
        let mut updated = record("c1");
        updated.image = "node:20-slim".to_string();
        registry.put(updated);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("c1").unwrap().image, "node:20-slim");
    }
}

//! Per-context in-memory resource cache and state snapshots

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::resources::{ResourceName, ResourceObject};

/// Where a context sits in its startup pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckingState {
    /// Not probing: either never started or informers are running
    #[default]
    Idle,
    /// Probe in flight (client build, health check, permission check)
    Checking,
    /// Probe failed; waiting out the backoff before the next attempt
    Waiting,
}

/// Mutable per-context record owned by the context's runtime.
///
/// Within one resource kind's list no two entries share a uid: an update
/// replaces, never duplicates. Insertion order is preserved but carries no
/// meaning.
#[derive(Debug, Default)]
pub struct ContextState {
    resources: HashMap<ResourceName, Vec<ResourceObject>>,
    pub reachable: bool,
    pub checking: CheckingState,
    pub error: Option<String>,
}

impl ContextState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry with `object.uid`.
    pub fn apply_upsert(&mut self, resource: ResourceName, object: ResourceObject) {
        let list = self.resources.entry(resource).or_default();
        list.retain(|existing| existing.uid != object.uid);
        list.push(object);
    }

    /// Remove the entry with `uid`, if present.
    pub fn apply_delete(&mut self, resource: ResourceName, uid: &str) {
        if let Some(list) = self.resources.get_mut(&resource) {
            list.retain(|existing| existing.uid != uid);
        }
    }

    /// Replace the whole collection with a fresh list snapshot, keeping the
    /// last occurrence of any duplicated uid.
    pub fn replace(&mut self, resource: ResourceName, objects: Vec<ResourceObject>) {
        let mut deduped: Vec<ResourceObject> = Vec::with_capacity(objects.len());
        for object in objects {
            deduped.retain(|existing| existing.uid != object.uid);
            deduped.push(object);
        }
        self.resources.insert(resource, deduped);
    }

    /// Drop the cached collection for `resource`.
    pub fn clear(&mut self, resource: ResourceName) {
        self.resources.remove(&resource);
    }

    /// Copy of the cached collection; empty if the kind was never synced.
    pub fn snapshot(&self, resource: ResourceName) -> Vec<ResourceObject> {
        self.resources.get(&resource).cloned().unwrap_or_default()
    }

    pub fn resource_counts(&self) -> BTreeMap<ResourceName, usize> {
        self.resources
            .iter()
            .map(|(resource, list)| (*resource, list.len()))
            .collect()
    }

    pub fn general_state(&self) -> ContextGeneralState {
        ContextGeneralState {
            reachable: self.reachable,
            checking: self.checking,
            error: self.error.clone(),
            resource_counts: self.resource_counts(),
        }
    }
}

/// Read-only summary published on the general-state channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextGeneralState {
    pub reachable: bool,
    pub checking: CheckingState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub resource_counts: BTreeMap<ResourceName, usize>,
}

/// Payload published on a per-resource channel for the current context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatePayload {
    pub context: String,
    pub resource: ResourceName,
    pub items: Vec<ResourceObject>,
}

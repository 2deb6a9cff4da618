//! Reference counts for on-demand secondary resource watchers

use std::collections::HashMap;

use parking_lot::Mutex;

use super::resources::ResourceName;

/// Tracks how many consumers are subscribed to each secondary resource kind.
///
/// Primary kinds are always watched for an active context and never pass
/// through here. A secondary informer is worth starting only while the count
/// for its kind is non-zero.
#[derive(Debug, Default)]
pub struct ResourceWatchersRegistry {
    counts: Mutex<HashMap<ResourceName, usize>>,
}

impl ResourceWatchersRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, resource: ResourceName) {
        *self.counts.lock().entry(resource).or_insert(0) += 1;
    }

    /// Decrement the count for `resource`; saturates at zero.
    pub fn unsubscribe(&self, resource: ResourceName) {
        let mut counts = self.counts.lock();
        if let Some(count) = counts.get_mut(&resource) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&resource);
            }
        }
    }

    pub fn has_subscribers(&self, resource: ResourceName) -> bool {
        self.counts.lock().get(&resource).copied().unwrap_or(0) > 0
    }

    /// Secondary kinds with at least one subscriber, for restart-on-reachable.
    pub fn subscribed(&self) -> Vec<ResourceName> {
        let counts = self.counts.lock();
        let mut kinds: Vec<_> = counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(resource, _)| *resource)
            .collect();
        kinds.sort();
        kinds
    }
}

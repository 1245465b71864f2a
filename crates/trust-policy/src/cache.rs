// cache.rs - Compiled-policy cache keyed by (policy id, version).
//
// No TTL: entries stay until a policy-mutating operation invalidates them.
// Compiling the same (policy, version) twice under contention is harmless
// because compilation is a pure function of an immutable body; last write wins.

use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

use crate::evaluator::CompiledPolicy;

/// Process-wide store of compiled artifacts, shared by reference.
#[derive(Default)]
pub struct CompiledCache {
    entries: RwLock<HashMap<(Uuid, u32), CompiledPolicy>>,
}

impl CompiledCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a compiled artifact.
    pub fn get(&self, policy_id: Uuid, version: u32) -> Option<CompiledPolicy> {
        // A poisoned lock only means a writer panicked mid-insert; the map
        // itself is still a valid HashMap.
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&(policy_id, version)).cloned()
    }

    /// Store a compiled artifact, replacing any previous one.
    pub fn put(&self, policy_id: Uuid, version: u32, compiled: CompiledPolicy) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert((policy_id, version), compiled);
    }

    /// Drop one version, or every cached version of the policy when
    /// `version` is None.
    pub fn delete(&self, policy_id: Uuid, version: Option<u32>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match version {
            Some(v) => {
                entries.remove(&(policy_id, v));
            }
            None => entries.retain(|(pid, _), _| *pid != policy_id),
        }
        tracing::debug!(%policy_id, ?version, "invalidated compiled policy cache");
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn artifact(n: u32) -> CompiledPolicy {
        Arc::new(n)
    }

    #[test]
    fn put_then_get() {
        let cache = CompiledCache::new();
        let pid = Uuid::new_v4();
        assert!(cache.get(pid, 1).is_none());
        cache.put(pid, 1, artifact(1));
        let hit = cache.get(pid, 1).unwrap();
        assert_eq!(hit.downcast_ref::<u32>(), Some(&1));
    }

    #[test]
    fn delete_single_version() {
        let cache = CompiledCache::new();
        let pid = Uuid::new_v4();
        cache.put(pid, 1, artifact(1));
        cache.put(pid, 2, artifact(2));
        cache.delete(pid, Some(1));
        assert!(cache.get(pid, 1).is_none());
        assert!(cache.get(pid, 2).is_some());
    }

    #[test]
    fn delete_all_versions_leaves_other_policies() {
        let cache = CompiledCache::new();
        let pid = Uuid::new_v4();
        let other = Uuid::new_v4();
        cache.put(pid, 1, artifact(1));
        cache.put(pid, 2, artifact(2));
        cache.put(other, 1, artifact(3));
        cache.delete(pid, None);
        assert!(cache.get(pid, 1).is_none());
        assert!(cache.get(pid, 2).is_none());
        assert!(cache.get(other, 1).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_puts_are_safe() {
        let cache = Arc::new(CompiledCache::new());
        let pid = Uuid::new_v4();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for v in 0..50u32 {
                        cache.put(pid, v, artifact(i));
                        let _ = cache.get(pid, v);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 50);
    }
}

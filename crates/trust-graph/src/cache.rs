// cache.rs - Read-through, write-invalidate cache in front of any graph.
//
// Check results are cached under `subject#relation@object` with separate
// lifetimes for allow and deny answers; denies are usually transient ("not
// yet provisioned") and expire sooner. Errors are never cached.
//
// Every upsert goes through here and clears the whole map, then publishes an
// invalidation so peer processes clear theirs. Each clear bumps a generation
// counter; a miss stores its answer only if no clear happened while the inner
// graph was being asked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::GraphError;
use crate::graph::{
    CheckResult, GraphClient, GraphInvalidationPublisher, NoopGraphInvalidation, SOURCE_CACHE,
};
use crate::tuple::{GraphExpansion, RelationRef, Tuple};

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    allowed: bool,
    expires: Instant,
}

/// TTL decorator over a GraphClient.
pub struct CachedGraph {
    inner: Arc<dyn GraphClient>,
    ttl: Duration,
    neg_ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
    generation: AtomicU64,
    publisher: Arc<dyn GraphInvalidationPublisher>,
}

impl CachedGraph {
    /// Cache allows for `ttl` and denies for `neg_ttl`. A zero `neg_ttl`
    /// means denies use `ttl` too.
    pub fn new(inner: Arc<dyn GraphClient>, ttl: Duration, neg_ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            neg_ttl,
            entries: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            publisher: Arc::new(NoopGraphInvalidation),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn GraphInvalidationPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    fn key(subject: &RelationRef, relation: &str, object: &RelationRef) -> String {
        format!("{}#{}@{}", subject, relation, object)
    }

    /// Drop every cached answer. Called on local writes and on invalidation
    /// events received from other processes.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.generation.fetch_add(1, Ordering::SeqCst);
        entries.clear();
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GraphClient for CachedGraph {
    fn upsert_batch(&self, tuples: &[Tuple]) -> Result<(), GraphError> {
        self.inner.upsert_batch(tuples)?;
        self.clear();
        self.publisher.publish();
        Ok(())
    }

    fn check(
        &self,
        subject: &RelationRef,
        relation: &str,
        object: &RelationRef,
    ) -> Result<CheckResult, GraphError> {
        let key = Self::key(subject, relation, object);
        let generation = {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = entries.get(&key) {
                if Instant::now() < entry.expires {
                    return Ok(CheckResult::new(entry.allowed, SOURCE_CACHE));
                }
            }
            self.generation.load(Ordering::SeqCst)
        };

        // The lock is not held across the inner call; two concurrent misses
        // on one key both ask the inner graph and the later store wins.
        let result = self.inner.check(subject, relation, object)?;
        let ttl = if !result.allowed && !self.neg_ttl.is_zero() {
            self.neg_ttl
        } else {
            self.ttl
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if self.generation.load(Ordering::SeqCst) == generation {
            entries.insert(
                key,
                CacheEntry {
                    allowed: result.allowed,
                    expires: Instant::now() + ttl,
                },
            );
        } else {
            tracing::debug!(%subject, relation, %object, "graph changed during check; answer not cached");
        }
        Ok(result)
    }

    fn expand(
        &self,
        relation: &str,
        object: &RelationRef,
        depth: i32,
    ) -> Result<GraphExpansion, GraphError> {
        self.inner.expand(relation, object, depth)
    }
}

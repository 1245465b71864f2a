// store.rs - TupleStore trait and in-memory implementation.
//
// The store is the single source of truth for relationship edges. Graph
// implementations query it; caches sit in front of the graph, never the
// store. A SQL or remote backend implements the same trait.

use std::sync::RwLock;

use crate::error::GraphError;
use crate::tuple::{RelationRef, Tuple};

/// Persistence for relationship tuples.
pub trait TupleStore: Send + Sync {
    /// Add tuples. Duplicates are ignored.
    fn insert(&self, tuples: &[Tuple]) -> Result<(), GraphError>;

    /// Relations `subject` holds directly on `object`.
    fn relations_between(
        &self,
        subject: &RelationRef,
        object: &RelationRef,
    ) -> Result<Vec<String>, GraphError>;

    /// Every outgoing edge of `subject` (tuples whose subject it is).
    fn outgoing(&self, subject: &RelationRef) -> Result<Vec<Tuple>, GraphError>;

    /// Subjects holding exactly `relation` on `object`.
    fn subjects_of(
        &self,
        relation: &str,
        object: &RelationRef,
    ) -> Result<Vec<RelationRef>, GraphError>;
}

/// Vec-backed tuple store, in insertion order.
#[derive(Default)]
pub struct MemoryTupleStore {
    tuples: RwLock<Vec<Tuple>>,
}

impl MemoryTupleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<Tuple>>, GraphError> {
        self.tuples
            .read()
            .map_err(|_| GraphError::StoreUnavailable("tuple store lock poisoned".to_string()))
    }
}

impl TupleStore for MemoryTupleStore {
    fn insert(&self, tuples: &[Tuple]) -> Result<(), GraphError> {
        for t in tuples {
            t.validate()?;
        }
        let mut stored = self
            .tuples
            .write()
            .map_err(|_| GraphError::StoreUnavailable("tuple store lock poisoned".to_string()))?;
        for t in tuples {
            if !stored.contains(t) {
                stored.push(t.clone());
            }
        }
        Ok(())
    }

    fn relations_between(
        &self,
        subject: &RelationRef,
        object: &RelationRef,
    ) -> Result<Vec<String>, GraphError> {
        Ok(self
            .read()?
            .iter()
            .filter(|t| t.subject_is(subject) && t.object_is(object))
            .map(|t| t.relation.clone())
            .collect())
    }

    fn outgoing(&self, subject: &RelationRef) -> Result<Vec<Tuple>, GraphError> {
        Ok(self
            .read()?
            .iter()
            .filter(|t| t.subject_is(subject))
            .cloned()
            .collect())
    }

    fn subjects_of(
        &self,
        relation: &str,
        object: &RelationRef,
    ) -> Result<Vec<RelationRef>, GraphError> {
        Ok(self
            .read()?
            .iter()
            .filter(|t| t.relation == relation && t.object_is(object))
            .map(Tuple::subject)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(s: &str) -> RelationRef {
        s.parse().unwrap()
    }

    #[test]
    fn insert_dedupes() {
        let store = MemoryTupleStore::new();
        let t = Tuple::new(&r("team:devs"), "member", &r("user:alice"));
        store.insert(&[t.clone(), t.clone()]).unwrap();
        store.insert(&[t]).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn invalid_tuple_rejects_whole_batch() {
        let store = MemoryTupleStore::new();
        let good = Tuple::new(&r("team:devs"), "member", &r("user:alice"));
        let bad = Tuple::new(&r("team:devs"), "", &r("user:bob"));
        assert!(store.insert(&[good, bad]).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn queries() {
        let store = MemoryTupleStore::new();
        store
            .insert(&[
                Tuple::new(&r("team:devs"), "member", &r("user:alice")),
                Tuple::new(&r("doc:1"), "viewer", &r("user:alice")),
                Tuple::new(&r("doc:1"), "editor", &r("user:alice")),
                Tuple::new(&r("doc:1"), "viewer", &r("user:bob")),
            ])
            .unwrap();
        assert_eq!(
            store.relations_between(&r("user:alice"), &r("doc:1")).unwrap(),
            vec!["viewer".to_string(), "editor".to_string()]
        );
        assert_eq!(store.outgoing(&r("user:alice")).unwrap().len(), 3);
        assert_eq!(
            store.subjects_of("viewer", &r("doc:1")).unwrap(),
            vec![r("user:alice"), r("user:bob")]
        );
    }
}

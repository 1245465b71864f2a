// local.rs - Reference in-process graph: direct check plus bounded BFS.
//
// Check(subject, relation, object):
// 1. Any tuple subject→object whose relation implies the wanted one? Allow.
// 2. BFS outward from the subject. At each dequeued node below the depth
//    cap, an outgoing edge to the target whose relation implies the wanted
//    one allows. Only hop relations (member, can_act_for) are followed to
//    reach further nodes, so a `viewer` edge never propagates privilege.
// 3. Frontier exhausted: deny.
//
// With the default cap of 3, grant edges are examined from nodes at most two
// membership/delegation hops away from the subject.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::error::GraphError;
use crate::graph::{CheckResult, GraphClient, SOURCE_LOCAL};
use crate::relations::RelationHierarchy;
use crate::store::TupleStore;
use crate::tuple::{GraphExpansion, RelationRef, Tuple};

/// Hop cap for transitive traversal.
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Edge relations that may serve as intermediate hops.
pub const DEFAULT_HOP_RELATIONS: [&str; 2] = ["member", "can_act_for"];

/// Relation used for children of an expansion tree.
pub const EXPAND_CHILD_RELATION: &str = "subject";

pub struct LocalGraph {
    store: Arc<dyn TupleStore>,
    hierarchy: RelationHierarchy,
    max_depth: usize,
    hop_relations: Vec<String>,
}

impl LocalGraph {
    /// Graph over `store` with the default hierarchy, cap and hop relations.
    pub fn new(store: Arc<dyn TupleStore>) -> Self {
        Self {
            store,
            hierarchy: RelationHierarchy::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            hop_relations: DEFAULT_HOP_RELATIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_hierarchy(mut self, hierarchy: RelationHierarchy) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_hop_relations<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hop_relations = relations.into_iter().map(Into::into).collect();
        self
    }

    fn is_hop(&self, relation: &str) -> bool {
        self.hop_relations.iter().any(|r| r == relation)
    }

    fn direct_or_implied(
        &self,
        subject: &RelationRef,
        wanted: &str,
        object: &RelationRef,
    ) -> Result<bool, GraphError> {
        Ok(self
            .store
            .relations_between(subject, object)?
            .iter()
            .any(|have| self.hierarchy.implies(have, wanted)))
    }

    fn traverse(
        &self,
        subject: &RelationRef,
        wanted: &str,
        object: &RelationRef,
    ) -> Result<bool, GraphError> {
        let mut seen: HashSet<RelationRef> = HashSet::from([subject.clone()]);
        let mut queue: VecDeque<(RelationRef, usize)> = VecDeque::from([(subject.clone(), 0)]);

        while let Some((node, depth)) = queue.pop_front() {
            if depth >= self.max_depth {
                continue;
            }
            for edge in self.store.outgoing(&node)? {
                if edge.object_is(object) && self.hierarchy.implies(&edge.relation, wanted) {
                    tracing::debug!(%subject, %object, via = %node, depth, "relationship granted transitively");
                    return Ok(true);
                }
                if self.is_hop(&edge.relation) {
                    let next = edge.object();
                    if seen.insert(next.clone()) {
                        queue.push_back((next, depth + 1));
                    }
                }
            }
        }
        Ok(false)
    }
}

impl GraphClient for LocalGraph {
    fn upsert_batch(&self, tuples: &[Tuple]) -> Result<(), GraphError> {
        self.store.insert(tuples)?;
        tracing::debug!(count = tuples.len(), "upserted relationship tuples");
        Ok(())
    }

    fn check(
        &self,
        subject: &RelationRef,
        relation: &str,
        object: &RelationRef,
    ) -> Result<CheckResult, GraphError> {
        if relation.trim().is_empty() {
            return Err(GraphError::InvalidRelation(relation.to_string()));
        }
        if self.direct_or_implied(subject, relation, object)? {
            return Ok(CheckResult::new(true, SOURCE_LOCAL));
        }
        let allowed = self.traverse(subject, relation, object)?;
        Ok(CheckResult::new(allowed, SOURCE_LOCAL))
    }

    fn expand(
        &self,
        relation: &str,
        object: &RelationRef,
        depth: i32,
    ) -> Result<GraphExpansion, GraphError> {
        let mut expansion = GraphExpansion {
            relation: relation.to_string(),
            object: object.clone(),
            children: Vec::new(),
        };
        if depth <= 0 {
            return Ok(expansion);
        }
        expansion.children = self
            .store
            .subjects_of(relation, object)?
            .into_iter()
            .map(|subject| GraphExpansion {
                relation: EXPAND_CHILD_RELATION.to_string(),
                object: subject,
                children: Vec::new(),
            })
            .collect();
        Ok(expansion)
    }
}

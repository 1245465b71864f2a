// tuple.rs - Graph nodes, relationship edges and expansion trees.
//
// A Tuple (object, relation, subject) reads "subject holds relation on
// object": `(team:devs, member, user:alice)` means alice is a member of devs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// A node in the graph, written `namespace:id` (e.g. `agent:42`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationRef {
    pub namespace: String,
    pub object_id: String,
}

impl RelationRef {
    pub fn new(namespace: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            object_id: object_id.into(),
        }
    }
}

impl fmt::Display for RelationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.object_id)
    }
}

impl FromStr for RelationRef {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((ns, id)) if !ns.is_empty() && !id.is_empty() => Ok(Self::new(ns, id)),
            _ => Err(GraphError::InvalidRef(s.to_string())),
        }
    }
}

/// One relationship edge. Tuples are only ever added, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tuple {
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    pub subject_type: String,
    pub subject_id: String,
}

impl Tuple {
    /// `subject` holds `relation` on `object`.
    pub fn new(object: &RelationRef, relation: impl Into<String>, subject: &RelationRef) -> Self {
        Self {
            object_type: object.namespace.clone(),
            object_id: object.object_id.clone(),
            relation: relation.into(),
            subject_type: subject.namespace.clone(),
            subject_id: subject.object_id.clone(),
        }
    }

    pub fn object(&self) -> RelationRef {
        RelationRef::new(&self.object_type, &self.object_id)
    }

    pub fn subject(&self) -> RelationRef {
        RelationRef::new(&self.subject_type, &self.subject_id)
    }

    pub fn object_is(&self, node: &RelationRef) -> bool {
        self.object_type == node.namespace && self.object_id == node.object_id
    }

    pub fn subject_is(&self, node: &RelationRef) -> bool {
        self.subject_type == node.namespace && self.subject_id == node.object_id
    }

    /// Reject tuples with empty components before they reach a store.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.relation.trim().is_empty() {
            return Err(GraphError::InvalidRelation(self.relation.clone()));
        }
        for (part, value) in [
            ("object", (&self.object_type, &self.object_id)),
            ("subject", (&self.subject_type, &self.subject_id)),
        ] {
            if value.0.is_empty() || value.1.is_empty() {
                return Err(GraphError::InvalidRef(format!(
                    "{} {}:{}",
                    part, value.0, value.1
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}#{}@{}:{}",
            self.object_type, self.object_id, self.relation, self.subject_type, self.subject_id
        )
    }
}

/// Simplified expansion tree, for debugging who holds a relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphExpansion {
    pub relation: String,
    pub object: RelationRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<GraphExpansion>,
}

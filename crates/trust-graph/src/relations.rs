// relations.rs - Declarative relation implication table.
//
// Each entry lists the relations a relation directly implies. The table is
// validated and closed transitively once at construction, so `implies` is a
// set lookup at check time:
//
//   owner  -> [editor]
//   editor -> [viewer]
//
// gives owner ⊇ editor ⊇ viewer. A relation always implies itself.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::GraphError;

/// Transitively closed relation implication table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationHierarchy {
    /// relation -> every relation it implies (excluding itself)
    closure: HashMap<String, HashSet<String>>,
}

impl RelationHierarchy {
    /// Build from direct implications. Rejects empty names and cycles.
    pub fn new<I, R, S>(direct: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = (R, Vec<S>)>,
        R: Into<String>,
        S: Into<String>,
    {
        let mut table: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (relation, implied) in direct {
            let relation = relation.into();
            if relation.trim().is_empty() {
                return Err(GraphError::InvalidHierarchy(
                    "relation names must not be empty".to_string(),
                ));
            }
            let entry = table.entry(relation.clone()).or_default();
            for target in implied {
                let target = target.into();
                if target.trim().is_empty() {
                    return Err(GraphError::InvalidHierarchy(format!(
                        "'{}' implies an empty relation name",
                        relation
                    )));
                }
                if target == relation {
                    return Err(GraphError::InvalidHierarchy(format!(
                        "'{}' implies itself",
                        relation
                    )));
                }
                entry.insert(target);
            }
        }

        let mut closure = HashMap::new();
        for relation in table.keys() {
            let mut reached = HashSet::new();
            let mut stack: Vec<&String> = table[relation].iter().collect();
            while let Some(next) = stack.pop() {
                if next == relation {
                    return Err(GraphError::InvalidHierarchy(format!(
                        "cycle through '{}'",
                        relation
                    )));
                }
                if reached.insert(next.clone()) {
                    if let Some(more) = table.get(next) {
                        stack.extend(more.iter());
                    }
                }
            }
            closure.insert(relation.clone(), reached);
        }
        Ok(Self { closure })
    }

    /// Does holding `have` satisfy a check for `want`?
    pub fn implies(&self, have: &str, want: &str) -> bool {
        have == want
            || self
                .closure
                .get(have)
                .is_some_and(|implied| implied.contains(want))
    }
}

impl Default for RelationHierarchy {
    /// owner ⊇ editor ⊇ viewer
    fn default() -> Self {
        let mut closure = HashMap::new();
        closure.insert(
            "owner".to_string(),
            HashSet::from(["editor".to_string(), "viewer".to_string()]),
        );
        closure.insert("editor".to_string(), HashSet::from(["viewer".to_string()]));
        Self { closure }
    }
}

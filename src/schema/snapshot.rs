use rustc_hash::FxHashMap;

use super::{SchemaNode, SchemaUpdate};
use crate::types::TypeId;

/// Known type of a predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PredicateType {
    /// Storage type.
    pub ty: TypeId,
    /// Declared through a schema mutation rather than inferred from data.
    pub declared: bool,
}

/// Predicate types visible to one request: stored schema overlaid with the
/// request's own schema updates.
#[derive(Clone, Debug, Default)]
pub struct SchemaSnapshot {
    types: FxHashMap<String, PredicateType>,
}

impl SchemaSnapshot {
    /// Empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the schema as storage reported it.
    pub fn from_nodes(nodes: &[SchemaNode]) -> Self {
        let types = nodes
            .iter()
            .map(|node| {
                (
                    node.predicate.clone(),
                    PredicateType {
                        ty: node.value_type,
                        declared: node.explicit,
                    },
                )
            })
            .collect();
        Self { types }
    }

    /// Applies declarations on top; later declarations win.
    pub fn overlay(&mut self, updates: &[SchemaUpdate]) {
        for update in updates {
            self.types.insert(
                update.predicate.clone(),
                PredicateType {
                    ty: update.value_type,
                    declared: true,
                },
            );
        }
    }

    /// Records types inferred from data for predicates not yet known.
    pub fn infer(&mut self, updates: &[SchemaUpdate]) {
        for update in updates {
            self.types
                .entry(update.predicate.clone())
                .or_insert(PredicateType {
                    ty: update.value_type,
                    declared: false,
                });
        }
    }

    /// Type of `predicate`, if known.
    pub fn get(&self, predicate: &str) -> Option<PredicateType> {
        self.types.get(predicate).copied()
    }

    /// Number of predicates with a known type.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no predicate type is known.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tracing::debug;

use super::convert::{coerce, convert};
use super::nquad::{Literal, NQuad, NQuads, NodeRef, ObjectValue};
use crate::error::ErrorClass;
use crate::query::VarBindings;
use crate::schema::{SchemaSnapshot, SchemaUpdate};
use crate::storage::{DirectedEdge, EdgeValue, StorageError, UidAllocator};
use crate::types::{TypeId, Uid, Value};

/// Whether a batch may introduce new nodes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AllocationPolicy {
    /// Blank labels get fresh uids.
    #[default]
    Allow,
    /// Any blank label fails the batch before anything is allocated.
    Forbid,
}

/// Facts resolved into storage edges.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaterializedMutation {
    /// Edges in input order.
    pub edges: Vec<DirectedEdge>,
    /// Uid allocated for each blank label in the batch.
    pub new_uids: BTreeMap<String, Uid>,
    /// Types of predicates first seen in this batch.
    pub inferred: Vec<SchemaUpdate>,
}

/// Why a batch could not be materialized.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// `uid(v)` or `val(v)` names a variable no query block defined.
    #[error("unbound variable reference {name}")]
    UnboundVariable {
        /// Variable name.
        name: String,
    },
    /// Literal does not parse as the predicate's type.
    #[error("type mismatch for predicate {predicate}: expected {expected} got literal {literal:?}")]
    TypeMismatch {
        /// Predicate name.
        predicate: String,
        /// Predicate type.
        expected: TypeId,
        /// Offending literal text.
        literal: String,
    },
    /// Fact disagrees with the predicate's established type.
    #[error("schema conflict for predicate {predicate}: type is {expected}, fact uses {found}")]
    SchemaConflict {
        /// Predicate name.
        predicate: String,
        /// Established type.
        expected: TypeId,
        /// Type the fact carries.
        found: TypeId,
    },
    /// Batch needs new nodes but allocation is forbidden.
    #[error("allocating nodes via query variables is not allowed (labels: {})", labels.join(", "))]
    AllocationForbidden {
        /// Blank labels in the batch.
        labels: Vec<String>,
    },
    /// Allocator handed out a uid that is invalid or already taken.
    #[error("duplicate new-node allocation inconsistency: {label} got {uid}")]
    AllocationInconsistency {
        /// Label being allocated.
        label: String,
        /// Uid returned.
        uid: Uid,
    },
    /// Allocator failed.
    #[error("uid allocation failed: {0}")]
    Allocator(#[from] StorageError),
}

impl MaterializeError {
    /// Classification of this failure.
    pub fn class(&self) -> ErrorClass {
        match self {
            MaterializeError::UnboundVariable { .. }
            | MaterializeError::TypeMismatch { .. }
            | MaterializeError::SchemaConflict { .. }
            | MaterializeError::AllocationForbidden { .. } => ErrorClass::InvalidRequest,
            MaterializeError::AllocationInconsistency { .. } => ErrorClass::Fatal,
            MaterializeError::Allocator(_) => ErrorClass::Internal,
        }
    }
}

/// Turns facts into [`DirectedEdge`]s.
///
/// Each call to [`Materializer::materialize`] allocates independently: the
/// same label in two calls gets two different uids.
pub struct Materializer<'a, A: UidAllocator + ?Sized> {
    allocator: &'a A,
    schema: &'a SchemaSnapshot,
    vars: &'a VarBindings,
    policy: AllocationPolicy,
}

struct Batch<'a> {
    schema: &'a SchemaSnapshot,
    vars: &'a VarBindings,
    new_uids: BTreeMap<String, Uid>,
    local_types: FxHashMap<String, TypeId>,
    out: MaterializedMutation,
}

impl<'a, A: UidAllocator + ?Sized> Materializer<'a, A> {
    /// Materializer resolving variables against `vars` and types against `schema`.
    pub fn new(
        allocator: &'a A,
        schema: &'a SchemaSnapshot,
        vars: &'a VarBindings,
    ) -> Self {
        Self {
            allocator,
            schema,
            vars,
            policy: AllocationPolicy::Allow,
        }
    }

    /// Sets the allocation policy.
    pub fn allocation(mut self, policy: AllocationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolves `quads` in order. Any failure discards the whole batch.
    pub fn materialize(&self, quads: &NQuads) -> Result<MaterializedMutation, MaterializeError> {
        let new_uids = self.allocate(quads)?;
        let mut batch = Batch {
            schema: self.schema,
            vars: self.vars,
            new_uids,
            local_types: FxHashMap::default(),
            out: MaterializedMutation::default(),
        };
        for quad in quads {
            batch.push(quad)?;
        }
        batch.out.new_uids = batch.new_uids;
        Ok(batch.out)
    }

    fn allocate(&self, quads: &NQuads) -> Result<BTreeMap<String, Uid>, MaterializeError> {
        let labels = quads.blank_labels();
        if labels.is_empty() {
            return Ok(BTreeMap::new());
        }
        if self.policy == AllocationPolicy::Forbid {
            return Err(MaterializeError::AllocationForbidden {
                labels: labels.into_iter().map(String::from).collect(),
            });
        }
        let mut taken = FxHashSet::default();
        let mut new_uids = BTreeMap::new();
        for label in labels {
            let uid = self.allocator.allocate_id(label)?;
            if uid.0 == 0 || uid.is_fingerprint() || !taken.insert(uid) {
                return Err(MaterializeError::AllocationInconsistency {
                    label: label.to_string(),
                    uid,
                });
            }
            new_uids.insert(label.to_string(), uid);
        }
        debug!(count = new_uids.len(), "allocated uids for blank nodes");
        Ok(new_uids)
    }
}

impl Batch<'_> {
    fn push(&mut self, quad: &NQuad) -> Result<(), MaterializeError> {
        let subjects = self.resolve(&quad.subject)?;
        match &quad.object {
            ObjectValue::Node(node) => {
                let ty = self.predicate_type(&quad.predicate, TypeId::Uid);
                if ty != TypeId::Uid {
                    return Err(self.conflict(&quad.predicate, ty, TypeId::Uid));
                }
                let objects = self.resolve(node)?;
                for &entity in &subjects {
                    for &object in &objects {
                        self.emit(quad, entity, EdgeValue::Uid(object));
                    }
                }
            }
            ObjectValue::Literal(literal) => {
                let value = self.literal_value(&quad.predicate, literal)?;
                for &entity in &subjects {
                    self.emit(quad, entity, EdgeValue::Scalar(value.clone()));
                }
            }
            ObjectValue::ValueVar(name) => {
                let vars = self.vars;
                let bound = vars
                    .get(name)
                    .ok_or_else(|| MaterializeError::UnboundVariable { name: name.clone() })?;
                for &entity in &subjects {
                    let Some(value) = bound.values.get(&entity) else {
                        continue;
                    };
                    let ty = self.predicate_type(&quad.predicate, value.type_id());
                    let value = self.coerce_value(&quad.predicate, value, ty)?;
                    self.emit(quad, entity, EdgeValue::Scalar(value));
                }
            }
        }
        Ok(())
    }

    fn emit(&mut self, quad: &NQuad, entity: Uid, value: EdgeValue) {
        self.out.edges.push(DirectedEdge {
            entity,
            attr: quad.predicate.clone(),
            value,
            op: quad.op,
        });
    }

    fn resolve(&self, node: &NodeRef) -> Result<Vec<Uid>, MaterializeError> {
        match node {
            NodeRef::Uid(uid) => Ok(vec![*uid]),
            NodeRef::Xid(xid) => Ok(vec![Uid::fingerprint(xid)]),
            NodeRef::Blank(label) => self.new_uids.get(label).map(|uid| vec![*uid]).ok_or_else(|| {
                MaterializeError::AllocationInconsistency {
                    label: label.clone(),
                    uid: Uid(0),
                }
            }),
            NodeRef::Var(name) => self
                .vars
                .get(name)
                .map(|bound| bound.uids.clone())
                .ok_or_else(|| MaterializeError::UnboundVariable { name: name.clone() }),
        }
    }

    /// Established type of `predicate`; the first fact for an unknown
    /// predicate fixes it to `candidate`.
    fn predicate_type(&mut self, predicate: &str, candidate: TypeId) -> TypeId {
        if let Some(known) = self.schema.get(predicate) {
            return known.ty;
        }
        if let Some(ty) = self.local_types.get(predicate) {
            return *ty;
        }
        self.local_types.insert(predicate.to_string(), candidate);
        self.out
            .inferred
            .push(SchemaUpdate::new(predicate, candidate));
        candidate
    }

    fn literal_value(&mut self, predicate: &str, literal: &Literal) -> Result<Value, MaterializeError> {
        let ty = self.predicate_type(predicate, literal.ty.unwrap_or(TypeId::Default));
        if ty == TypeId::Uid {
            return Err(self.conflict(predicate, ty, literal.ty.unwrap_or(TypeId::Default)));
        }
        if let Some(annotated) = literal.ty {
            let declared = self.schema.get(predicate).is_some_and(|p| p.declared);
            if annotated != ty && !(declared && annotated == TypeId::String) {
                return Err(self.conflict(predicate, ty, annotated));
            }
        }
        convert(&literal.raw, ty).map_err(|_| MaterializeError::TypeMismatch {
            predicate: predicate.to_string(),
            expected: ty,
            literal: literal.raw.clone(),
        })
    }

    fn coerce_value(&self, predicate: &str, value: &Value, ty: TypeId) -> Result<Value, MaterializeError> {
        if ty == TypeId::Uid {
            return Err(self.conflict(predicate, ty, value.type_id()));
        }
        coerce(value, ty).map_err(|_| MaterializeError::TypeMismatch {
            predicate: predicate.to_string(),
            expected: ty,
            literal: value.to_text(),
        })
    }

    fn conflict(&self, predicate: &str, expected: TypeId, found: TypeId) -> MaterializeError {
        MaterializeError::SchemaConflict {
            predicate: predicate.to_string(),
            expected,
            found,
        }
    }
}

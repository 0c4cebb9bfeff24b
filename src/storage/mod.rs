//! Storage contract the engine applies mutations through, plus the in-memory
//! store the node runs on.
//!
//! The engine never locks shared state itself: schema changes, edge writes
//! and uid allocation are all delegated to a [`Storage`] implementation,
//! which must make each [`Storage::apply`] call atomic and linearizable.

mod mem;

use serde::Serialize;
use thiserror::Error;

use crate::mutation::Op;
use crate::schema::{SchemaNode, SchemaUpdate};
use crate::tok::TokenizeError;
use crate::types::{TypeId, Uid, Value};

pub use mem::MemStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Failures reported by a [`Storage`] implementation.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Store has been halted and accepts no further work.
    #[error("storage halted")]
    Halted,
    /// Uid space exhausted.
    #[error("uid lease exhausted")]
    LeaseExhausted,
    /// Edge value does not match the stored predicate type.
    #[error("value of type {found} cannot be stored in predicate {predicate} of type {expected}")]
    TypeMismatch {
        /// Predicate name.
        predicate: String,
        /// Stored type.
        expected: TypeId,
        /// Type of the rejected value.
        found: TypeId,
    },
    /// Existing data cannot be converted to a newly declared type.
    #[error("schema change for {predicate} to {target} would drop existing value {value:?}")]
    SchemaChange {
        /// Predicate name.
        predicate: String,
        /// New type.
        target: TypeId,
        /// First value that does not convert.
        value: String,
    },
    /// Index maintenance failed.
    #[error("index update failed: {0}")]
    Index(#[from] TokenizeError),
}

/// Value end of an edge.
#[derive(Clone, Debug, PartialEq)]
pub enum EdgeValue {
    /// Another node.
    Uid(Uid),
    /// Scalar value.
    Scalar(Value),
}

/// One resolved edge write.
#[derive(Clone, Debug, PartialEq)]
pub struct DirectedEdge {
    /// Subject node.
    pub entity: Uid,
    /// Predicate name.
    pub attr: String,
    /// Object node or value.
    pub value: EdgeValue,
    /// Add or remove.
    pub op: Op,
}

/// Everything one [`Storage::apply`] call writes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mutations {
    /// Declared schema, applied first.
    pub schema: Vec<SchemaUpdate>,
    /// Types inferred from data; applied only for predicates storage does not know.
    pub inferred: Vec<SchemaUpdate>,
    /// Edge writes in order.
    pub edges: Vec<DirectedEdge>,
}

impl Mutations {
    /// Whether there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.schema.is_empty() && self.inferred.is_empty() && self.edges.is_empty()
    }
}

/// Counters reported by the store statistics endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Predicates with a stored type.
    pub predicates: usize,
    /// Distinct subject nodes.
    pub nodes: usize,
    /// Stored edges, scalar and uid.
    pub edges: usize,
    /// Distinct index tokens across all predicates.
    pub index_tokens: usize,
    /// Next uid the lease would hand out.
    pub next_uid: u64,
    /// Whether the store has been halted.
    pub halted: bool,
}

/// Hands out globally unique uids.
///
/// Concurrent callers must never receive the same uid.
pub trait UidAllocator: Send + Sync {
    /// Allocates a fresh uid on behalf of blank label `label`.
    fn allocate_id(&self, label: &str) -> Result<Uid>;
}

/// Linearizable store of schema and edges.
pub trait Storage: UidAllocator {
    /// Whether the store can serve requests.
    fn is_ready(&self) -> bool;

    /// Applies schema then edges atomically: on error nothing is written.
    fn apply(&self, mutations: &Mutations) -> Result<()>;

    /// Schema of `predicates`, or of every predicate when empty.
    fn fetch_schema(&self, predicates: &[String]) -> Result<Vec<SchemaNode>>;

    /// Current counters.
    fn stats(&self) -> StoreStats;

    /// Stops the store. Later writes fail with [`StorageError::Halted`].
    fn halt(&self);
}

#![forbid(unsafe_code)]

//! Facts, their text form, and their resolution into storage edges.
//!
//! A mutation arrives as add and delete fact lists. [`Partitioned`] splits
//! them into a batch that can be applied before the request's query runs and
//! a batch that needs the query's variable bindings. [`Materializer`] turns
//! either batch into [`DirectedEdge`](crate::storage::DirectedEdge)s.

mod convert;
mod materialize;
mod nquad;
mod partition;
mod rdf;

pub use convert::{coerce, convert, ConvertError};
pub use materialize::{AllocationPolicy, MaterializeError, MaterializedMutation, Materializer};
pub use nquad::{is_dependent, Literal, NQuad, NQuads, NodeRef, ObjectValue, Op};
pub use partition::Partitioned;
pub use rdf::{parse_rdf, RdfError};

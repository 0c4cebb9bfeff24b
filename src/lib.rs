//! Request execution engine for a graph database node.
//!
//! A request carries query blocks and a mutation. The [`engine`] validates
//! schema, turns facts into typed edges with fresh uids for blank labels,
//! applies the facts the query does not depend on, runs the query, then
//! applies the facts that use query variables. The [`server`] module bounds
//! concurrency, serves HTTP and drives graceful shutdown.

#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod mutation;
pub mod query;
pub mod schema;
pub mod server;
pub mod storage;
pub mod tok;
pub mod types;

pub use engine::{Engine, EngineOptions, ExecutionResult, MutationMode, Privilege, RequestContext};
pub use error::{ErrorClass, RequestError};

#![forbid(unsafe_code)]

//! Predicate schema: declarations, validation and per-request type views.

mod enrich;
mod parse;
mod snapshot;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::TypeId;

pub use enrich::enrich_schema;
pub use parse::parse_schema;
pub use snapshot::{PredicateType, SchemaSnapshot};

/// Indexing directive attached to a predicate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Directive {
    /// Plain predicate.
    #[default]
    None,
    /// Indexed with one or more tokenizers.
    Index,
    /// Reverse edges maintained for a uid predicate.
    Reverse,
    /// Per-subject value counts maintained.
    Count,
}

/// One schema declaration, e.g. `age: int @index(int) .`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaUpdate {
    /// Predicate name.
    pub predicate: String,
    /// Declared storage type.
    pub value_type: TypeId,
    /// Indexing directive.
    pub directive: Directive,
    /// Tokenizer names; only meaningful with [`Directive::Index`].
    pub tokenizers: Vec<String>,
}

impl SchemaUpdate {
    /// Unindexed declaration of `predicate` with type `value_type`.
    pub fn new(predicate: impl Into<String>, value_type: TypeId) -> Self {
        Self {
            predicate: predicate.into(),
            value_type,
            directive: Directive::None,
            tokenizers: Vec::new(),
        }
    }

    /// Same declaration with an index over `tokenizers`.
    pub fn indexed(mut self, tokenizers: &[&str]) -> Self {
        self.directive = Directive::Index;
        self.tokenizers = tokenizers.iter().map(|t| t.to_string()).collect();
        self
    }
}

/// Schema entry as reported to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SchemaNode {
    /// Predicate name.
    pub predicate: String,
    /// Storage type.
    #[serde(rename = "type")]
    pub value_type: TypeId,
    /// Whether the predicate is indexed.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub index: bool,
    /// Whether reverse edges are kept.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub reverse: bool,
    /// Whether counts are kept.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub count: bool,
    /// Tokenizers backing the index.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tokenizer: Vec<String>,
    /// Declared by a schema mutation rather than inferred from data.
    #[serde(skip)]
    pub explicit: bool,
}

impl SchemaNode {
    /// Client view of a stored declaration.
    pub fn from_update(update: &SchemaUpdate, explicit: bool) -> Self {
        Self {
            predicate: update.predicate.clone(),
            value_type: update.value_type,
            index: update.directive == Directive::Index,
            reverse: update.directive == Directive::Reverse,
            count: update.directive == Directive::Count,
            tokenizer: update.tokenizers.clone(),
            explicit,
        }
    }
}

/// Schema text or validation failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Schema text could not be parsed.
    #[error("schema line {line}: {message}")]
    Parse {
        /// 1-based line of the offending declaration.
        line: usize,
        /// What went wrong.
        message: String,
    },
    /// Tokenizers named without `@index`.
    #[error("tokenizers present without indexing on attr {predicate}")]
    TokenizerWithoutIndex {
        /// Predicate name.
        predicate: String,
    },
    /// Tokenizer name not in the registry.
    #[error("invalid tokenizer {name}")]
    UnknownTokenizer {
        /// Tokenizer name.
        name: String,
    },
    /// Tokenizer indexes a different type than the predicate stores.
    #[error("tokenizer {tokenizer} isn't valid for predicate {predicate} of type {value_type}")]
    TokenizerTypeMismatch {
        /// Tokenizer name.
        tokenizer: String,
        /// Predicate name.
        predicate: String,
        /// Declared predicate type.
        value_type: TypeId,
    },
    /// Same tokenizer named twice for one predicate.
    #[error("duplicate tokenizers present for attr {predicate}")]
    DuplicateTokenizer {
        /// Predicate name.
        predicate: String,
    },
    /// More than one order-preserving tokenizer for one predicate.
    #[error("more than one sortable index encountered for {predicate}")]
    MultipleSortable {
        /// Predicate name.
        predicate: String,
    },
}

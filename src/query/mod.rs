#![forbid(unsafe_code)]

//! Request shapes and the parser and evaluator the engine delegates to.
//!
//! The engine only sees [`RequestParser`] and [`QueryEvaluator`]; the node
//! plugs in [`BlockParser`] and [`ScanEvaluator`].

/// Block-level request text parser.
pub mod parse;

/// Query evaluation by scanning the in-memory store.
pub mod scan;

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mutation::{NQuad, RdfError};
use crate::types::{Uid, Value};

pub use parse::BlockParser;
pub use scan::ScanEvaluator;

/// A client request before parsing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Request text: query blocks, optionally with `mutation {}` and `schema {}` blocks.
    #[serde(default)]
    pub query: String,
    /// Structured mutation, merged with any `mutation {}` block in `query`.
    #[serde(default)]
    pub mutation: Option<MutationInput>,
    /// Values for `$name` placeholders in the query.
    #[serde(default)]
    pub vars: HashMap<String, String>,
    /// Arrived over HTTP.
    #[serde(skip)]
    pub http: bool,
}

impl Request {
    /// Request carrying only `text`.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            query: text.into(),
            ..Self::default()
        }
    }
}

/// Unparsed mutation sections.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationInput {
    /// Schema declarations.
    #[serde(default)]
    pub schema: String,
    /// Facts to add, RDF text.
    #[serde(default)]
    pub set: String,
    /// Facts to remove, RDF text.
    #[serde(default)]
    pub del: String,
}

/// Parsed mutation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Mutation {
    /// Schema text, validated by the engine.
    pub schema: String,
    /// Facts to add.
    pub set: Vec<NQuad>,
    /// Facts to remove.
    pub del: Vec<NQuad>,
}

impl Mutation {
    /// Whether the mutation writes anything, schema included.
    pub fn has_ops(&self) -> bool {
        self.has_schema() || !self.set.is_empty() || !self.del.is_empty()
    }

    /// Whether schema declarations are present.
    pub fn has_schema(&self) -> bool {
        !self.schema.trim().is_empty()
    }
}

/// `schema(pred: [...]) {}` block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchemaQuery {
    /// Predicates asked for; empty means all.
    pub predicates: Vec<String>,
}

/// Output of a [`RequestParser`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedRequest {
    /// Query blocks.
    pub query: Option<QueryAst>,
    /// Mutation.
    pub mutation: Option<Mutation>,
    /// Schema query.
    pub schema_query: Option<SchemaQuery>,
}

impl ParsedRequest {
    /// Whether the request asks for nothing.
    pub fn is_empty(&self) -> bool {
        self.query.as_ref().map_or(true, |q| q.blocks.is_empty())
            && self.mutation.as_ref().map_or(true, |m| !m.has_ops())
            && self.schema_query.is_none()
    }

    /// Whether the request declares schema.
    pub fn has_schema_mutation(&self) -> bool {
        self.mutation.as_ref().is_some_and(Mutation::has_schema)
    }
}

/// Query blocks in request order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryAst {
    /// Blocks; later blocks may use variables defined by earlier ones.
    pub blocks: Vec<QueryBlock>,
}

impl QueryAst {
    /// Every variable some block defines, in definition order.
    pub fn defined_vars(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for name in self.blocks.iter().flat_map(QueryBlock::defined_vars) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// First `uid(v)` root whose variable no earlier block defines.
    pub fn first_undefined_var(&self) -> Option<&str> {
        let mut defined = Vec::new();
        for block in &self.blocks {
            if let Func::UidVar(name) = &block.func {
                if !defined.contains(&name.as_str()) {
                    return Some(name);
                }
            }
            defined.extend(block.defined_vars());
        }
        None
    }
}

/// `[v as] alias(func: ...) { attrs }`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryBlock {
    /// Response key; `var` blocks produce no output.
    pub alias: String,
    /// Variable bound to the block's root uids.
    pub var: Option<String>,
    /// Root function.
    pub func: Func,
    /// Selected predicates.
    pub attrs: Vec<Attr>,
}

impl QueryBlock {
    /// Variables bound by this block: its own, then its attributes'.
    pub fn defined_vars(&self) -> impl Iterator<Item = &str> {
        self.var
            .as_deref()
            .into_iter()
            .chain(self.attrs.iter().filter_map(|attr| attr.var.as_deref()))
    }
}

/// Root function of a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Func {
    /// `uid(0x1, 0x2)`
    Uid(Vec<Uid>),
    /// `uid(v)`
    UidVar(String),
    /// `has(pred)`
    Has(String),
    /// `eq(pred, value)`
    Eq {
        /// Predicate compared.
        predicate: String,
        /// Value text, read as the predicate's type.
        value: String,
    },
}

/// Selected predicate, optionally bound to a variable (`a as age`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attr {
    /// Predicate; `~pred` follows reverse edges, `uid` selects the node's uid.
    pub predicate: String,
    /// Variable receiving the values or linked uids.
    pub var: Option<String>,
}

/// What a query variable holds.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VarValue {
    /// Bound uids.
    pub uids: Vec<Uid>,
    /// Bound per-node values.
    pub values: BTreeMap<Uid, Value>,
}

/// Variables bound by query evaluation.
pub type VarBindings = HashMap<String, VarValue>;

/// Result rows of one block.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubGraph {
    /// Block alias.
    pub alias: String,
    /// One JSON object per matched node.
    pub rows: Vec<serde_json::Value>,
}

/// Output of a [`QueryEvaluator`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Evaluation {
    /// Subgraphs of the output blocks.
    pub subgraphs: Vec<SubGraph>,
    /// Variables defined by the query.
    pub vars: VarBindings,
}

/// Time spent per request stage.
#[derive(Clone, Copy, Debug)]
pub struct Latency {
    /// When the request was received.
    pub start: Instant,
    /// Parsing.
    pub parsing: Duration,
    /// Everything between parsing and encoding.
    pub processing: Duration,
    /// Response encoding.
    pub encoding: Duration,
}

impl Default for Latency {
    fn default() -> Self {
        Self::new()
    }
}

impl Latency {
    /// Starts the clock.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            parsing: Duration::ZERO,
            processing: Duration::ZERO,
            encoding: Duration::ZERO,
        }
    }

    /// Time since the request was received.
    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }

    /// `server_latency` object of HTTP responses.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "parsing": format!("{:?}", self.parsing),
            "processing": format!("{:?}", self.processing),
            "json": format!("{:?}", self.encoding),
            "total": format!("{:?}", self.total()),
        })
    }
}

/// Request text that could not be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Malformed block structure.
    #[error("syntax error at offset {offset}: {message}")]
    Syntax {
        /// Byte offset into the request text.
        offset: usize,
        /// What went wrong.
        message: String,
    },
    /// Block kind appearing more than once.
    #[error("only one {0} block allowed")]
    DuplicateBlock(&'static str),
    /// `$name` with no value supplied.
    #[error("variable {0} not defined")]
    UndefinedVariable(String),
    /// `uid(v)` where no earlier block defines `v`.
    #[error("query variable {0} used before definition")]
    UnboundQueryVariable(String),
    /// Malformed fact text.
    #[error(transparent)]
    Rdf(#[from] RdfError),
}

/// Query evaluation failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// `uid(v)` where no earlier block defines `v`.
    #[error("variable {0} used before definition")]
    UndefinedVariable(String),
    /// Store cannot serve reads.
    #[error("store unavailable for reads")]
    Unavailable,
}

/// Turns request text into blocks.
///
/// Runs on a blocking thread; callers may stop waiting before it returns.
pub trait RequestParser: Send + Sync {
    /// Parses `request`.
    fn parse(&self, request: &Request) -> Result<ParsedRequest, ParseError>;
}

/// Evaluates query blocks.
pub trait QueryEvaluator: Send + Sync {
    /// Evaluates `ast`, adding its own time to `latency.processing`.
    fn evaluate(&self, ast: &QueryAst, latency: &mut Latency) -> Result<Evaluation, EvalError>;
}

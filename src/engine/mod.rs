#![forbid(unsafe_code)]

//! Request orchestration.
//!
//! [`Engine::execute`] drives one parsed request through a fixed phase
//! order: schema, independent mutation, query, dependent mutation, respond.
//! Facts that reference query variables are held back until the query has
//! bound them; everything else is applied before the query runs so the query
//! sees it. Each phase reports failures already classified; the engine only
//! adds context.

mod task;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value as Json};
use tracing::{debug, error, info};

use crate::error::{ErrorClass, RequestError, Result};
use crate::mutation::{
    AllocationPolicy, MaterializeError, MaterializedMutation, Materializer, NQuads, Partitioned,
};
use crate::query::{
    Evaluation, Latency, ParsedRequest, QueryAst, QueryEvaluator, RequestParser, SubGraph, VarBindings,
};
use crate::schema::{enrich_schema, parse_schema, SchemaNode, SchemaSnapshot, SchemaUpdate};
use crate::storage::{Mutations, Storage};
use crate::types::Uid;

/// Default bound on parsing one request.
pub const DEFAULT_PARSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default bound on executing one request without schema changes.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Whether the node accepts writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MutationMode {
    /// Any caller may mutate.
    #[default]
    Allowed,
    /// Only [`Privilege::Internal`] callers may mutate.
    Disabled,
}

/// Who issued a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Privilege {
    /// External client.
    #[default]
    Client,
    /// The node itself, e.g. storing a shared query.
    Internal,
}

/// Engine tuning.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Write policy.
    pub mutations: MutationMode,
    /// Bound on waiting for the parser.
    pub parse_timeout: Duration,
    /// Bound on execution, not applied to requests that change schema.
    pub request_timeout: Duration,
    /// Fraction of requests whose phases are logged at info level.
    pub trace_ratio: f64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            mutations: MutationMode::Allowed,
            parse_timeout: DEFAULT_PARSE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            trace_ratio: 0.0,
        }
    }
}

/// Per-request execution state owned by the caller.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestContext {
    /// Caller privilege.
    pub privilege: Privilege,
    /// Phases starting after this instant fail.
    pub deadline: Option<Instant>,
    /// Log phase transitions at info level.
    pub sampled: bool,
}

impl RequestContext {
    /// Context with no deadline.
    pub fn new(privilege: Privilege) -> Self {
        Self {
            privilege,
            ..Self::default()
        }
    }

    /// Same context, failing phases that start after `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn enter(&self, phase: Phase) -> Result<()> {
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(RequestError::internal(format!(
                "request deadline exceeded before {phase} phase"
            )));
        }
        if self.sampled {
            info!(%phase, "entering phase");
        } else {
            debug!(%phase, "entering phase");
        }
        Ok(())
    }
}

/// Stages of [`Engine::execute`], in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Request shape checks.
    Start,
    /// Schema parse and validation.
    Schema,
    /// Facts that need no query bindings.
    IndependentMutation,
    /// Query evaluation.
    Query,
    /// Facts that use query bindings.
    DependentMutation,
    /// Result assembly.
    Respond,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Start => "start",
            Phase::Schema => "schema",
            Phase::IndependentMutation => "independent mutation",
            Phase::Query => "query",
            Phase::DependentMutation => "dependent mutation",
            Phase::Respond => "respond",
        })
    }
}

/// What a successful request produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionResult {
    /// Uid allocated for each blank label.
    pub allocations: BTreeMap<String, Uid>,
    /// Schema query answer.
    pub schema: Vec<SchemaNode>,
    /// Query output.
    pub subgraphs: Vec<SubGraph>,
}

impl ExecutionResult {
    /// Allocations with uids rendered as `0x` hex.
    pub fn uids_hex(&self) -> BTreeMap<String, String> {
        self.allocations
            .iter()
            .map(|(label, uid)| (label.clone(), uid.to_hex()))
            .collect()
    }

    /// Query output keyed by block alias.
    pub fn data(&self) -> Map<String, Json> {
        self.subgraphs
            .iter()
            .map(|sg| (sg.alias.clone(), Json::Array(sg.rows.clone())))
            .collect()
    }
}

/// Runs requests against a storage backend.
pub struct Engine {
    storage: Arc<dyn Storage>,
    parser: Arc<dyn RequestParser>,
    evaluator: Arc<dyn QueryEvaluator>,
    options: EngineOptions,
}

impl Engine {
    /// Engine over the given collaborators.
    pub fn new(
        storage: Arc<dyn Storage>,
        parser: Arc<dyn RequestParser>,
        evaluator: Arc<dyn QueryEvaluator>,
        options: EngineOptions,
    ) -> Self {
        Self {
            storage,
            parser,
            evaluator,
            options,
        }
    }

    /// Tuning in effect.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Storage backend.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Whether a caller with `privilege` may mutate.
    pub fn mutation_allowed(&self, privilege: Privilege) -> bool {
        self.options.mutations == MutationMode::Allowed || privilege == Privilege::Internal
    }

    /// Executes `parsed` phase by phase.
    ///
    /// Mutation phase time is added to `latency.processing`; the evaluator
    /// adds its own.
    pub fn execute(
        &self,
        ctx: &RequestContext,
        parsed: ParsedRequest,
        latency: &mut Latency,
    ) -> Result<ExecutionResult> {
        let result = self.run_phases(ctx, parsed, latency);
        if let Err(err) = &result {
            match err.class() {
                ErrorClass::Fatal => error!(fatal = true, error = %err, "request aborted"),
                ErrorClass::Internal => error!(error = %err, "request failed"),
                ErrorClass::InvalidRequest => debug!(error = %err, "request rejected"),
            }
        }
        result
    }

    fn run_phases(
        &self,
        ctx: &RequestContext,
        parsed: ParsedRequest,
        latency: &mut Latency,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        ctx.enter(Phase::Start)?;
        if parsed.is_empty() {
            return Err(RequestError::invalid("empty request: no query or mutation"));
        }
        let ParsedRequest {
            query,
            mutation,
            schema_query,
        } = parsed;
        let mutation = mutation.unwrap_or_default();
        if mutation.has_ops() && !self.mutation_allowed(ctx.privilege) {
            return Err(RequestError::invalid("mutations are forbidden on this server"));
        }

        ctx.enter(Phase::Schema)?;
        let mut schema = Vec::new();
        if mutation.has_schema() {
            schema = parse_schema(&mutation.schema)
                .map_err(|e| RequestError::invalid_with("failed to parse schema", e))?;
            enrich_schema(&mut schema)
                .map_err(|e| RequestError::invalid_with("invalid schema", e))?;
        }
        let parts = Partitioned::new(mutation.set, mutation.del);
        let dependent = parts.dependent_batch();
        check_dependent(&dependent, query.as_ref())?;
        let mut snapshot = self.snapshot(&parts, &schema)?;

        ctx.enter(Phase::IndependentMutation)?;
        let independent = parts.independent_batch();
        let mut allocations = BTreeMap::new();
        if !independent.is_empty() || !schema.is_empty() {
            let no_vars = VarBindings::default();
            let materialized = Materializer::new(&*self.storage, &snapshot, &no_vars)
                .materialize(&independent)
                .map_err(|e| classify(e, "failed to convert facts to edges"))?;
            snapshot.infer(&materialized.inferred);
            allocations = materialized.new_uids.clone();
            self.apply(schema, materialized, "failed to apply mutations")?;
        }

        let schema_nodes = match schema_query {
            Some(q) => self
                .storage
                .fetch_schema(&q.predicates)
                .map_err(|e| RequestError::internal_with("error while fetching schema", e))?,
            None => Vec::new(),
        };

        ctx.enter(Phase::Query)?;
        let query_started = Instant::now();
        let evaluation = match &query {
            Some(ast) if !ast.blocks.is_empty() => self
                .evaluator
                .evaluate(ast, latency)
                .map_err(|e| RequestError::internal_with("query evaluation failed", e))?,
            _ => Evaluation::default(),
        };
        let query_time = query_started.elapsed();

        ctx.enter(Phase::DependentMutation)?;
        if !dependent.is_empty() {
            let materialized = Materializer::new(&*self.storage, &snapshot, &evaluation.vars)
                .allocation(AllocationPolicy::Forbid)
                .materialize(&dependent)
                .map_err(|e| classify(e, "failed to convert facts with variables to edges"))?;
            self.apply(Vec::new(), materialized, "failed to apply mutations with variables")?;
        }

        ctx.enter(Phase::Respond)?;
        latency.processing += started.elapsed().saturating_sub(query_time);
        Ok(ExecutionResult {
            allocations,
            schema: schema_nodes,
            subgraphs: evaluation.subgraphs,
        })
    }

    /// Stored types of the predicates the facts touch, overlaid with the
    /// request's own declarations.
    fn snapshot(&self, parts: &Partitioned, schema: &[SchemaUpdate]) -> Result<SchemaSnapshot> {
        let mut predicates = parts.independent_batch().predicates();
        for predicate in parts.dependent_batch().predicates() {
            if !predicates.contains(&predicate) {
                predicates.push(predicate);
            }
        }
        let mut snapshot = if predicates.is_empty() {
            SchemaSnapshot::new()
        } else {
            let stored = self
                .storage
                .fetch_schema(&predicates)
                .map_err(|e| RequestError::internal_with("error while fetching schema", e))?;
            SchemaSnapshot::from_nodes(&stored)
        };
        snapshot.overlay(schema);
        Ok(snapshot)
    }

    fn apply(
        &self,
        schema: Vec<SchemaUpdate>,
        materialized: MaterializedMutation,
        context: &'static str,
    ) -> Result<()> {
        let mutations = Mutations {
            schema,
            inferred: materialized.inferred,
            edges: materialized.edges,
        };
        if mutations.is_empty() {
            return Ok(());
        }
        debug!(
            schema = mutations.schema.len(),
            edges = mutations.edges.len(),
            "applying mutations"
        );
        self.storage
            .apply(&mutations)
            .map_err(|e| RequestError::internal_with(context, e))
    }
}

fn classify(err: MaterializeError, context: &'static str) -> RequestError {
    RequestError::classified(err.class(), context, err)
}

/// Rejects dependent facts that could only fail after the independent phase
/// has committed: blank labels, and variables the query never defines.
fn check_dependent(dependent: &NQuads, query: Option<&QueryAst>) -> Result<()> {
    let labels = dependent.blank_labels();
    if !labels.is_empty() {
        let err = MaterializeError::AllocationForbidden {
            labels: labels.into_iter().map(String::from).collect(),
        };
        return Err(classify(err, "failed to convert facts with variables to edges"));
    }
    let defined = query.map(QueryAst::defined_vars).unwrap_or_default();
    if let Some(name) = dependent.variables().into_iter().find(|name| !defined.contains(name)) {
        let err = MaterializeError::UnboundVariable {
            name: name.to_string(),
        };
        return Err(classify(err, "failed to convert facts with variables to edges"));
    }
    Ok(())
}

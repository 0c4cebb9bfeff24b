use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value as Json};
use tracing::trace;

use super::{EvalError, Evaluation, Func, Latency, QueryAst, QueryBlock, QueryEvaluator, SubGraph, VarValue};
use crate::storage::{MemStore, Storage};
use crate::types::Uid;

/// Evaluates blocks by reading [`MemStore`] directly.
///
/// Blocks run in order, so a block can use variables bound by any earlier
/// block. Blocks aliased `var` bind variables but produce no output.
#[derive(Clone)]
pub struct ScanEvaluator {
    store: Arc<MemStore>,
}

impl ScanEvaluator {
    /// Evaluator over `store`.
    pub fn new(store: Arc<MemStore>) -> Self {
        Self { store }
    }

    fn roots(&self, block: &QueryBlock, eval: &Evaluation) -> Result<Vec<Uid>, EvalError> {
        Ok(match &block.func {
            Func::Uid(uids) => uids.clone(),
            Func::UidVar(name) => eval
                .vars
                .get(name)
                .map(|bound| bound.uids.clone())
                .ok_or_else(|| EvalError::UndefinedVariable(name.clone()))?,
            Func::Has(predicate) => self.store.subjects_with(predicate),
            Func::Eq { predicate, value } => self.store.lookup_eq(predicate, value),
        })
    }

    fn row(&self, block: &QueryBlock, uid: Uid, eval: &mut Evaluation) -> Map<String, Json> {
        let mut row = Map::new();
        if block.attrs.is_empty() {
            row.insert("uid".into(), Json::String(uid.to_hex()));
        }
        for attr in &block.attrs {
            let predicate = attr.predicate.as_str();
            if predicate == "uid" {
                row.insert("uid".into(), Json::String(uid.to_hex()));
                if let Some(var) = &attr.var {
                    eval.vars.entry(var.clone()).or_default().uids.push(uid);
                }
                continue;
            }
            if let Some(value) = self.store.scalar(predicate, uid) {
                row.insert(predicate.to_string(), value.to_json());
                if let Some(var) = &attr.var {
                    eval.vars.entry(var.clone()).or_default().values.insert(uid, value);
                }
                continue;
            }
            let linked = match predicate.strip_prefix('~') {
                Some(forward) => self.store.reverse_links(forward, uid),
                None => self.store.links(predicate, uid),
            };
            if linked.is_empty() {
                continue;
            }
            let nodes = linked
                .iter()
                .map(|target| serde_json::json!({ "uid": target.to_hex() }))
                .collect();
            row.insert(predicate.to_string(), Json::Array(nodes));
            if let Some(var) = &attr.var {
                eval.vars.entry(var.clone()).or_default().uids.extend(linked);
            }
        }
        row
    }
}

impl QueryEvaluator for ScanEvaluator {
    fn evaluate(&self, ast: &QueryAst, latency: &mut Latency) -> Result<Evaluation, EvalError> {
        if !self.store.is_ready() {
            return Err(EvalError::Unavailable);
        }
        let started = Instant::now();
        let mut eval = Evaluation::default();
        for block in &ast.blocks {
            let roots = self.roots(block, &eval)?;
            for name in block.defined_vars() {
                eval.vars.entry(name.to_string()).or_default();
            }
            trace!(alias = %block.alias, roots = roots.len(), "evaluating block");
            let mut rows = Vec::new();
            for uid in &roots {
                let row = self.row(block, *uid, &mut eval);
                if !row.is_empty() {
                    rows.push(Json::Object(row));
                }
            }
            for bound in eval.vars.values_mut() {
                dedup_sorted(&mut bound.uids);
            }
            if let Some(var) = &block.var {
                let bound: &mut VarValue = eval.vars.entry(var.clone()).or_default();
                bound.uids.extend(roots);
                dedup_sorted(&mut bound.uids);
            }
            if block.alias != "var" {
                eval.subgraphs.push(SubGraph {
                    alias: block.alias.clone(),
                    rows,
                });
            }
        }
        latency.processing += started.elapsed();
        Ok(eval)
    }
}

fn dedup_sorted(uids: &mut Vec<Uid>) {
    let unique: BTreeSet<Uid> = uids.drain(..).collect();
    uids.extend(unique);
}

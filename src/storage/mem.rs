use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

use super::{DirectedEdge, EdgeValue, Mutations, Result, Storage, StorageError, StoreStats, UidAllocator};
use crate::mutation::{coerce, convert, Op};
use crate::schema::{Directive, SchemaNode, SchemaUpdate};
use crate::tok;
use crate::types::{TypeId, Uid, Value, FINGERPRINT_BIT};

/// In-memory [`Storage`].
///
/// One `RwLock` guards all predicates; [`Storage::apply`] stages every touched
/// predicate on a copy and swaps the copies in only when the whole batch
/// succeeded. Uids come from an atomic lease starting at 1 and never reach
/// [`FINGERPRINT_BIT`]; applying an edge that names a uid at or past the
/// lease moves the lease beyond it.
pub struct MemStore {
    predicates: RwLock<FxHashMap<String, Predicate>>,
    next_uid: AtomicU64,
    ready: AtomicBool,
    halted: AtomicBool,
}

#[derive(Clone, Debug)]
struct Predicate {
    schema: SchemaUpdate,
    explicit: bool,
    values: BTreeMap<Uid, Value>,
    links: BTreeMap<Uid, BTreeSet<Uid>>,
    reverse: BTreeMap<Uid, BTreeSet<Uid>>,
    index: BTreeMap<Vec<u8>, BTreeSet<Uid>>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    /// Empty, ready store.
    pub fn new() -> Self {
        Self {
            predicates: RwLock::new(FxHashMap::default()),
            next_uid: AtomicU64::new(1),
            ready: AtomicBool::new(true),
            halted: AtomicBool::new(false),
        }
    }

    /// Marks the store ready or not; a halted store stays unready.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// Stored type of `predicate`.
    pub fn predicate_type(&self, predicate: &str) -> Option<TypeId> {
        self.predicates
            .read()
            .get(predicate)
            .map(|p| p.schema.value_type)
    }

    /// Subjects with at least one edge on `predicate`, ascending.
    pub fn subjects_with(&self, predicate: &str) -> Vec<Uid> {
        let guard = self.predicates.read();
        let Some(pred) = guard.get(predicate) else {
            return Vec::new();
        };
        let subjects: BTreeSet<Uid> = pred
            .values
            .keys()
            .chain(pred.links.keys())
            .copied()
            .collect();
        subjects.into_iter().collect()
    }

    /// Scalar value of `predicate` on `entity`.
    pub fn scalar(&self, predicate: &str, entity: Uid) -> Option<Value> {
        self.predicates
            .read()
            .get(predicate)
            .and_then(|p| p.values.get(&entity).cloned())
    }

    /// Nodes `entity` links to through `predicate`, ascending.
    pub fn links(&self, predicate: &str, entity: Uid) -> Vec<Uid> {
        self.predicates
            .read()
            .get(predicate)
            .and_then(|p| p.links.get(&entity))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Nodes linking to `entity` through a `@reverse` predicate.
    pub fn reverse_links(&self, predicate: &str, entity: Uid) -> Vec<Uid> {
        self.predicates
            .read()
            .get(predicate)
            .and_then(|p| p.reverse.get(&entity))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Subjects whose `predicate` value equals `raw` read as the predicate's
    /// type. Uses the first index tokenizer when the predicate is indexed.
    pub fn lookup_eq(&self, predicate: &str, raw: &str) -> Vec<Uid> {
        let guard = self.predicates.read();
        let Some(pred) = guard.get(predicate) else {
            return Vec::new();
        };
        let Ok(target) = convert(raw, pred.schema.value_type) else {
            return Vec::new();
        };
        let candidates: Vec<Uid> = match pred.first_tokenizer() {
            Some(tokenizer) => {
                let tokens = tokenizer.tokens(&target).unwrap_or_default();
                let mut postings = tokens.iter().map(|t| pred.index.get(t));
                match postings.next().flatten() {
                    Some(first) => first
                        .iter()
                        .copied()
                        .filter(|uid| postings.clone().all(|p| p.is_some_and(|p| p.contains(uid))))
                        .collect(),
                    None => Vec::new(),
                }
            }
            None => pred.values.keys().copied().collect(),
        };
        candidates
            .into_iter()
            .filter(|uid| pred.values.get(uid) == Some(&target))
            .collect()
    }

    fn check_open(&self) -> Result<()> {
        if self.halted.load(Ordering::Acquire) {
            return Err(StorageError::Halted);
        }
        Ok(())
    }
}

impl UidAllocator for MemStore {
    fn allocate_id(&self, label: &str) -> Result<Uid> {
        self.check_open()?;
        let raw = self
            .next_uid
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
                (next < FINGERPRINT_BIT).then_some(next + 1)
            })
            .map_err(|_| StorageError::LeaseExhausted)?;
        debug!(label, uid = raw, "leased uid");
        Ok(Uid(raw))
    }
}

impl Storage for MemStore {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) && !self.halted.load(Ordering::Acquire)
    }

    fn apply(&self, mutations: &Mutations) -> Result<()> {
        self.check_open()?;
        if mutations.is_empty() {
            return Ok(());
        }
        let mut predicates = self.predicates.write();
        let mut staged: FxHashMap<String, Predicate> = FxHashMap::default();

        for update in &mutations.schema {
            stage(&predicates, &mut staged, &update.predicate, update.value_type)
                .redeclare(update)?;
        }
        for update in &mutations.inferred {
            if !predicates.contains_key(&update.predicate) && !staged.contains_key(&update.predicate) {
                staged.insert(update.predicate.clone(), Predicate::new(update.clone(), false));
            }
        }
        for edge in &mutations.edges {
            let ty = match &edge.value {
                EdgeValue::Uid(_) => TypeId::Uid,
                EdgeValue::Scalar(value) => value.type_id(),
            };
            stage(&predicates, &mut staged, &edge.attr, ty).write(edge)?;
        }

        if let Some(highest) = highest_leasable(&mutations.edges) {
            let prev = self.next_uid.fetch_max(highest + 1, Ordering::AcqRel);
            if prev <= highest {
                debug!(uid = highest, "lease advanced past written uid");
            }
        }

        debug!(
            schema = mutations.schema.len(),
            edges = mutations.edges.len(),
            predicates = staged.len(),
            "applied mutations"
        );
        predicates.extend(staged);
        Ok(())
    }

    fn fetch_schema(&self, predicates: &[String]) -> Result<Vec<SchemaNode>> {
        self.check_open()?;
        let guard = self.predicates.read();
        let node = |p: &Predicate| SchemaNode::from_update(&p.schema, p.explicit);
        let mut nodes: Vec<SchemaNode> = if predicates.is_empty() {
            guard.values().map(node).collect()
        } else {
            predicates
                .iter()
                .filter_map(|name| guard.get(name))
                .map(node)
                .collect()
        };
        nodes.sort_by(|a, b| a.predicate.cmp(&b.predicate));
        Ok(nodes)
    }

    fn stats(&self) -> StoreStats {
        let guard = self.predicates.read();
        let mut nodes = FxHashSet::default();
        let mut edges = 0;
        let mut index_tokens = 0;
        for pred in guard.values() {
            nodes.extend(pred.values.keys().copied());
            nodes.extend(pred.links.keys().copied());
            edges += pred.values.len() + pred.links.values().map(BTreeSet::len).sum::<usize>();
            index_tokens += pred.index.len();
        }
        StoreStats {
            predicates: guard.len(),
            nodes: nodes.len(),
            edges,
            index_tokens,
            next_uid: self.next_uid.load(Ordering::Acquire),
            halted: self.halted.load(Ordering::Acquire),
        }
    }

    fn halt(&self) {
        if !self.halted.swap(true, Ordering::AcqRel) {
            info!("storage halted");
        }
    }
}

/// Largest uid named by `edges` that the lease could otherwise hand out.
fn highest_leasable(edges: &[DirectedEdge]) -> Option<u64> {
    edges
        .iter()
        .flat_map(|edge| {
            let target = match edge.value {
                EdgeValue::Uid(uid) => Some(uid),
                EdgeValue::Scalar(_) => None,
            };
            std::iter::once(edge.entity).chain(target)
        })
        .map(|uid| uid.0)
        .filter(|raw| *raw < FINGERPRINT_BIT)
        .max()
}

fn stage<'s>(
    stored: &FxHashMap<String, Predicate>,
    staged: &'s mut FxHashMap<String, Predicate>,
    name: &str,
    ty: TypeId,
) -> &'s mut Predicate {
    staged.entry(name.to_string()).or_insert_with(|| {
        stored
            .get(name)
            .cloned()
            .unwrap_or_else(|| Predicate::new(SchemaUpdate::new(name, ty), false))
    })
}

impl Predicate {
    fn new(schema: SchemaUpdate, explicit: bool) -> Self {
        Self {
            schema,
            explicit,
            values: BTreeMap::new(),
            links: BTreeMap::new(),
            reverse: BTreeMap::new(),
            index: BTreeMap::new(),
        }
    }

    fn tokenizers(&self) -> impl Iterator<Item = &'static tok::Tokenizer> + '_ {
        let indexed = self.schema.directive == Directive::Index;
        self.schema
            .tokenizers
            .iter()
            .filter(move |_| indexed)
            .filter_map(|name| tok::lookup(name))
    }

    fn first_tokenizer(&self) -> Option<&'static tok::Tokenizer> {
        self.tokenizers().next()
    }

    fn redeclare(&mut self, update: &SchemaUpdate) -> Result<()> {
        let target = update.value_type;
        let from = self.schema.value_type;
        if target != from {
            let change_error = |value: String| StorageError::SchemaChange {
                predicate: update.predicate.clone(),
                target,
                value,
            };
            if let Some((_, targets)) = self.links.iter().next() {
                if target != TypeId::Uid {
                    let first = targets.iter().next().map(|u| u.to_hex()).unwrap_or_default();
                    return Err(change_error(first));
                }
            }
            let mut converted = BTreeMap::new();
            for (uid, value) in &self.values {
                if target == TypeId::Uid {
                    return Err(change_error(value.to_text()));
                }
                let value = coerce(value, target).map_err(|_| change_error(value.to_text()))?;
                converted.insert(*uid, value);
            }
            self.values = converted;
        }
        self.schema = update.clone();
        self.explicit = true;
        if self.schema.directive != Directive::Reverse {
            self.reverse.clear();
        } else if self.reverse.is_empty() {
            for (subject, objects) in &self.links {
                for object in objects {
                    self.reverse.entry(*object).or_default().insert(*subject);
                }
            }
        }
        self.index.clear();
        let values: Vec<(Uid, Value)> = self.values.iter().map(|(u, v)| (*u, v.clone())).collect();
        for (uid, value) in &values {
            self.add_tokens(*uid, value)?;
        }
        Ok(())
    }

    fn write(&mut self, edge: &DirectedEdge) -> Result<()> {
        let expected = self.schema.value_type;
        match &edge.value {
            EdgeValue::Uid(object) if expected == TypeId::Uid => {
                let reverse = self.schema.directive == Directive::Reverse;
                match edge.op {
                    Op::Set => {
                        self.links.entry(edge.entity).or_default().insert(*object);
                        if reverse {
                            self.reverse.entry(*object).or_default().insert(edge.entity);
                        }
                    }
                    Op::Del => {
                        remove_member(&mut self.links, edge.entity, *object);
                        remove_member(&mut self.reverse, *object, edge.entity);
                    }
                }
                Ok(())
            }
            EdgeValue::Scalar(value) if expected != TypeId::Uid && value.type_id() == expected => {
                match edge.op {
                    Op::Set => {
                        if let Some(old) = self.values.insert(edge.entity, value.clone()) {
                            self.remove_tokens(edge.entity, &old)?;
                        }
                        self.add_tokens(edge.entity, value)?;
                    }
                    Op::Del => {
                        if self.values.get(&edge.entity) == Some(value) {
                            self.values.remove(&edge.entity);
                            self.remove_tokens(edge.entity, value)?;
                        }
                    }
                }
                Ok(())
            }
            other => Err(StorageError::TypeMismatch {
                predicate: edge.attr.clone(),
                expected,
                found: match other {
                    EdgeValue::Uid(_) => TypeId::Uid,
                    EdgeValue::Scalar(value) => value.type_id(),
                },
            }),
        }
    }

    fn add_tokens(&mut self, entity: Uid, value: &Value) -> Result<()> {
        let tokenizers: Vec<_> = self.tokenizers().collect();
        for tokenizer in tokenizers {
            for token in tokenizer.tokens(value)? {
                self.index.entry(token).or_default().insert(entity);
            }
        }
        Ok(())
    }

    fn remove_tokens(&mut self, entity: Uid, value: &Value) -> Result<()> {
        let tokenizers: Vec<_> = self.tokenizers().collect();
        for tokenizer in tokenizers {
            for token in tokenizer.tokens(value)? {
                remove_member(&mut self.index, token, entity);
            }
        }
        Ok(())
    }
}

fn remove_member<K: Ord>(map: &mut BTreeMap<K, BTreeSet<Uid>>, key: K, member: Uid) {
    if let Some(set) = map.get_mut(&key) {
        set.remove(&member);
        if set.is_empty() {
            map.remove(&key);
        }
    }
}

use std::fmt;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::types::{TypeId, Uid};

/// Whether a fact adds or removes an edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    /// Add the edge.
    #[default]
    Set,
    /// Remove the edge.
    Del,
}

/// Subject or object node of a fact.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeRef {
    /// Existing node by uid (`<0x1f>`).
    Uid(Uid),
    /// External name resolved deterministically (`<alice>`).
    Xid(String),
    /// Request-scoped label awaiting allocation (`_:alice`).
    Blank(String),
    /// Uids bound by query evaluation (`uid(friends)`).
    Var(String),
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Uid(uid) => write!(f, "<{uid}>"),
            NodeRef::Xid(xid) => write!(f, "<{xid}>"),
            NodeRef::Blank(label) => write!(f, "_:{label}"),
            NodeRef::Var(name) => write!(f, "uid({name})"),
        }
    }
}

/// Literal text with an optional datatype annotation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Literal {
    /// Text between the quotes, unescaped.
    pub raw: String,
    /// `^^<xs:...>` annotation, if present.
    pub ty: Option<TypeId>,
    /// `@lang` tag, if present.
    pub lang: Option<String>,
}

impl Literal {
    /// Untyped literal.
    pub fn plain(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            ty: None,
            lang: None,
        }
    }

    /// Literal annotated with `ty`.
    pub fn typed(raw: impl Into<String>, ty: TypeId) -> Self {
        Self {
            raw: raw.into(),
            ty: Some(ty),
            lang: None,
        }
    }
}

/// Object position of a fact.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ObjectValue {
    /// Edge to another node.
    Node(NodeRef),
    /// Scalar value.
    Literal(Literal),
    /// Per-subject value bound by query evaluation (`val(age)`).
    ValueVar(String),
}

/// One fact to add or remove.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NQuad {
    /// Subject node.
    pub subject: NodeRef,
    /// Predicate name.
    pub predicate: String,
    /// Object node or value.
    pub object: ObjectValue,
    /// Add or remove.
    pub op: Op,
}

impl NQuad {
    /// Fact `subject predicate object` with [`Op::Set`].
    pub fn new(subject: NodeRef, predicate: impl Into<String>, object: ObjectValue) -> Self {
        Self {
            subject,
            predicate: predicate.into(),
            object,
            op: Op::Set,
        }
    }

    /// Blank labels referenced by this fact, subject first.
    pub fn blank_labels(&self) -> impl Iterator<Item = &str> {
        let subject = match &self.subject {
            NodeRef::Blank(label) => Some(label.as_str()),
            _ => None,
        };
        let object = match &self.object {
            ObjectValue::Node(NodeRef::Blank(label)) => Some(label.as_str()),
            _ => None,
        };
        subject.into_iter().chain(object)
    }

    /// Query variables referenced by this fact, subject first.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        let subject = match &self.subject {
            NodeRef::Var(name) => Some(name.as_str()),
            _ => None,
        };
        let object = match &self.object {
            ObjectValue::Node(NodeRef::Var(name)) | ObjectValue::ValueVar(name) => Some(name.as_str()),
            _ => None,
        };
        subject.into_iter().chain(object)
    }
}

/// True when the fact references names only query evaluation can bind.
pub fn is_dependent(nquad: &NQuad) -> bool {
    matches!(nquad.subject, NodeRef::Var(_))
        || matches!(
            nquad.object,
            ObjectValue::Node(NodeRef::Var(_)) | ObjectValue::ValueVar(_)
        )
}

/// Ordered batch of facts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NQuads {
    quads: Vec<NQuad>,
}

impl NQuads {
    /// Wraps `quads`, stamping each with `op`.
    pub fn wrap(quads: Vec<NQuad>, op: Op) -> Self {
        let quads = quads
            .into_iter()
            .map(|mut quad| {
                quad.op = op;
                quad
            })
            .collect();
        Self { quads }
    }

    /// Appends `other` after this batch.
    pub fn add(mut self, other: NQuads) -> Self {
        self.quads.extend(other.quads);
        self
    }

    /// Whether the batch has no facts.
    pub fn is_empty(&self) -> bool {
        self.quads.is_empty()
    }

    /// Number of facts.
    pub fn len(&self) -> usize {
        self.quads.len()
    }

    /// Facts in order.
    pub fn iter(&self) -> std::slice::Iter<'_, NQuad> {
        self.quads.iter()
    }

    /// Distinct blank labels in first-seen order.
    pub fn blank_labels(&self) -> Vec<&str> {
        let mut seen = FxHashSet::default();
        self.quads
            .iter()
            .flat_map(NQuad::blank_labels)
            .filter(|label| seen.insert(*label))
            .collect()
    }

    /// Distinct query variables in first-seen order.
    pub fn variables(&self) -> Vec<&str> {
        let mut seen = FxHashSet::default();
        self.quads
            .iter()
            .flat_map(NQuad::variables)
            .filter(|name| seen.insert(*name))
            .collect()
    }

    /// Distinct predicates in first-seen order.
    pub fn predicates(&self) -> Vec<String> {
        let mut seen = FxHashSet::default();
        self.quads
            .iter()
            .map(|quad| quad.predicate.as_str())
            .filter(|pred| seen.insert(*pred))
            .map(String::from)
            .collect()
    }

    pub(crate) fn into_vec(self) -> Vec<NQuad> {
        self.quads
    }

    pub(crate) fn from_vec(quads: Vec<NQuad>) -> Self {
        Self { quads }
    }
}

impl<'a> IntoIterator for &'a NQuads {
    type Item = &'a NQuad;
    type IntoIter = std::slice::Iter<'a, NQuad>;

    fn into_iter(self) -> Self::IntoIter {
        self.quads.iter()
    }
}

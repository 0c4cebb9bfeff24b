use super::nquad::{is_dependent, NQuad, NQuads, Op};

/// A mutation's facts split by whether they need query bindings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Partitioned {
    /// Additions referencing query variables.
    pub dependent_set: NQuads,
    /// Additions resolvable before the query runs.
    pub independent_set: NQuads,
    /// Deletions referencing query variables.
    pub dependent_del: NQuads,
    /// Deletions resolvable before the query runs.
    pub independent_del: NQuads,
}

impl Partitioned {
    /// Splits additions and deletions with [`is_dependent`].
    pub fn new(set: Vec<NQuad>, del: Vec<NQuad>) -> Self {
        let (dependent_set, independent_set) = NQuads::wrap(set, Op::Set).partition(is_dependent);
        let (dependent_del, independent_del) = NQuads::wrap(del, Op::Del).partition(is_dependent);
        Self {
            dependent_set,
            independent_set,
            dependent_del,
            independent_del,
        }
    }

    /// Batch applied before the query phase: additions, then deletions.
    pub fn independent_batch(&self) -> NQuads {
        self.independent_set.clone().add(self.independent_del.clone())
    }

    /// Batch applied after the query phase: additions, then deletions.
    pub fn dependent_batch(&self) -> NQuads {
        self.dependent_set.clone().add(self.dependent_del.clone())
    }
}

impl NQuads {
    /// Stable split into `(matching, rest)`.
    pub fn partition(self, pred: impl Fn(&NQuad) -> bool) -> (NQuads, NQuads) {
        let (matching, rest): (Vec<_>, Vec<_>) = self.into_vec().into_iter().partition(|q| pred(q));
        (NQuads::from_vec(matching), NQuads::from_vec(rest))
    }
}

#![forbid(unsafe_code)]

//! Tokenizer registry.
//!
//! A fixed table of indexing strategies, each bound to one scalar type. The
//! table is built once and never mutated, so lookups need no locking. Every
//! token a tokenizer emits starts with the tokenizer's identifier byte, and
//! sortable tokenizers emit bytes whose lexicographic order matches the
//! order of the values they were derived from.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use rustc_hash::FxHashMap;
use thiserror::Error;
use time::UtcOffset;
use xxhash_rust::xxh64::xxh64;

use crate::types::{TypeId, Value};

/// Failure to derive tokens from a value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenizeError {
    /// The value's type is not the tokenizer's type.
    #[error("tokenizer {tokenizer} expects {expected} values, got {found}")]
    TypeMismatch {
        /// Tokenizer name.
        tokenizer: &'static str,
        /// Type the tokenizer indexes.
        expected: TypeId,
        /// Type of the offered value.
        found: TypeId,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Int,
    Float,
    Bool,
    Year,
    Month,
    Day,
    Hour,
    Date,
    Exact,
    Hash,
    Term,
    FullText,
    Trigram,
}

/// Descriptor for one indexing strategy.
#[derive(Debug)]
pub struct Tokenizer {
    name: &'static str,
    ty: TypeId,
    sortable: bool,
    identifier: u8,
    kind: Kind,
}

const fn tokenizer(
    name: &'static str,
    ty: TypeId,
    sortable: bool,
    identifier: u8,
    kind: Kind,
) -> Tokenizer {
    Tokenizer {
        name,
        ty,
        sortable,
        identifier,
        kind,
    }
}

static TOKENIZERS: [Tokenizer; 13] = [
    tokenizer("term", TypeId::String, false, 0x01, Kind::Term),
    tokenizer("exact", TypeId::String, true, 0x02, Kind::Exact),
    tokenizer("year", TypeId::DateTime, true, 0x04, Kind::Year),
    tokenizer("int", TypeId::Int, true, 0x06, Kind::Int),
    tokenizer("float", TypeId::Float, true, 0x07, Kind::Float),
    tokenizer("fulltext", TypeId::String, false, 0x08, Kind::FullText),
    tokenizer("bool", TypeId::Bool, false, 0x09, Kind::Bool),
    tokenizer("trigram", TypeId::String, false, 0x0A, Kind::Trigram),
    tokenizer("hash", TypeId::String, false, 0x0B, Kind::Hash),
    tokenizer("month", TypeId::DateTime, true, 0x41, Kind::Month),
    tokenizer("day", TypeId::DateTime, true, 0x42, Kind::Day),
    tokenizer("hour", TypeId::DateTime, true, 0x43, Kind::Hour),
    tokenizer("date", TypeId::Date, true, 0x44, Kind::Date),
];

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

fn registry() -> &'static FxHashMap<&'static str, &'static Tokenizer> {
    static REGISTRY: OnceLock<FxHashMap<&'static str, &'static Tokenizer>> = OnceLock::new();
    REGISTRY.get_or_init(|| TOKENIZERS.iter().map(|t| (t.name, t)).collect())
}

/// Looks up a tokenizer by name.
pub fn lookup(name: &str) -> Option<&'static Tokenizer> {
    registry().get(name).copied()
}

/// Tokenizer assigned when a predicate is indexed without naming one.
pub fn default_tokenizer(ty: TypeId) -> &'static Tokenizer {
    let name = match ty.index_type() {
        TypeId::Int => "int",
        TypeId::Float => "float",
        TypeId::Bool => "bool",
        TypeId::DateTime => "year",
        TypeId::Date => "date",
        _ => "term",
    };
    // The table always contains the defaults.
    registry()[name]
}

/// All registered tokenizers, in identifier order.
pub fn all() -> impl Iterator<Item = &'static Tokenizer> {
    TOKENIZERS.iter()
}

impl Tokenizer {
    /// Registered name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type of the values this tokenizer indexes.
    pub fn value_type(&self) -> TypeId {
        self.ty
    }

    /// Whether tokens preserve value order.
    pub fn is_sortable(&self) -> bool {
        self.sortable
    }

    /// Byte prefixed to every token.
    pub fn identifier(&self) -> u8 {
        self.identifier
    }

    /// Derives the index tokens for `value`.
    pub fn tokens(&self, value: &Value) -> Result<Vec<Vec<u8>>, TokenizeError> {
        let mismatch = || TokenizeError::TypeMismatch {
            tokenizer: self.name,
            expected: self.ty,
            found: value.type_id(),
        };
        let bodies: Vec<Vec<u8>> = match (self.kind, value) {
            (Kind::Int, Value::Int(v)) => vec![((*v as u64) ^ (1 << 63)).to_be_bytes().to_vec()],
            (Kind::Float, Value::Float(v)) => vec![sortable_float(*v).to_be_bytes().to_vec()],
            (Kind::Bool, Value::Bool(v)) => vec![vec![u8::from(*v)]],
            (Kind::Year | Kind::Month | Kind::Day | Kind::Hour, Value::DateTime(dt)) => {
                let utc = dt.to_offset(UtcOffset::UTC);
                let mut out = sortable_year(utc.year());
                if self.kind != Kind::Year {
                    out.push(u8::from(utc.month()));
                }
                if matches!(self.kind, Kind::Day | Kind::Hour) {
                    out.push(utc.day());
                }
                if self.kind == Kind::Hour {
                    out.push(utc.hour());
                }
                vec![out]
            }
            (Kind::Date, Value::Date(d)) => {
                let mut out = sortable_year(d.year());
                out.push(u8::from(d.month()));
                out.push(d.day());
                vec![out]
            }
            (kind, Value::String(s) | Value::Default(s)) => match kind {
                Kind::Exact => vec![s.as_bytes().to_vec()],
                Kind::Hash => vec![xxh64(s.as_bytes(), 0).to_be_bytes().to_vec()],
                Kind::Term => terms(s, false),
                Kind::FullText => terms(s, true),
                Kind::Trigram => trigrams(s),
                _ => return Err(mismatch()),
            },
            _ => return Err(mismatch()),
        };
        Ok(bodies
            .into_iter()
            .map(|body| {
                let mut token = Vec::with_capacity(body.len() + 1);
                token.push(self.identifier);
                token.extend_from_slice(&body);
                token
            })
            .collect())
    }
}

fn sortable_float(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

fn sortable_year(year: i32) -> Vec<u8> {
    ((year as u32) ^ (1 << 31)).to_be_bytes().to_vec()
}

fn terms(text: &str, drop_stop_words: bool) -> Vec<Vec<u8>> {
    let words: BTreeSet<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !drop_stop_words || !STOP_WORDS.contains(&w.as_str()))
        .collect();
    words.into_iter().map(String::into_bytes).collect()
}

fn trigrams(text: &str) -> Vec<Vec<u8>> {
    let chars: Vec<char> = text.chars().collect();
    let grams: BTreeSet<String> = chars.windows(3).map(|w| w.iter().collect()).collect();
    grams.into_iter().map(String::into_bytes).collect()
}

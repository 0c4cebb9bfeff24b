#![forbid(unsafe_code)]

//! Identifier and scalar value types shared by every layer of the node.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use xxhash_rust::xxh64::xxh64;

/// Top bit marks uids derived from external names rather than allocated.
pub const FINGERPRINT_BIT: u64 = 1 << 63;

/// Globally unique node identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Uid(pub u64);

impl Uid {
    /// Renders the uid the way clients see it (`0x1f`).
    pub fn to_hex(self) -> String {
        format!("{:#x}", self.0)
    }

    /// Parses `0x`-prefixed hex or plain decimal uids.
    pub fn parse(text: &str) -> Option<Uid> {
        let text = text.trim();
        let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => text.parse::<u64>().ok(),
        };
        parsed.filter(|raw| *raw != 0).map(Uid)
    }

    /// Deterministic uid for an external identifier such as `<alice>`.
    pub fn fingerprint(xid: &str) -> Uid {
        Uid(xxh64(xid.as_bytes(), 0) | FINGERPRINT_BIT)
    }

    /// Whether this uid came from [`Uid::fingerprint`].
    pub fn is_fingerprint(self) -> bool {
        self.0 & FINGERPRINT_BIT != 0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Storage type of a predicate's values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeId {
    /// Untyped literal, kept as text.
    Default,
    /// Signed 64-bit integer.
    Int,
    /// 64-bit float.
    Float,
    /// UTF-8 string.
    String,
    /// Boolean.
    Bool,
    /// Calendar date.
    Date,
    /// Instant with offset.
    DateTime,
    /// Reference to another node.
    Uid,
}

impl TypeId {
    /// Name used in schema text and error messages.
    pub fn name(self) -> &'static str {
        match self {
            TypeId::Default => "default",
            TypeId::Int => "int",
            TypeId::Float => "float",
            TypeId::String => "string",
            TypeId::Bool => "bool",
            TypeId::Date => "date",
            TypeId::DateTime => "datetime",
            TypeId::Uid => "uid",
        }
    }

    /// Resolves a schema type name.
    pub fn from_name(name: &str) -> Option<TypeId> {
        match name {
            "default" => Some(TypeId::Default),
            "int" => Some(TypeId::Int),
            "float" => Some(TypeId::Float),
            "string" => Some(TypeId::String),
            "bool" => Some(TypeId::Bool),
            "date" => Some(TypeId::Date),
            "datetime" | "dateTime" => Some(TypeId::DateTime),
            "uid" => Some(TypeId::Uid),
            _ => None,
        }
    }

    /// Resolves an RDF datatype annotation (`xs:int` or the full XSD IRI).
    pub fn from_xsd(iri: &str) -> Option<TypeId> {
        let local = iri
            .strip_prefix("xs:")
            .or_else(|| iri.strip_prefix("http://www.w3.org/2001/XMLSchema#"))?;
        match local {
            "int" | "integer" | "long" => Some(TypeId::Int),
            "float" | "double" | "decimal" => Some(TypeId::Float),
            "string" => Some(TypeId::String),
            "boolean" => Some(TypeId::Bool),
            "date" => Some(TypeId::Date),
            "dateTime" => Some(TypeId::DateTime),
            _ => None,
        }
    }

    /// Type the tokenizers of this type are registered under.
    pub fn index_type(self) -> TypeId {
        match self {
            TypeId::Default => TypeId::String,
            other => other,
        }
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed scalar value stored on an edge.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Untyped text.
    Default(String),
    /// Integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// String.
    String(String),
    /// Boolean.
    Bool(bool),
    /// Date.
    Date(Date),
    /// Date and time.
    DateTime(OffsetDateTime),
}

impl Value {
    /// The storage type of this value.
    pub fn type_id(&self) -> TypeId {
        match self {
            Value::Default(_) => TypeId::Default,
            Value::Int(_) => TypeId::Int,
            Value::Float(_) => TypeId::Float,
            Value::String(_) => TypeId::String,
            Value::Bool(_) => TypeId::Bool,
            Value::Date(_) => TypeId::Date,
            Value::DateTime(_) => TypeId::DateTime,
        }
    }

    /// Text form, used when a value is coerced into another type.
    pub fn to_text(&self) -> String {
        match self {
            Value::Default(s) | Value::String(s) => s.clone(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Bool(v) => v.to_string(),
            Value::Date(d) => d
                .format(format_description!("[year]-[month]-[day]"))
                .unwrap_or_default(),
            Value::DateTime(dt) => dt.format(&Rfc3339).unwrap_or_default(),
        }
    }

    /// JSON rendering used in query responses.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(v) => serde_json::Value::Bool(*v),
            other => serde_json::Value::String(other.to_text()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_parsing_accepts_hex_and_decimal() {
        assert_eq!(Uid::parse("0x1f"), Some(Uid(31)));
        assert_eq!(Uid::parse("42"), Some(Uid(42)));
        assert_eq!(Uid::parse("0x0"), None);
        assert_eq!(Uid::parse("peter"), None);
        assert_eq!(Uid(255).to_hex(), "0xff");
    }

    #[test]
    fn fingerprints_are_stable_and_marked() {
        let a = Uid::fingerprint("peter");
        assert_eq!(a, Uid::fingerprint("peter"));
        assert_ne!(a, Uid::fingerprint("paul"));
        assert!(a.is_fingerprint());
        assert!(!Uid(7).is_fingerprint());
    }

    #[test]
    fn xsd_annotations_map_to_types() {
        assert_eq!(TypeId::from_xsd("xs:int"), Some(TypeId::Int));
        assert_eq!(
            TypeId::from_xsd("http://www.w3.org/2001/XMLSchema#dateTime"),
            Some(TypeId::DateTime)
        );
        assert_eq!(TypeId::from_xsd("xs:geo"), None);
        assert_eq!(TypeId::Default.index_type(), TypeId::String);
    }
}

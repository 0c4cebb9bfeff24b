use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

use crate::types::{TypeId, Value};

/// Literal text that does not parse as the requested type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot convert {raw:?} to {target}")]
pub struct ConvertError {
    /// Offending text.
    pub raw: String,
    /// Requested type.
    pub target: TypeId,
}

/// Parses literal text as a value of type `target`.
///
/// Uid is not a scalar type; asking for it always fails.
pub fn convert(raw: &str, target: TypeId) -> Result<Value, ConvertError> {
    let fail = || ConvertError {
        raw: raw.to_string(),
        target,
    };
    let text = raw.trim();
    match target {
        TypeId::Default => Ok(Value::Default(raw.to_string())),
        TypeId::String => Ok(Value::String(raw.to_string())),
        TypeId::Int => parse_int(text).map(Value::Int).ok_or_else(fail),
        TypeId::Float => text
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Value::Float)
            .ok_or_else(fail),
        TypeId::Bool => match text {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(fail()),
        },
        TypeId::Date => parse_date(text).map(Value::Date).ok_or_else(fail),
        TypeId::DateTime => parse_datetime(text).map(Value::DateTime).ok_or_else(fail),
        TypeId::Uid => Err(fail()),
    }
}

/// Re-expresses an already typed value as `target`, going through its text.
pub fn coerce(value: &Value, target: TypeId) -> Result<Value, ConvertError> {
    if value.type_id() == target {
        return Ok(value.clone());
    }
    convert(&value.to_text(), target)
}

fn parse_int(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn parse_date(text: &str) -> Option<Date> {
    Date::parse(text, format_description!("[year]-[month]-[day]")).ok()
}

fn parse_datetime(text: &str) -> Option<OffsetDateTime> {
    if let Ok(dt) = OffsetDateTime::parse(text, &Rfc3339) {
        return Some(dt);
    }
    let naive = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    let naive_frac =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]");
    if let Ok(dt) = PrimitiveDateTime::parse(text, naive)
        .or_else(|_| PrimitiveDateTime::parse(text, naive_frac))
    {
        return Some(dt.assume_utc());
    }
    parse_date(text).map(|date| PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_utc())
}

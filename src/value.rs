//! Typed scalar values stored in a dictionary
//!
//! Every entry holds exactly one [`Value`]. Values loaded from text start out
//! as [`Value::Any`], the raw string, and are narrowed to a concrete kind the
//! first time a typed accessor touches them. After that the kind never
//! changes; only the payload does.

use std::fmt;

/// The kind tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Not yet narrowed; the payload is the raw string from the source.
    Any,
    String,
    Bool,
    Int32,
    Int64,
    Double,
    TriState,
}

impl Kind {
    pub fn name(self) -> &'static str {
        match self {
            Kind::Any => "untyped",
            Kind::String => "string",
            Kind::Bool => "bool",
            Kind::Int32 => "int32",
            Kind::Int64 => "int64",
            Kind::Double => "double",
            Kind::TriState => "tristate",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A three-valued boolean: true, false, or "let someone else decide".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriState {
    Default,
    False,
    True,
}

impl TriState {
    /// The numeric encoding: -1 for default, 0 for false, 1 for true.
    pub fn as_i8(self) -> i8 {
        match self {
            TriState::Default => -1,
            TriState::False => 0,
            TriState::True => 1,
        }
    }
}

impl From<bool> for TriState {
    fn from(b: bool) -> Self {
        if b { TriState::True } else { TriState::False }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Any(String),
    String(String),
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    TriState(TriState),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Any(_) => Kind::Any,
            Value::String(_) => Kind::String,
            Value::Bool(_) => Kind::Bool,
            Value::Int32(_) => Kind::Int32,
            Value::Int64(_) => Kind::Int64,
            Value::Double(_) => Kind::Double,
            Value::TriState(_) => Kind::TriState,
        }
    }

    /// Renders the value the way the writer puts it in a file.
    ///
    /// Booleans become `TRUE`/`FALSE`, tri-states `DEFAULT`/`TRUE`/`FALSE`,
    /// integers decimal, and doubles the shortest text that parses back to
    /// the same bits.
    pub fn to_text(&self) -> String {
        match self {
            Value::Any(s) | Value::String(s) => s.clone(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Int32(i) => i.to_string(),
            Value::Int64(i) => i.to_string(),
            Value::Double(d) => format_double(*d),
            Value::TriState(TriState::Default) => "DEFAULT".to_string(),
            Value::TriState(TriState::True) => "TRUE".to_string(),
            Value::TriState(TriState::False) => "FALSE".to_string(),
        }
    }

    /// The string payload of string-like values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Any(s) | Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

fn format_double(d: f64) -> String {
    if d.is_nan() {
        return "nan".to_string();
    }
    if d.is_infinite() {
        return if d > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let magnitude = d.abs();
    if magnitude != 0.0 && !(1e-4..1e17).contains(&magnitude) {
        format!("{:e}", d)
    } else {
        format!("{}", d)
    }
}

/// Rust types that map onto exactly one [`Kind`].
///
/// This is what lets [`crate::Dictionary::get`] and
/// [`crate::Dictionary::set`] be written once instead of once per kind.
pub trait DictValue: Sized + Clone + PartialEq + fmt::Debug {
    const KIND: Kind;

    fn into_value(self) -> Value;

    /// Extracts the payload if `value` has this type's kind.
    fn from_value(value: &Value) -> Option<Self>;
}

impl DictValue for String {
    const KIND: Kind = Kind::String;

    fn into_value(self) -> Value {
        Value::String(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl DictValue for bool {
    const KIND: Kind = Kind::Bool;

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl DictValue for i32 {
    const KIND: Kind = Kind::Int32;

    fn into_value(self) -> Value {
        Value::Int32(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int32(i) => Some(*i),
            _ => None,
        }
    }
}

impl DictValue for i64 {
    const KIND: Kind = Kind::Int64;

    fn into_value(self) -> Value {
        Value::Int64(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }
}

impl DictValue for f64 {
    const KIND: Kind = Kind::Double;

    fn into_value(self) -> Value {
        Value::Double(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }
}

impl DictValue for TriState {
    const KIND: Kind = Kind::TriState;

    fn into_value(self) -> Value {
        Value::TriState(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::TriState(t) => Some(*t),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_and_tristate_text() {
        assert_eq!(Value::Bool(true).to_text(), "TRUE");
        assert_eq!(Value::Bool(false).to_text(), "FALSE");
        assert_eq!(Value::TriState(TriState::Default).to_text(), "DEFAULT");
        assert_eq!(Value::TriState(TriState::True).to_text(), "TRUE");
        assert_eq!(Value::TriState(TriState::False).to_text(), "FALSE");
    }

    #[test]
    fn test_integer_text() {
        assert_eq!(Value::Int32(-42).to_text(), "-42");
        assert_eq!(Value::Int64(i64::MAX).to_text(), "9223372036854775807");
    }

    #[test]
    fn test_double_text_is_short() {
        assert_eq!(Value::Double(1.0).to_text(), "1");
        assert_eq!(Value::Double(0.1).to_text(), "0.1");
        assert_eq!(Value::Double(-2.5).to_text(), "-2.5");
        assert_eq!(Value::Double(1e300).to_text(), "1e300");
        assert_eq!(Value::Double(1.5e-7).to_text(), "1.5e-7");
        assert_eq!(Value::Double(0.0).to_text(), "0");
    }

    #[test]
    fn test_double_text_round_trips() {
        for d in [0.1, 1.0 / 3.0, 6.02214076e23, -1e-10, 123456.789] {
            let text = Value::Double(d).to_text();
            assert_eq!(text.parse::<f64>().unwrap(), d, "text was {}", text);
        }
    }

    #[test]
    fn test_from_value_checks_kind() {
        assert_eq!(bool::from_value(&Value::Bool(true)), Some(true));
        assert_eq!(bool::from_value(&Value::Int32(1)), None);
        assert_eq!(String::from_value(&Value::Any("x".into())), None);
        assert_eq!(
            TriState::from_value(&Value::TriState(TriState::Default)),
            Some(TriState::Default)
        );
    }

    #[test]
    fn test_tristate_numeric() {
        assert_eq!(TriState::Default.as_i8(), -1);
        assert_eq!(TriState::False.as_i8(), 0);
        assert_eq!(TriState::True.as_i8(), 1);
        assert_eq!(TriState::from(true), TriState::True);
    }
}

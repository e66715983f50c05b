//! Dynamically-typed device values.
//!
//! Values travel inside messages and are held by devices. They are validated
//! upstream, so this type only models shape: numbers, strings, booleans,
//! dates and lists of values.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A device value.
///
/// Serialized untagged so that the JSON emitted by the model compiler maps
/// directly: `true`, `42`, `21.5`, `"on"`, `[1, 2]`. Strings holding an
/// RFC 3339 timestamp deserialize as [`Value::Date`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(DateTime<Utc>),
    String(String),
    List(Vec<Value>),
}

impl Value {
    /// Numeric view; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Date(_) => true,
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::Date(_) => "date",
            Value::String(_) => "string",
            Value::List(_) => "list",
        }
    }

    /// Equality used when reconciling readings: numbers compare by magnitude
    /// regardless of integer/float representation.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => match (self, other) {
                (Value::List(a), Value::List(b)) => {
                    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y))
                }
                _ => self == other,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Date(d) => write!(f, "{}", d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Value::String(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_untagged_json_shapes() {
        let parsed: Vec<Value> =
            serde_json::from_str(r#"[true, 42, 21.5, "on", [1, "a"], "2024-05-01T10:00:00Z"]"#)
                .unwrap();

        assert_eq!(parsed[0], Value::Bool(true));
        assert_eq!(parsed[1], Value::Int(42));
        assert_eq!(parsed[2], Value::Float(21.5));
        assert_eq!(parsed[3], Value::from("on"));
        assert_eq!(parsed[4], Value::List(vec![Value::Int(1), Value::from("a")]));
        assert!(matches!(parsed[5], Value::Date(_)));
    }

    #[test]
    fn test_null_is_not_a_value() {
        let parsed: Result<Value, _> = serde_json::from_str("null");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_same_as_ignores_numeric_representation() {
        assert!(Value::Int(3).same_as(&Value::Float(3.0)));
        assert!(!Value::Int(3).same_as(&Value::Float(3.5)));
        assert!(Value::List(vec![Value::Int(1)]).same_as(&Value::List(vec![Value::Float(1.0)])));
        assert!(!Value::from("1").same_as(&Value::Int(1)));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
    }

    #[test]
    fn test_display() {
        let v = Value::List(vec![Value::Int(1), Value::Bool(false), Value::from("x")]);
        assert_eq!(v.to_string(), "[1, false, x]");
    }
}

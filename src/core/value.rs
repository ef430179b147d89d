use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed leaf value held at a data node.
///
/// The variants cover the value spaces the external schema library produces
/// for configuration leaves. `Empty` models presence-only leaves, which carry
/// no value but whose existence is meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Int(i64),
    Uint(u64),
    Bool(bool),
    Decimal(f64),
    Empty,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Int(_) => "int",
            Self::Uint(_) => "uint",
            Self::Bool(_) => "bool",
            Self::Decimal(_) => "decimal",
            Self::Empty => "empty",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Uint(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Canonical textual form, used in list-key predicates and diagnostics.
    pub fn canonical(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Uint(u) => u.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Decimal(d) => d.to_string(),
            Self::Empty => String::new(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{}", s),
            Self::Int(i) => write!(f, "{}", i),
            Self::Uint(u) => write!(f, "{}", u),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Decimal(d) => write!(f, "{}", d),
            Self::Empty => write!(f, ""),
        }
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

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&Value> for serde_json::Value {
    fn from(v: &Value) -> Self {
        match v {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Uint(u) => serde_json::Value::from(*u),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Decimal(d) => serde_json::Value::from(*d),
            Value::Empty => serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_form() {
        assert_eq!(Value::String("eth0".into()).canonical(), "eth0");
        assert_eq!(Value::Int(-7).canonical(), "-7");
        assert_eq!(Value::Bool(true).canonical(), "true");
        assert_eq!(Value::Empty.canonical(), "");
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::from("x"), Value::String("x".into()));
        assert_eq!(Value::Uint(5).as_i64(), Some(5));
        assert_eq!(Value::Uint(u64::MAX).as_i64(), None);
        assert_eq!(Value::Bool(false).as_bool(), Some(false));
    }
}

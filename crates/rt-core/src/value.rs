//! Data types and values carried on net ports.
//!
//! Values are compared and hashed by bit pattern so that constants can take
//! part in structural hashing of expression trees (`NaN == NaN`, `0.0 != -0.0`).

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Static type of a port or expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int,
    Double,
    Doubles,
}

impl DataType {
    /// Type-name fragment used in primitive type ids (`Core::DoubleAdd`).
    pub fn primitive_prefix(self) -> &'static str {
        match self {
            DataType::Bool => "Boolean",
            DataType::Int => "Int",
            DataType::Double => "Double",
            DataType::Doubles => "DoubleArray",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Int | DataType::Double)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.primitive_prefix())
    }
}

/// A single per-cycle value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Double(f64),
    Doubles(Vec<f64>),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Bool(_) => DataType::Bool,
            Value::Int(_) => DataType::Int,
            Value::Double(_) => DataType::Double,
            Value::Doubles(_) => DataType::Doubles,
        }
    }

    /// Zero/false value of a type.
    pub fn default_for(ty: DataType) -> Self {
        match ty {
            DataType::Bool => Value::Bool(false),
            DataType::Int => Value::Int(0),
            DataType::Double => Value::Double(0.0),
            DataType::Doubles => Value::Doubles(Vec::new()),
        }
    }

    pub fn as_bool(&self) -> CoreResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(CoreError::TypeMismatch {
                what: "value",
                expected: DataType::Bool,
                found: other.data_type(),
            }),
        }
    }

    /// Numeric view; `Int` widens to `f64`.
    pub fn as_f64(&self) -> CoreResult<f64> {
        match self {
            Value::Double(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(CoreError::TypeMismatch {
                what: "value",
                expected: DataType::Double,
                found: other.data_type(),
            }),
        }
    }

    /// Render as a net-description parameter string.
    pub fn to_param(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Double(d) => format!("{d:?}"),
            Value::Doubles(ds) => {
                let parts: Vec<String> = ds.iter().map(|d| format!("{d:?}")).collect();
                format!("{{{}}}", parts.join(","))
            }
        }
    }
}

impl Value {
    /// Parse a net-description parameter string rendered by
    /// [`to_param`](Value::to_param).
    pub fn parse_param(ty: DataType, text: &str) -> CoreResult<Value> {
        let text = text.trim();
        let bad = CoreError::InvalidArg {
            what: "parameter does not parse as its declared type",
        };
        match ty {
            DataType::Bool => text.parse().map(Value::Bool).map_err(|_| bad),
            DataType::Int => text.parse().map(Value::Int).map_err(|_| bad),
            DataType::Double => text.parse().map(Value::Double).map_err(|_| bad),
            DataType::Doubles => {
                let inner = text
                    .strip_prefix('{')
                    .and_then(|t| t.strip_suffix('}'))
                    .ok_or(bad.clone())?;
                if inner.trim().is_empty() {
                    return Ok(Value::Doubles(Vec::new()));
                }
                inner
                    .split(',')
                    .map(|p| p.trim().parse::<f64>().map_err(|_| bad.clone()))
                    .collect::<CoreResult<Vec<_>>>()
                    .map(Value::Doubles)
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Doubles(a), Value::Doubles(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Double(d) => d.to_bits().hash(state),
            Value::Doubles(ds) => {
                ds.len().hash(state);
                for d in ds {
                    d.to_bits().hash(state);
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_param())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Doubles(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(v: &Value) -> u64 {
        let mut h = DefaultHasher::new();
        v.hash(&mut h);
        h.finish()
    }

    #[test]
    fn nan_equals_itself() {
        let a = Value::Double(f64::NAN);
        assert_eq!(a, a.clone());
        assert_eq!(hash_of(&a), hash_of(&a.clone()));
    }

    #[test]
    fn signed_zero_is_distinct() {
        assert_ne!(Value::Double(0.0), Value::Double(-0.0));
    }

    #[test]
    fn int_widens_to_f64() {
        assert_eq!(Value::Int(3).as_f64().unwrap(), 3.0);
        assert!(Value::Bool(true).as_f64().is_err());
    }

    #[test]
    fn param_rendering() {
        assert_eq!(Value::Double(2.0).to_param(), "2.0");
        assert_eq!(Value::Doubles(vec![1.0, 0.5]).to_param(), "{1.0,0.5}");
        assert_eq!(Value::Bool(false).to_param(), "false");
    }

    #[test]
    fn params_parse_back() {
        for v in [
            Value::Double(2.0),
            Value::Int(-4),
            Value::Bool(true),
            Value::Doubles(vec![1.0, 0.5]),
            Value::Doubles(vec![]),
        ] {
            assert_eq!(Value::parse_param(v.data_type(), &v.to_param()).unwrap(), v);
        }
        assert!(Value::parse_param(DataType::Int, "2.5").is_err());
    }

    proptest::proptest! {
        #[test]
        fn finite_doubles_survive_params(ds in proptest::collection::vec(-1e12f64..1e12, 0..6)) {
            let v = Value::Doubles(ds);
            let back = Value::parse_param(DataType::Doubles, &v.to_param()).unwrap();
            proptest::prop_assert_eq!(hash_of(&back), hash_of(&v));
            proptest::prop_assert_eq!(back, v);
        }
    }
}

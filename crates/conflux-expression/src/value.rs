//! Runtime values produced by expression evaluation.

use bigdecimal::BigDecimal;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A dynamically typed value flowing through expressions and variable scopes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Absence of a value
    Null,
    /// Boolean value
    Boolean(bool),
    /// 32-bit integer
    Integer(i32),
    /// 64-bit integer
    Long(i64),
    /// Double precision float
    Double(f64),
    /// Single precision float
    Float(f32),
    /// Text
    String(String),
    /// Point in time, always UTC
    Date(DateTime<Utc>),
    /// Ordered sequence
    List(Vec<Value>),
    /// Named fields
    Object(BTreeMap<String, Value>),
}

/// Declared return type of an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnType {
    /// `Value::Boolean`
    Boolean,
    /// `Value::Integer`
    Integer,
    /// `Value::Long`
    Long,
    /// `Value::Double`
    Double,
    /// `Value::Float`
    Float,
    /// `Value::String`
    String,
    /// `Value::Date`
    Date,
    /// `Value::List`
    List,
    /// `Value::Object`
    Object,
    /// Any numeric value
    Number,
    /// Any value
    Any,
}

impl ReturnType {
    /// Whether a runtime value is assignable to this declared type.
    ///
    /// `Null` is assignable to every type, `Number` accepts every numeric
    /// variant and `Any` accepts everything.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ReturnType::Any, _) | (_, Value::Null) => true,
            (ReturnType::Number, v) => v.is_numeric(),
            (declared, v) => v.return_type() == Some(*declared),
        }
    }

    /// Whether the type is one of the numeric types
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ReturnType::Integer
                | ReturnType::Long
                | ReturnType::Double
                | ReturnType::Float
                | ReturnType::Number
        )
    }
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReturnType::Boolean => "boolean",
            ReturnType::Integer => "integer",
            ReturnType::Long => "long",
            ReturnType::Double => "double",
            ReturnType::Float => "float",
            ReturnType::String => "string",
            ReturnType::Date => "date",
            ReturnType::List => "list",
            ReturnType::Object => "object",
            ReturnType::Number => "number",
            ReturnType::Any => "any",
        };
        f.write_str(name)
    }
}

impl Value {
    /// Name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::List(_) => "list",
            Value::Object(_) => "object",
        }
    }

    /// Concrete return type of this value, `None` for `Null`
    pub fn return_type(&self) -> Option<ReturnType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(ReturnType::Boolean),
            Value::Integer(_) => Some(ReturnType::Integer),
            Value::Long(_) => Some(ReturnType::Long),
            Value::Double(_) => Some(ReturnType::Double),
            Value::Float(_) => Some(ReturnType::Float),
            Value::String(_) => Some(ReturnType::String),
            Value::Date(_) => Some(ReturnType::Date),
            Value::List(_) => Some(ReturnType::List),
            Value::Object(_) => Some(ReturnType::Object),
        }
    }

    /// Whether the value is one of the numeric variants
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Integer(_) | Value::Long(_) | Value::Double(_) | Value::Float(_)
        )
    }

    /// Widen a numeric value to an arbitrary precision decimal.
    ///
    /// Returns `None` for non-numeric values and for NaN or infinite floats.
    pub fn to_decimal(&self) -> Option<BigDecimal> {
        match self {
            Value::Integer(i) => Some(BigDecimal::from(*i as i64)),
            Value::Long(l) => Some(BigDecimal::from(*l)),
            Value::Double(d) if d.is_finite() => BigDecimal::from_str(&d.to_string()).ok(),
            Value::Float(f) if f.is_finite() => BigDecimal::from_str(&f.to_string()).ok(),
            _ => None,
        }
    }

    /// Lossy conversion of a numeric value to `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Long(l) => Some(*l as f64),
            Value::Double(d) => Some(*d),
            Value::Float(f) => Some(*f as f64),
            _ => None,
        }
    }

    /// Borrow the boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrow the string payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to plain JSON. Dates become RFC 3339 strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Long(l) => serde_json::Value::from(*l),
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Float(f) => serde_json::Number::from_f64(*f as f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Date(d) => {
                serde_json::Value::String(d.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Convert from plain JSON without type hints.
    ///
    /// Integral numbers become `Integer` when they fit, `Long` otherwise.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    i32::try_from(i)
                        .map(Value::Integer)
                        .unwrap_or(Value::Long(i))
                } else {
                    n.as_f64().map(Value::Double).unwrap_or(Value::Null)
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert from plain JSON, coercing scalars to the declared type when
    /// the JSON shape allows it.
    pub fn from_json_as(json: &serde_json::Value, return_type: ReturnType) -> Value {
        let coerced = match (return_type, json) {
            (ReturnType::Integer, serde_json::Value::Number(n)) => integral(n)
                .and_then(|i| i32::try_from(i).ok())
                .map(Value::Integer),
            (ReturnType::Long, serde_json::Value::Number(n)) => integral(n).map(Value::Long),
            (ReturnType::Double, serde_json::Value::Number(n)) => n.as_f64().map(Value::Double),
            (ReturnType::Float, serde_json::Value::Number(n)) => {
                n.as_f64().map(|f| Value::Float(f as f32))
            }
            (ReturnType::Date, serde_json::Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|d| Value::Date(d.with_timezone(&Utc))),
            _ => None,
        };
        coerced.unwrap_or_else(|| Value::from_json(json))
    }
}

/// Integral value of a JSON number, accepting floats with no fraction.
/// Numbers outside the i64 range have none.
fn integral(n: &serde_json::Number) -> Option<i64> {
    // 2^63 is exact as f64; i64::MAX is not
    const BOUND: f64 = 9_223_372_036_854_775_808.0;
    if n.is_u64() || n.is_i64() {
        return n.as_i64();
    }
    n.as_f64()
        .filter(|f| f.fract() == 0.0 && *f >= -BOUND && *f < BOUND)
        .map(|f| f as i64)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Long(l) => write!(f, "{}", l),
            Value::Double(d) => write!(f, "{}", d),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
            Value::Date(d) => f.write_str(&d.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Object(fields) => {
                f.write_str("{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}={}", k, v)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

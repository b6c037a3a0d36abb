//! Records, documents and scalar comparison rules.
//!
//! Documents are JSON objects. The query engine only ever looks at their
//! top-level fields: equality for selectors, ordering for sorts.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored value: a JSON object.
pub type Document = serde_json::Map<String, Value>;

/// A key and the document stored under it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: Document,
}

impl Record {
    pub fn new(key: impl Into<String>, value: Document) -> Self {
        Self { key: key.into(), value }
    }

    /// Top-level field lookup.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.value.get(name)
    }
}

/// Right-hand side of a selector predicate.
///
/// Integers keep their exact value, so `Int(2^53 + 1)` does not match a
/// stored `2^53`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Number(f64),
    String(String),
}

impl Scalar {
    fn numeric(&self) -> Option<Numeric> {
        match self {
            Scalar::Int(n) => Some(Numeric::Int(i128::from(*n))),
            Scalar::UInt(n) => Some(Numeric::Int(i128::from(*n))),
            Scalar::Number(n) if n.is_finite() => Some(Numeric::Float(*n)),
            Scalar::String(s) => Numeric::parse(s),
            _ => None,
        }
    }

    /// Equality against a document field, with numeric coercion.
    ///
    /// Numeric-like on both sides compares by value, so `5` matches `"5"`
    /// and `"5.0"`. Anything else must be the same JSON scalar. A missing
    /// field never matches.
    pub fn matches(&self, field: Option<&Value>) -> bool {
        let Some(field) = field else {
            return false;
        };
        if let (Some(want), Some(have)) = (self.numeric(), Numeric::of_value(field)) {
            return want.cmp(have) == Ordering::Equal;
        }
        match (self, field) {
            (Scalar::Null, Value::Null) => true,
            (Scalar::Bool(a), Value::Bool(b)) => a == b,
            (Scalar::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("null"),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(n) => write!(f, "{}", n),
            Scalar::UInt(n) => write!(f, "{}", n),
            Scalar::Number(n) => write!(f, "{}", n),
            Scalar::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::String(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::String(s)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl From<f64> for Scalar {
    fn from(n: f64) -> Self {
        Scalar::Number(n)
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Scalar::Int(n)
    }
}

impl From<u64> for Scalar {
    fn from(n: u64) -> Self {
        Scalar::UInt(n)
    }
}

impl From<i32> for Scalar {
    fn from(n: i32) -> Self {
        Scalar::Int(i64::from(n))
    }
}

/// Value of a numeric-like field: a JSON number or a string that parses as
/// one. Integers are held exactly; floats are always finite.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Numeric {
    Int(i128),
    Float(f64),
}

impl Numeric {
    fn parse(s: &str) -> Option<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(n) = trimmed.parse::<i128>() {
            return Some(Numeric::Int(n));
        }
        trimmed
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Numeric::Float)
    }

    fn of_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Numeric::Int(i128::from(i)))
                } else if let Some(u) = n.as_u64() {
                    Some(Numeric::Int(i128::from(u)))
                } else {
                    n.as_f64().filter(|f| f.is_finite()).map(Numeric::Float)
                }
            }
            Value::String(s) => Numeric::parse(s),
            _ => None,
        }
    }

    /// Exact comparison of the two real values.
    fn cmp(self, other: Numeric) -> Ordering {
        match (self, other) {
            (Numeric::Int(a), Numeric::Int(b)) => a.cmp(&b),
            (Numeric::Float(a), Numeric::Float(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            (Numeric::Int(a), Numeric::Float(b)) => int_float_cmp(a, b),
            (Numeric::Float(a), Numeric::Int(b)) => int_float_cmp(b, a).reverse(),
        }
    }
}

/// `int` against a finite `float`, without rounding `int`.
fn int_float_cmp(int: i128, float: f64) -> Ordering {
    // 2^127: the first float outside the i128 range
    const LIMIT: f64 = 170_141_183_460_469_231_731_687_303_715_884_105_728.0;
    if float >= LIMIT {
        return Ordering::Less;
    }
    if float < -LIMIT {
        return Ordering::Greater;
    }
    if float.fract() == 0.0 {
        return int.cmp(&(float as i128));
    }
    // a fractional float has magnitude below 2^52; `int` only rounds when it
    // is larger than that, which keeps the sign of the comparison
    (int as f64).partial_cmp(&float).unwrap_or(Ordering::Equal)
}

/// Sort class of a field; lower classes sort first in ascending order.
fn class_of(value: Option<&Value>) -> (u8, Option<Numeric>) {
    match value {
        None => (0, None),
        Some(Value::Null) => (1, None),
        Some(Value::Bool(_)) => (2, None),
        Some(v @ (Value::Number(_) | Value::String(_))) => match Numeric::of_value(v) {
            Some(n) => (3, Some(n)),
            None => (4, None),
        },
        Some(Value::Array(_)) => (5, None),
        Some(Value::Object(_)) => (6, None),
    }
}

/// Total ordering used by sort passes.
///
/// Fields fall into classes ordered missing < null < bool < numeric <
/// string < array < object. Numbers and numeric strings share a class and
/// compare by value; other strings compare lexicographically; bools order
/// false before true. Arrays and objects are equal within their class.
pub fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (class_a, num_a) = class_of(a);
    let (class_b, num_b) = class_of(b);
    if class_a != class_b {
        return class_a.cmp(&class_b);
    }
    match (a, b, num_a, num_b) {
        (_, _, Some(x), Some(y)) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y)), _, _) => x.cmp(y),
        (Some(Value::String(x)), Some(Value::String(y)), _, _) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

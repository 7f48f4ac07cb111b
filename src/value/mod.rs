use std::collections::BTreeMap;
use std::fmt;

/// A runtime value. Containers own their payload outright: cloning a
/// `Value` deep-copies any array or map it holds, so two values never
/// share a container.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    Number(f64),
    Str(String),
    Bool(bool),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    #[default]
    Null,
}

/// Checked-access failure: the value's tag did not match what the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected}, found {found}")]
pub struct TypeMismatch {
    pub expected: &'static str,
    pub found: &'static str,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Null => "null",
        }
    }

    fn mismatch(&self, expected: &'static str) -> TypeMismatch {
        TypeMismatch { expected, found: self.type_name() }
    }

    pub fn as_number(&self) -> Result<f64, TypeMismatch> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(other.mismatch("number")),
        }
    }

    pub fn as_str(&self) -> Result<&str, TypeMismatch> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn as_array(&self) -> Result<&[Value], TypeMismatch> {
        match self {
            Value::Array(items) => Ok(items),
            other => Err(other.mismatch("array")),
        }
    }

    pub fn as_map(&self) -> Result<&BTreeMap<String, Value>, TypeMismatch> {
        match self {
            Value::Map(entries) => Ok(entries),
            other => Err(other.mismatch("map")),
        }
    }

    pub fn into_array(self) -> Result<Vec<Value>, TypeMismatch> {
        match self {
            Value::Array(items) => Ok(items),
            other => Err(other.mismatch("array")),
        }
    }

    /// Maps and null are always falsy; an array is truthy only when non-empty.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Map(_) | Value::Null => false,
        }
    }

    /// Language-level `==`. Different tags are never equal; containers compare deeply.
    pub fn equals(&self, other: &Value) -> bool {
        self == other
    }

    /// True when the number has no fractional part and fits in an i64.
    pub fn is_integral(n: f64) -> bool {
        n.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&n)
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "\"{}\"", s),
            other => write!(f, "{}", other),
        }
    }
}

/// 2^63: the first magnitude an `i64` cannot hold.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Significant digits for non-integral output, as C's `%g`.
const PRECISION: i32 = 6;

/// Integral numbers print as integers; anything else follows `%g`.
pub(crate) fn format_number(n: f64) -> String {
    if Value::is_integral(n) {
        return format!("{}", n as i64);
    }
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    // Round to PRECISION significant digits first; the exponent can move.
    let sci = format!("{:.*e}", (PRECISION - 1) as usize, n);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);

    if exp < -4 || exp >= PRECISION {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
    } else {
        let decimals = (PRECISION - 1 - exp) as usize;
        trim_fraction(&format!("{:.*}", decimals, n)).to_string()
    }
}

fn trim_fraction(digits: &str) -> &str {
    if digits.contains('.') { digits.trim_end_matches('0').trim_end_matches('.') } else { digits }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_nested(f)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\": ", k)?;
                    v.fmt_nested(f)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

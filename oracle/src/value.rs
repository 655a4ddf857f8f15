//! Observed engine values and the structural comparator the oracle uses.
//!
//! `deep_equals` mirrors the `deepEquals` helper injected into every
//! scaffolded program, so a verdict reached from the host agrees with the
//! verdict the target reaches on its own.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// A result captured from one invocation of a candidate function.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    /// Decimal rendering of a big integer.
    BigInt(String),
    String(String),
    /// Symbol description. Symbols have no comparable identity across runs.
    Symbol(String),
    Function,
    Array(Vec<Value>),
    /// Regular expression in its `/source/flags` form.
    RegExp(String),
    Object {
        class: String,
        /// Wrapped primitive of boxed values (`new Number(1)`, dates).
        primitive: Option<Box<Value>>,
        properties: BTreeMap<String, Value>,
    },
    /// External resource of the named category (array buffers, proxies...).
    Opaque(String),
}

impl Value {
    pub fn object(class: &str, properties: BTreeMap<String, Value>) -> Self {
        Value::Object {
            class: class.to_string(),
            primitive: None,
            properties,
        }
    }

    pub fn boxed(class: &str, primitive: Value) -> Self {
        Value::Object {
            class: class.to_string(),
            primitive: Some(Box::new(primitive)),
            properties: BTreeMap::new(),
        }
    }

    /// Category name, comparable to `typeof` refined by class for objects.
    pub fn category(&self) -> &str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::BigInt(_) => "bigint",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Function => "function",
            Value::Array(_) => "Array",
            Value::RegExp(_) => "RegExp",
            Value::Object { class, .. } => class,
            Value::Opaque(category) => category,
        }
    }
}

/// Structural equality as defined for the differential oracle.
///
/// Differs from numeric equality in two places: `NaN` equals itself and
/// `0` does not equal `-0`.
pub fn deep_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => number_equals(*x, *y),
        (Value::BigInt(x), Value::BigInt(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Symbol(_), Value::Symbol(_)) | (Value::Function, Value::Function) => true,
        (Value::Opaque(x), Value::Opaque(y)) => x == y,
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equals(x, y))
        }
        (Value::RegExp(x), Value::RegExp(y)) => x == y,
        (
            Value::Object {
                class: class_a,
                primitive: prim_a,
                properties: props_a,
            },
            Value::Object {
                class: class_b,
                primitive: prim_b,
                properties: props_b,
            },
        ) => {
            if class_a != class_b {
                return false;
            }
            match (prim_a, prim_b) {
                (Some(x), Some(y)) if !deep_equals(x, y) => return false,
                (Some(_), None) | (None, Some(_)) => return false,
                _ => {}
            }
            // BTreeMap keys iterate sorted, so equal key sets line up pairwise.
            props_a.len() == props_b.len()
                && props_a
                    .iter()
                    .zip(props_b)
                    .all(|((ka, va), (kb, vb))| ka == kb && deep_equals(va, vb))
        }
        _ => false,
    }
}

fn number_equals(x: f64, y: f64) -> bool {
    if x.is_nan() && y.is_nan() {
        return true;
    }
    if x == 0.0 && y == 0.0 {
        return x.is_sign_negative() == y.is_sign_negative();
    }
    x == y
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) if *n == 0.0 && n.is_sign_negative() => write!(f, "-0"),
            Value::Number(n) => write!(f, "{}", n),
            Value::BigInt(n) => write!(f, "{}n", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Symbol(d) => write!(f, "Symbol({})", d),
            Value::Function => write!(f, "[function]"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::RegExp(source) => write!(f, "{}", source),
            Value::Object {
                class,
                primitive,
                properties,
            } => {
                write!(f, "{}", class)?;
                if let Some(p) = primitive {
                    write!(f, "({})", p)?;
                }
                write!(f, " {{")?;
                for (i, (k, v)) in properties.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {}: {}", k, v)?;
                }
                write!(f, " }}")
            }
            Value::Opaque(category) => write!(f, "[{}]", category),
        }
    }
}

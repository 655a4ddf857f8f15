//! Conversion of V8 values into the oracle's [`Value`] model.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use crate::value::Value;

/// Deeper structures are almost always cyclic; the in-engine comparator
/// would overflow its stack on them too.
const MAX_DEPTH: usize = 64;

/// Upper bound on array elements and object properties visited per value.
pub const MAX_NODES: usize = 1 << 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    /// The deadline passed while walking the value.
    Deadline,
    /// The value cannot be modelled: too large, too deep, or a getter threw.
    Unrepresentable(String),
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::Deadline => write!(f, "value conversion passed its deadline"),
            ConvertError::Unrepresentable(reason) => write!(f, "{}", reason),
        }
    }
}

fn unrepresentable(reason: impl Into<String>) -> ConvertError {
    ConvertError::Unrepresentable(reason.into())
}

/// Walk state shared by one conversion.
struct Walk<'s> {
    /// The intrinsic `Object.prototype.toString`, captured before any
    /// candidate code ran.
    object_to_string: v8::Local<'s, v8::Function>,
    deadline: Instant,
    nodes: usize,
}

impl Walk<'_> {
    fn visit(&mut self, count: usize) -> Result<(), ConvertError> {
        self.nodes = self.nodes.saturating_add(count);
        if self.nodes > MAX_NODES {
            return Err(unrepresentable(format!("value has more than {} nodes", MAX_NODES)));
        }
        if Instant::now() >= self.deadline {
            return Err(ConvertError::Deadline);
        }
        Ok(())
    }
}

pub fn to_value<'s>(
    scope: &mut v8::HandleScope<'s>,
    value: v8::Local<'s, v8::Value>,
    object_to_string: v8::Local<'s, v8::Function>,
    deadline: Instant,
) -> Result<Value, ConvertError> {
    let mut walk = Walk {
        object_to_string,
        deadline,
        nodes: 0,
    };
    convert(scope, &mut walk, value, 0)
}

fn display<'s>(scope: &mut v8::HandleScope<'s>, value: v8::Local<'s, v8::Value>) -> Result<String, ConvertError> {
    value
        .to_string(scope)
        .map(|s| s.to_rust_string_lossy(scope))
        .ok_or_else(|| unrepresentable("value could not be converted to a string"))
}

/// Class tag exactly as `Object.prototype.toString` reports it, which is
/// what the scaffold's `classOf` compares.
fn class_of<'s>(
    scope: &mut v8::HandleScope<'s>,
    walk: &Walk<'s>,
    value: v8::Local<'s, v8::Value>,
) -> Result<String, ConvertError> {
    let tag = walk
        .object_to_string
        .call(scope, value, &[])
        .ok_or_else(|| unrepresentable("Object.prototype.toString threw"))?;
    let tag = display(scope, tag)?;
    Ok(tag
        .strip_prefix("[object ")
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(&tag)
        .to_string())
}

fn convert<'s>(
    scope: &mut v8::HandleScope<'s>,
    walk: &mut Walk<'s>,
    value: v8::Local<'s, v8::Value>,
    depth: usize,
) -> Result<Value, ConvertError> {
    if depth > MAX_DEPTH {
        return Err(unrepresentable(format!("value nesting exceeds {} levels", MAX_DEPTH)));
    }
    walk.visit(1)?;

    if value.is_undefined() {
        return Ok(Value::Undefined);
    }
    if value.is_null() {
        return Ok(Value::Null);
    }
    if value.is_boolean() {
        return Ok(Value::Bool(value.is_true()));
    }
    if value.is_number() {
        return Ok(Value::Number(value.number_value(scope).unwrap_or(f64::NAN)));
    }
    if value.is_big_int() {
        return Ok(Value::BigInt(display(scope, value)?));
    }
    if value.is_string() {
        return Ok(Value::String(display(scope, value)?));
    }
    if value.is_symbol() {
        let detail = value
            .to_detail_string(scope)
            .map(|s| s.to_rust_string_lossy(scope))
            .unwrap_or_default();
        let description = detail
            .strip_prefix("Symbol(")
            .and_then(|d| d.strip_suffix(')'))
            .unwrap_or(&detail);
        return Ok(Value::Symbol(description.to_string()));
    }
    if value.is_proxy() {
        return Ok(Value::Opaque("Proxy".to_string()));
    }
    if value.is_external() {
        return Ok(Value::Opaque("External".to_string()));
    }
    if value.is_reg_exp() {
        return Ok(Value::RegExp(display(scope, value)?));
    }
    if value.is_array() {
        let array = v8::Local::<v8::Array>::try_from(value).map_err(|e| unrepresentable(e.to_string()))?;
        let length = array.length();
        if length as usize > MAX_NODES {
            return Err(unrepresentable(format!("array of length {} is too large", length)));
        }
        walk.visit(length as usize)?;
        let mut items = Vec::new();
        for i in 0..length {
            let element = array
                .get_index(scope, i)
                .ok_or_else(|| unrepresentable(format!("reading element {} threw", i)))?;
            items.push(convert(scope, walk, element, depth + 1)?);
        }
        return Ok(Value::Array(items));
    }

    let class = class_of(scope, walk, value)?;
    if value.is_function() && class == "Function" {
        return Ok(Value::Function);
    }

    let primitive = if value.is_date() || value.is_number_object() {
        Some(Value::Number(value.number_value(scope).unwrap_or(f64::NAN)))
    } else if value.is_string_object() {
        Some(Value::String(display(scope, value)?))
    } else if value.is_boolean_object() {
        Some(Value::Bool(display(scope, value)? == "true"))
    } else {
        None
    };

    let object = value
        .to_object(scope)
        .ok_or_else(|| unrepresentable("value is not an object"))?;
    let mut properties = BTreeMap::new();
    if let Some(names) = object.get_own_property_names(scope, v8::GetPropertyNamesArgs::default()) {
        let count = names.length();
        if count as usize > MAX_NODES {
            return Err(unrepresentable(format!("object with {} properties is too large", count)));
        }
        walk.visit(count as usize)?;
        for i in 0..count {
            let Some(key) = names.get_index(scope, i) else {
                continue;
            };
            let key_text = display(scope, key)?;
            let property = object
                .get(scope, key)
                .ok_or_else(|| unrepresentable(format!("reading property '{}' threw", key_text)))?;
            properties.insert(key_text, convert(scope, walk, property, depth + 1)?);
        }
    }

    Ok(Value::Object {
        class,
        primitive: primitive.map(Box::new),
        properties,
    })
}

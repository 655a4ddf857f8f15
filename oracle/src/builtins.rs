//! Builtin catalog: extra global functions the target process implements,
//! with the call signatures the external generator synthesizes calls from.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scaffold::scan;

/// Marker thrown by [`BuiltinCatalog::probe_source`].
pub const MISSING_BUILTINS_MARKER: &str = "jitdiff-missing-builtins:";

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') && !scan::is_keyword(name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsType {
    Undefined,
    Boolean,
    Integer,
    Float,
    Number,
    String,
    Object,
    Anything,
    Function(Box<Signature>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    Plain(JsType),
    Optional(JsType),
    Rest(JsType),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    pub returns: JsType,
}

impl Signature {
    pub fn new(parameters: Vec<Parameter>, returns: JsType) -> Self {
        Self { parameters, returns }
    }

    /// Rest parameters only last, no plain parameter after an optional one.
    fn check(&self) -> Result<(), String> {
        let mut seen_optional = false;
        for (i, param) in self.parameters.iter().enumerate() {
            match param {
                Parameter::Plain(ty) => {
                    if seen_optional {
                        return Err(format!("required parameter {} follows an optional one", i));
                    }
                    ty.check()?;
                }
                Parameter::Optional(ty) => {
                    seen_optional = true;
                    ty.check()?;
                }
                Parameter::Rest(ty) => {
                    if i + 1 != self.parameters.len() {
                        return Err(format!("rest parameter {} is not last", i));
                    }
                    ty.check()?;
                }
            }
        }
        self.returns.check()
    }
}

impl JsType {
    fn check(&self) -> Result<(), String> {
        match self {
            JsType::Function(signature) => signature.check(),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for JsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsType::Undefined => write!(f, ".undefined"),
            JsType::Boolean => write!(f, ".boolean"),
            JsType::Integer => write!(f, ".integer"),
            JsType::Float => write!(f, ".float"),
            JsType::Number => write!(f, ".number"),
            JsType::String => write!(f, ".string"),
            JsType::Object => write!(f, ".object()"),
            JsType::Anything => write!(f, ".anything"),
            JsType::Function(signature) => write!(f, ".function({})", signature),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::Plain(ty) => write!(f, "{}", ty),
            Parameter::Optional(ty) => write!(f, ".opt({})", ty),
            Parameter::Rest(ty) => write!(f, ".rest({})", ty),
        }
    }
}

/// `[.function()] => .undefined`
impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, param) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, "] => {}", self.returns)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuiltinCatalog {
    entries: BTreeMap<String, Signature>,
}

impl BuiltinCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, signature: Signature) -> Self {
        self.entries.insert(name.to_string(), signature);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Signature> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Signature)> {
        self.entries.iter()
    }

    /// Schema validation. `reserved` holds names the scaffold and sentinel
    /// protocol already own.
    pub fn validate(&self, reserved: &BTreeSet<String>) -> Result<(), ConfigError> {
        for (name, signature) in &self.entries {
            if !is_identifier(name) {
                return Err(ConfigError::InvalidIdentifier(name.clone()));
            }
            if reserved.contains(name) {
                return Err(ConfigError::ReservedBuiltin(name.clone()));
            }
            signature
                .check()
                .map_err(|reason| ConfigError::InvalidSignature {
                    name: name.clone(),
                    reason,
                })?;
        }
        Ok(())
    }

    /// Program that throws [`MISSING_BUILTINS_MARKER`] followed by the
    /// comma-separated names the target does not implement as callables.
    pub fn probe_source(&self) -> String {
        let names: Vec<String> = self.entries.keys().map(|n| format!("'{}'", n)).collect();
        format!(
            "(function () {{\n\
             \x20 var declared = [{}];\n\
             \x20 var missing = [];\n\
             \x20 for (var i = 0; i < declared.length; i++) {{\n\
             \x20   if (typeof globalThis[declared[i]] !== 'function') missing.push(declared[i]);\n\
             \x20 }}\n\
             \x20 if (missing.length > 0) throw new Error('{} ' + missing.join(','));\n\
             }})();\n",
            names.join(", "),
            MISSING_BUILTINS_MARKER
        )
    }
}

/// Extract the missing names from engine output produced by
/// [`BuiltinCatalog::probe_source`].
pub fn parse_missing(output: &str) -> Option<Vec<String>> {
    let start = output.find(MISSING_BUILTINS_MARKER)? + MISSING_BUILTINS_MARKER.len();
    let line = output[start..].lines().next().unwrap_or("");
    let names: Vec<String> = line
        .split(',')
        .map(|n| n.trim().to_string())
        .filter(|n| is_identifier(n))
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(names)
    }
}

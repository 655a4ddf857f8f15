//! Code scaffold wrapped around every generated candidate body.
//!
//! A [`ScaffoldTemplate`] is target-language source with `{{name}}`
//! insertion points. Rendering substitutes the oracle parameters and the
//! sentinel call, then checks that the prefix defines every helper the suffix
//! calls. The rendered [`Scaffold`] is immutable.

pub mod scan;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::differential::OracleParams;
use crate::error::ConfigError;
use crate::sentinel::SentinelProtocol;

const DEFAULT_PREFIX: &str = include_str!("prefix.js");
const DEFAULT_SUFFIX: &str = include_str!("suffix.js");

/// Globals of the language itself that a suffix may call without defining.
const LANGUAGE_GLOBALS: &[&str] = &[
    "Array", "BigInt", "Boolean", "Date", "Error", "Map", "Number", "Object", "Promise",
    "Proxy", "RangeError", "RegExp", "Set", "String", "Symbol", "TypeError", "WeakMap",
    "WeakSet", "eval", "isFinite", "isNaN", "parseFloat", "parseInt",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaffoldTemplate {
    pub prefix: String,
    pub suffix: String,
}

impl Default for ScaffoldTemplate {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            suffix: DEFAULT_SUFFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scaffold {
    prefix: String,
    suffix: String,
    definitions: BTreeSet<String>,
}

impl Scaffold {
    /// Render `template` and validate the result.
    ///
    /// `extra_globals` lists host functions the target provides beyond the
    /// language (the builtin catalog); the suffix may call those too.
    pub fn render(
        template: &ScaffoldTemplate,
        params: &OracleParams,
        sentinel: &SentinelProtocol,
        extra_globals: &BTreeSet<String>,
    ) -> Result<Self, ConfigError> {
        let bindings = bindings(params, sentinel)?;
        let prefix = substitute(&template.prefix, &bindings)?;
        let suffix = substitute(&template.suffix, &bindings)?;

        let definitions = scan::defined_names(&prefix);
        for required in [&params.comparator, &params.candidate] {
            if !definitions.contains(required) {
                return Err(ConfigError::MissingDefinition(required.clone()));
            }
        }

        for called in scan::called_names(&suffix) {
            let known = definitions.contains(&called)
                || called == sentinel.identifier
                || extra_globals.contains(&called)
                || LANGUAGE_GLOBALS.contains(&called.as_str());
            if !known {
                return Err(ConfigError::UndefinedHelper(called));
            }
        }

        Ok(Self {
            prefix,
            suffix,
            definitions,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Names the prefix binds at any level.
    pub fn definitions(&self) -> &BTreeSet<String> {
        &self.definitions
    }

    /// The complete program for one candidate body.
    pub fn wrap(&self, body: &str) -> String {
        let mut source =
            String::with_capacity(self.prefix.len() + body.len() + self.suffix.len() + 2);
        source.push_str(&self.prefix);
        source.push('\n');
        source.push_str(body);
        source.push('\n');
        source.push_str(&self.suffix);
        source
    }
}

fn bindings(
    params: &OracleParams,
    sentinel: &SentinelProtocol,
) -> Result<BTreeMap<&'static str, String>, ConfigError> {
    let mut map = BTreeMap::new();
    map.insert("candidate", params.candidate.clone());
    map.insert("parameter", params.parameter.clone());
    map.insert("comparator", params.comparator.clone());
    map.insert("truthy", params.truthy_probe.clone());
    map.insert("falsy", params.falsy_probe.clone());
    map.insert("warmup_probe", params.warmup_probe.clone());
    map.insert("warmup_iterations", params.warmup_iterations.to_string());
    map.insert("sentinel", sentinel.call(params.discriminant)?);
    Ok(map)
}

fn substitute(
    template: &str,
    bindings: &BTreeMap<&'static str, String>,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or(ConfigError::UnterminatedPlaceholder(offset + start))?;
        let name = after[..end].trim();
        let value = bindings
            .get(name)
            .ok_or_else(|| ConfigError::UnknownPlaceholder(name.to_string()))?;
        out.push_str(value);
        let consumed = start + 2 + end + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(template: &ScaffoldTemplate) -> Result<Scaffold, ConfigError> {
        Scaffold::render(
            template,
            &OracleParams::default(),
            &SentinelProtocol::default(),
            &BTreeSet::new(),
        )
    }

    #[test]
    fn test_default_template_renders() {
        let scaffold = render(&ScaffoldTemplate::default()).unwrap();
        assert!(scaffold.prefix().contains("function deepEquals(a, b)"));
        assert!(scaffold.prefix().trim_end().ends_with("function opt(opt_param) {"));
        assert!(scaffold.suffix().contains("i < 80"));
        assert!(scaffold.suffix().contains("fuzzilli('FUZZILLI_CRASH', 0);"));
        for helper in ["classOf", "deepObjectEquals", "deepEquals", "opt"] {
            assert!(scaffold.definitions().contains(helper), "missing {}", helper);
        }
    }

    #[test]
    fn test_wrap_places_body_inside_candidate() {
        let scaffold = render(&ScaffoldTemplate::default()).unwrap();
        let program = scaffold.wrap("return opt_param;");
        let body_at = program.find("return opt_param;").unwrap();
        let candidate_at = program.find("function opt(opt_param) {").unwrap();
        let driver_at = program.find("let jit_cold_truthy").unwrap();
        assert!(candidate_at < body_at && body_at < driver_at);
    }

    #[test]
    fn test_suffix_helper_must_be_defined() {
        let template = ScaffoldTemplate {
            suffix: "}\nif (!compareResults(1, 2)) { {{sentinel}}; }".to_string(),
            ..Default::default()
        };
        match render(&template) {
            Err(ConfigError::UndefinedHelper(name)) => assert_eq!(name, "compareResults"),
            other => panic!("expected undefined helper, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_prefix_must_define_comparator() {
        let template = ScaffoldTemplate {
            prefix: "function {{candidate}}({{parameter}}) {".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            render(&template),
            Err(ConfigError::MissingDefinition(name)) if name == "deepEquals"
        ));
    }

    #[test]
    fn test_placeholder_errors() {
        let unknown = ScaffoldTemplate {
            suffix: "} {{nope}}".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            render(&unknown),
            Err(ConfigError::UnknownPlaceholder(name)) if name == "nope"
        ));

        let open = ScaffoldTemplate {
            suffix: "} {{sentinel".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            render(&open),
            Err(ConfigError::UnterminatedPlaceholder(2))
        ));
    }

    #[test]
    fn test_catalog_globals_may_be_called_from_suffix() {
        let template = ScaffoldTemplate {
            suffix: "}\ngc();\n".to_string(),
            ..Default::default()
        };
        let globals: BTreeSet<String> = ["gc".to_string()].into_iter().collect();
        let rendered = Scaffold::render(
            &template,
            &OracleParams::default(),
            &SentinelProtocol::default(),
            &globals,
        );
        assert!(rendered.is_ok());
        assert!(render(&template).is_err());
    }
}

//! Target profiles.
//!
//! A [`TargetProfile`] is built once from a [`ProfileConfig`] (a JSON
//! document or one of the built-in profiles), validated as a whole, and then
//! shared read-only by every worker through an `Arc`.

mod builtin;

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::builtins::BuiltinCatalog;
use crate::differential::OracleParams;
use crate::error::ConfigError;
use crate::generators::GeneratorRegistry;
use crate::launch::LaunchDescriptor;
use crate::scaffold::{Scaffold, ScaffoldTemplate};
use crate::sentinel::SentinelProtocol;

pub use builtin::{builtin_names, spidermonkey, v8_isolate};

/// Language feature level the external generator may target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageVersion {
    Es5,
    #[default]
    Es6,
    Es2017,
    Es2020,
    Esnext,
}

impl fmt::Display for LanguageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LanguageVersion::Es5 => "es5",
            LanguageVersion::Es6 => "es6",
            LanguageVersion::Es2017 => "es2017",
            LanguageVersion::Es2020 => "es2020",
            LanguageVersion::Esnext => "esnext",
        };
        write!(f, "{}", s)
    }
}

/// Where a profile's programs run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// An engine shell binary started as a process.
    #[default]
    Shell,
    /// The V8 isolate embedded in this crate.
    Embedded,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Shell => write!(f, "an engine shell process"),
            EngineKind::Embedded => write!(f, "the embedded V8 isolate"),
        }
    }
}

/// Serialized form of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub name: String,
    #[serde(default)]
    pub engine: EngineKind,
    #[serde(default)]
    pub launch: LaunchDescriptor,
    #[serde(default)]
    pub scaffold: ScaffoldTemplate,
    #[serde(default)]
    pub oracle: OracleParams,
    #[serde(default)]
    pub language_version: LanguageVersion,
    #[serde(default)]
    pub sentinel: SentinelProtocol,
    #[serde(default)]
    pub crash_tests: Vec<String>,
    #[serde(default)]
    pub extensions: GeneratorRegistry,
    #[serde(default)]
    pub builtins: BuiltinCatalog,
}

#[derive(Debug)]
pub struct TargetProfile {
    config: ProfileConfig,
    scaffold: Scaffold,
}

impl TargetProfile {
    pub fn from_config(config: ProfileConfig) -> Result<Self, ConfigError> {
        config.launch.validate()?;
        config.oracle.validate()?;
        config.sentinel.validate()?;
        if config.crash_tests.is_empty() {
            return Err(ConfigError::EmptyCrashTests);
        }
        if let Some(i) = config.crash_tests.iter().position(|t| t.trim().is_empty()) {
            return Err(ConfigError::BlankCrashTest(i));
        }

        let scaffold = Scaffold::render(
            &config.scaffold,
            &config.oracle,
            &config.sentinel,
            &config.builtins.names(),
        )?;

        let mut reserved: BTreeSet<String> = scaffold.definitions().clone();
        reserved.insert(config.sentinel.identifier.clone());
        config.builtins.validate(&reserved)?;
        config.extensions.validate(&config.builtins)?;

        tracing::debug!(
            profile = %config.name,
            builtins = config.builtins.len(),
            generators = config.extensions.generators.len(),
            "profile validated"
        );
        Ok(Self { config, scaffold })
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Self::from_config(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// One of the built-in profiles.
    pub fn builtin(name: &str) -> Result<Self, ConfigError> {
        let config = match name {
            "spidermonkey" => spidermonkey(),
            "v8" => v8_isolate(),
            other => return Err(ConfigError::UnknownProfile(other.to_string())),
        };
        Self::from_config(config)
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn engine(&self) -> EngineKind {
        self.config.engine
    }

    /// Launch flags are engine specific, so a profile only runs on the kind
    /// of engine it was written for.
    pub fn check_engine(&self, selected: EngineKind) -> Result<(), ConfigError> {
        if selected != self.config.engine {
            return Err(ConfigError::EngineMismatch {
                profile: self.config.name.clone(),
                expected: self.config.engine.to_string(),
                actual: selected.to_string(),
            });
        }
        Ok(())
    }

    pub fn launch(&self) -> &LaunchDescriptor {
        &self.config.launch
    }

    pub fn scaffold(&self) -> &Scaffold {
        &self.scaffold
    }

    pub fn oracle_params(&self) -> &OracleParams {
        &self.config.oracle
    }

    pub fn language_version(&self) -> LanguageVersion {
        self.config.language_version
    }

    pub fn sentinel(&self) -> &SentinelProtocol {
        &self.config.sentinel
    }

    pub fn crash_tests(&self) -> &[String] {
        &self.config.crash_tests
    }

    pub fn extensions(&self) -> &GeneratorRegistry {
        &self.config.extensions
    }

    pub fn builtins(&self) -> &BuiltinCatalog {
        &self.config.builtins
    }

    pub fn config(&self) -> &ProfileConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::{JsType, Signature};
    use crate::generators::{GeneratorStrategy, WeightedList};

    #[test]
    fn test_builtin_profiles_validate() {
        for name in builtin_names() {
            let profile = TargetProfile::builtin(name).unwrap();
            assert_eq!(profile.name(), *name);
            assert!(!profile.crash_tests().is_empty());
        }
    }

    #[test]
    fn test_spidermonkey_profile_matches_engine_setup() {
        let profile = TargetProfile::builtin("spidermonkey").unwrap();
        let args = &profile.launch().arguments;
        assert!(args.contains(&"--no-threads".to_string()));
        assert!(args.contains(&"--ion-offthread-compile=off".to_string()));
        assert_eq!(profile.launch().environment["UBSAN_OPTIONS"], "handle_segv=0");
        assert_eq!(profile.language_version(), LanguageVersion::Es6);
        assert_eq!(profile.crash_tests().len(), 3);
        assert!(profile.builtins().is_empty());
    }

    #[test]
    fn test_v8_profile_tiers_up_within_warmup() {
        let profile = TargetProfile::builtin("v8").unwrap();
        assert_eq!(profile.engine(), EngineKind::Embedded);
        let warmup = profile.oracle_params().warmup_iterations;
        for flag in ["--invocation-count-for-maglev=", "--invocation-count-for-turbofan="] {
            let threshold: u32 = profile
                .launch()
                .arguments
                .iter()
                .find_map(|arg| arg.strip_prefix(flag))
                .unwrap_or_else(|| panic!("missing {}", flag))
                .parse()
                .unwrap();
            assert!(threshold < warmup, "{}{} is not below {}", flag, threshold, warmup);
        }
    }

    #[test]
    fn test_engine_kind_must_match() {
        let v8 = TargetProfile::builtin("v8").unwrap();
        assert!(v8.check_engine(EngineKind::Embedded).is_ok());
        assert!(matches!(
            v8.check_engine(EngineKind::Shell),
            Err(ConfigError::EngineMismatch { .. })
        ));
        let spidermonkey = TargetProfile::builtin("spidermonkey").unwrap();
        assert_eq!(spidermonkey.engine(), EngineKind::Shell);
        assert!(spidermonkey.check_engine(EngineKind::Embedded).is_err());
    }

    #[test]
    fn test_unknown_profile() {
        assert!(matches!(
            TargetProfile::builtin("chakra"),
            Err(ConfigError::UnknownProfile(_))
        ));
    }

    #[test]
    fn test_empty_crash_tests_rejected() {
        let mut config = spidermonkey();
        config.crash_tests.clear();
        assert!(matches!(
            TargetProfile::from_config(config),
            Err(ConfigError::EmptyCrashTests)
        ));
    }

    #[test]
    fn test_blank_crash_test_rejected() {
        let mut config = spidermonkey();
        config.crash_tests.push("   ".to_string());
        assert!(matches!(
            TargetProfile::from_config(config),
            Err(ConfigError::BlankCrashTest(3))
        ));
    }

    #[test]
    fn test_entry_point_argument_rejected() {
        let mut config = spidermonkey();
        config.launch.arguments.push("/tmp/program.js".to_string());
        assert!(matches!(
            TargetProfile::from_config(config),
            Err(ConfigError::EntryPointArgument(_))
        ));
    }

    #[test]
    fn test_builtin_shadowing_scaffold_helper_rejected() {
        let mut config = spidermonkey();
        config.builtins = BuiltinCatalog::new().with("deepEquals", Signature::new(vec![], JsType::Boolean));
        assert!(matches!(
            TargetProfile::from_config(config),
            Err(ConfigError::ReservedBuiltin(name)) if name == "deepEquals"
        ));
    }

    #[test]
    fn test_generator_must_reference_catalog() {
        let mut config = spidermonkey();
        config.extensions.generators =
            WeightedList::new().with(GeneratorStrategy::BuiltinCall { builtin: "gc".into() }, 3);
        assert!(TargetProfile::from_config(config.clone()).is_err());

        config.builtins = BuiltinCatalog::new().with("gc", Signature::new(vec![], JsType::Undefined));
        assert!(TargetProfile::from_config(config).is_ok());
    }

    #[test]
    fn test_json_round_trip_of_builtin() {
        let config = v8_isolate();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let profile = TargetProfile::from_json(&json).unwrap();
        assert_eq!(profile.config(), &config);
    }

    #[test]
    fn test_minimal_json_profile_uses_defaults() {
        let json = r#"{
            "name": "minimal",
            "launch": { "arguments": ["--no-threads"] },
            "crash_tests": ["fuzzilli('FUZZILLI_CRASH', 0)"]
        }"#;
        let profile = TargetProfile::from_json(json).unwrap();
        assert_eq!(profile.oracle_params().warmup_iterations, 0x50);
        assert!(profile.scaffold().suffix().contains("fuzzilli('FUZZILLI_CRASH', 0)"));
        assert!(profile.extensions().generators.is_empty());
    }
}

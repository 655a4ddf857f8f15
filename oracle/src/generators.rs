//! Generator and program-template extensions registered for a target.
//!
//! Strategies are tagged variants resolved when the profile is built. The
//! external generator owns the actual synthesis; this module stores the
//! strategies, their selection weights, and the generic generators the
//! target disables.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::builtins::BuiltinCatalog;
use crate::error::ConfigError;

/// Iteration count of the tier-forcing loop.
pub const FORCE_OPTIMIZATION_ITERATIONS: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weighted<T> {
    pub item: T,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightedList<T> {
    entries: Vec<Weighted<T>>,
}

impl<T> Default for WeightedList<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T: Identified> WeightedList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, item: T, weight: u32) -> Self {
        self.entries.push(Weighted { item, weight });
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for entry in &self.entries {
            if entry.weight == 0 {
                return Err(ConfigError::ZeroWeight(entry.item.id()));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Weighted<T>> {
        self.entries.iter()
    }

    pub fn total_weight(&self) -> u64 {
        self.entries.iter().map(|e| u64::from(e.weight)).sum()
    }

    /// Select an entry with probability proportional to its weight, given a
    /// uniformly distributed `roll` from the caller's random source.
    pub fn pick(&self, roll: u64) -> Option<&T> {
        let total = self.total_weight();
        if total == 0 {
            return None;
        }
        let mut target = roll % total;
        for entry in &self.entries {
            let weight = u64::from(entry.weight);
            if target < weight {
                return Some(&entry.item);
            }
            target -= weight;
        }
        None
    }

    pub fn shares(&self) -> Vec<WeightShare> {
        let total = self.total_weight() as f64;
        self.entries
            .iter()
            .map(|e| WeightShare {
                id: e.item.id(),
                weight: e.weight,
                share: if total > 0.0 { f64::from(e.weight) / total } else { 0.0 },
            })
            .collect()
    }
}

/// Stable identifier used in reports and in the disabled set.
pub trait Identified {
    fn id(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightShare {
    pub id: String,
    pub weight: u32,
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneratorStrategy {
    /// Call a function in a loop until the engine tiers it up.
    ForceOptimization {
        #[serde(default = "default_force_iterations")]
        iterations: u32,
    },
    /// Call one of the target's catalog builtins.
    BuiltinCall { builtin: String },
    /// Strategy implemented entirely by the external generator.
    External { id: String },
}

fn default_force_iterations() -> u32 {
    FORCE_OPTIMIZATION_ITERATIONS
}

impl Identified for GeneratorStrategy {
    fn id(&self) -> String {
        match self {
            GeneratorStrategy::ForceOptimization { .. } => "ForceOptimizationGenerator".to_string(),
            GeneratorStrategy::BuiltinCall { builtin } => format!("BuiltinCall({})", builtin),
            GeneratorStrategy::External { id } => id.clone(),
        }
    }
}

impl GeneratorStrategy {
    /// Source emitted for `function` called with `arguments`, or `None` for
    /// strategies the external generator renders itself.
    pub fn emit(&self, function: &str, arguments: &[&str]) -> Option<String> {
        match self {
            GeneratorStrategy::ForceOptimization { iterations } => Some(format!(
                "for (let i = 0; i < {}; i++) {{ {}({}); }}",
                iterations,
                function,
                arguments.join(", ")
            )),
            GeneratorStrategy::BuiltinCall { builtin } => {
                Some(format!("{}({});", builtin, arguments.join(", ")))
            }
            GeneratorStrategy::External { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgramTemplate {
    /// A single-argument candidate body for the differential scaffold.
    DifferentialFunction,
    External { id: String },
}

impl Identified for ProgramTemplate {
    fn id(&self) -> String {
        match self {
            ProgramTemplate::DifferentialFunction => "DifferentialFunction".to_string(),
            ProgramTemplate::External { id } => id.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorRegistry {
    #[serde(default)]
    pub generators: WeightedList<GeneratorStrategy>,
    #[serde(default)]
    pub templates: WeightedList<ProgramTemplate>,
    #[serde(default)]
    pub disabled: BTreeSet<String>,
}

impl GeneratorRegistry {
    pub fn validate(&self, catalog: &BuiltinCatalog) -> Result<(), ConfigError> {
        self.generators.validate()?;
        self.templates.validate()?;

        for entry in self.generators.iter() {
            if let GeneratorStrategy::ForceOptimization { iterations: 0 } = &entry.item {
                return Err(ConfigError::ZeroIterations(entry.item.id()));
            }
            if let GeneratorStrategy::BuiltinCall { builtin } = &entry.item {
                if !catalog.contains(builtin) {
                    return Err(ConfigError::UnknownBuiltinReference {
                        generator: entry.item.id(),
                        builtin: builtin.clone(),
                    });
                }
            }
            if self.disabled.contains(&entry.item.id()) {
                return Err(ConfigError::ConflictingGenerator(entry.item.id()));
            }
        }

        if self.disabled.iter().any(|id| id.trim().is_empty()) {
            return Err(ConfigError::EmptyGeneratorId);
        }
        Ok(())
    }

    pub fn is_disabled(&self, id: &str) -> bool {
        self.disabled.contains(id)
    }

    pub fn report(&self) -> RegistryReport {
        RegistryReport {
            generators: self.generators.shares(),
            templates: self.templates.shares(),
            disabled: self.disabled.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryReport {
    pub generators: Vec<WeightShare>,
    pub templates: Vec<WeightShare>,
    pub disabled: Vec<String>,
}

impl fmt::Display for RegistryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, shares) in [("generator", &self.generators), ("template", &self.templates)] {
            for share in shares {
                writeln!(
                    f,
                    "{} {} weight={} share={:.2}",
                    label, share.id, share.weight, share.share
                )?;
            }
        }
        for id in &self.disabled {
            writeln!(f, "disabled {}", id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::{JsType, Signature};

    #[test]
    fn test_pick_follows_weights() {
        let list = WeightedList::new()
            .with(GeneratorStrategy::External { id: "a".into() }, 1)
            .with(GeneratorStrategy::External { id: "b".into() }, 3);
        assert_eq!(list.total_weight(), 4);
        let picks: Vec<String> = (0..4).map(|r| list.pick(r).unwrap().id()).collect();
        assert_eq!(picks, vec!["a", "b", "b", "b"]);
        assert_eq!(list.pick(4).unwrap().id(), "a");
    }

    #[test]
    fn test_empty_list_picks_nothing() {
        let list: WeightedList<ProgramTemplate> = WeightedList::new();
        assert!(list.pick(7).is_none());
        assert!(list.shares().is_empty());
    }

    #[test]
    fn test_zero_weight_rejected() {
        let list = WeightedList::new().with(ProgramTemplate::DifferentialFunction, 0);
        assert!(matches!(list.validate(), Err(ConfigError::ZeroWeight(id)) if id == "DifferentialFunction"));
    }

    #[test]
    fn test_force_optimization_emits_loop() {
        let strategy = GeneratorStrategy::ForceOptimization { iterations: 100 };
        assert_eq!(
            strategy.emit("f", &["v1", "v2"]).unwrap(),
            "for (let i = 0; i < 100; i++) { f(v1, v2); }"
        );
        assert!(GeneratorStrategy::External { id: "x".into() }.emit("f", &[]).is_none());
    }

    #[test]
    fn test_registry_validation() {
        let catalog = BuiltinCatalog::new().with("gc", Signature::new(vec![], JsType::Undefined));

        let unknown = GeneratorRegistry {
            generators: WeightedList::new().with(GeneratorStrategy::BuiltinCall { builtin: "bailout".into() }, 5),
            ..Default::default()
        };
        assert!(matches!(
            unknown.validate(&catalog),
            Err(ConfigError::UnknownBuiltinReference { .. })
        ));

        let conflicting = GeneratorRegistry {
            generators: WeightedList::new().with(GeneratorStrategy::External { id: "WithStatement".into() }, 5),
            disabled: ["WithStatement".to_string()].into_iter().collect(),
            ..Default::default()
        };
        assert!(matches!(
            conflicting.validate(&catalog),
            Err(ConfigError::ConflictingGenerator(_))
        ));

        let idle = GeneratorRegistry {
            generators: WeightedList::new().with(GeneratorStrategy::ForceOptimization { iterations: 0 }, 1),
            ..Default::default()
        };
        assert!(matches!(
            idle.validate(&catalog),
            Err(ConfigError::ZeroIterations(id)) if id == "ForceOptimizationGenerator"
        ));

        let ok = GeneratorRegistry {
            generators: WeightedList::new()
                .with(GeneratorStrategy::BuiltinCall { builtin: "gc".into() }, 5)
                .with(GeneratorStrategy::ForceOptimization { iterations: 100 }, 10),
            disabled: ["WithStatement".to_string()].into_iter().collect(),
            ..Default::default()
        };
        assert!(ok.validate(&catalog).is_ok());
        assert!(ok.is_disabled("WithStatement"));
        let report = ok.report();
        assert_eq!(report.generators.len(), 2);
        assert!((report.generators[1].share - 10.0 / 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_strategy_json_shape() {
        let json = r#"[{"item": {"kind": "force_optimization"}, "weight": 10}]"#;
        let list: WeightedList<GeneratorStrategy> = serde_json::from_str(json).unwrap();
        let entry = list.iter().next().unwrap();
        assert_eq!(entry.item, GeneratorStrategy::ForceOptimization { iterations: 100 });
        assert_eq!(entry.weight, 10);
    }
}

use crate::builtins::{BuiltinCatalog, JsType, Parameter, Signature};
use crate::differential::OracleParams;
use crate::generators::{GeneratorRegistry, GeneratorStrategy, WeightedList, FORCE_OPTIMIZATION_ITERATIONS};
use crate::launch::LaunchDescriptor;
use crate::scaffold::ScaffoldTemplate;
use crate::sentinel::SentinelProtocol;

use super::{EngineKind, LanguageVersion, ProfileConfig};

pub fn builtin_names() -> &'static [&'static str] {
    &["spidermonkey", "v8"]
}

/// SpiderMonkey `js` shell built with fuzzing support.
pub fn spidermonkey() -> ProfileConfig {
    let sentinel = SentinelProtocol::default();
    ProfileConfig {
        name: "spidermonkey".to_string(),
        engine: EngineKind::Shell,
        launch: LaunchDescriptor::new([
            "--no-threads",
            "--cpu-count=1",
            "--ion-offthread-compile=off",
            "--baseline-warmup-threshold=10",
            "--ion-warmup-threshold=50",
            "--ion-check-range-analysis",
            "--ion-extra-checks",
            "--fuzzing-safe",
        ])
        .with_env("UBSAN_OPTIONS", "handle_segv=0"),
        scaffold: ScaffoldTemplate::default(),
        oracle: OracleParams::default(),
        language_version: LanguageVersion::Es6,
        crash_tests: sentinel.crash_tests(),
        sentinel,
        extensions: GeneratorRegistry::default(),
        builtins: BuiltinCatalog::new(),
    }
}

/// The V8 isolate embedded in this crate.
pub fn v8_isolate() -> ProfileConfig {
    let sentinel = SentinelProtocol::default();
    let nullary = Signature::new(vec![], JsType::Undefined);
    let job = JsType::Function(Box::new(Signature::new(vec![], JsType::Anything)));
    ProfileConfig {
        name: "v8".to_string(),
        engine: EngineKind::Embedded,
        // Tier-up thresholds sit well below the scaffold's warm-up count.
        launch: LaunchDescriptor::new([
            "--single-threaded",
            "--no-lazy-feedback-allocation",
            "--jit-fuzzing",
            "--invocation-count-for-maglev=10",
            "--invocation-count-for-turbofan=20",
            "--minimum-invocations-after-ic-update=5",
        ]),
        scaffold: ScaffoldTemplate::default(),
        oracle: OracleParams::default(),
        language_version: LanguageVersion::Es2020,
        crash_tests: sentinel.crash_tests(),
        sentinel,
        extensions: GeneratorRegistry {
            generators: WeightedList::new().with(
                GeneratorStrategy::ForceOptimization {
                    iterations: FORCE_OPTIMIZATION_ITERATIONS,
                },
                10,
            ),
            ..Default::default()
        },
        builtins: BuiltinCatalog::new()
            .with("drainJobQueue", nullary)
            .with(
                "enqueueJob",
                Signature::new(vec![Parameter::Plain(job)], JsType::Undefined),
            )
            .with(
                "print",
                Signature::new(vec![Parameter::Rest(JsType::Anything)], JsType::Undefined),
            ),
    }
}

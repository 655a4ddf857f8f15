//! Host-driven oracle over a candidate compiled into a long-lived isolate.

use std::sync::Once;
use std::time::{Duration, Instant};

use oracle::differential::{
    DifferentialOracle, InconclusiveReason, OracleParams, Probe, TieredFunction, Verdict,
};
use oracle::sentinel::SentinelProtocol;
use oracle::{initialize_v8, IsolateFunction, TargetProfile, Value};

static INIT: Once = Once::new();

fn setup() {
    INIT.call_once(|| {
        let profile = TargetProfile::builtin("v8").unwrap();
        initialize_v8(&profile.launch().flag_string());
    });
}

fn verdict(body: &str, oracle: DifferentialOracle) -> Verdict {
    setup();
    let mut function =
        IsolateFunction::define(body, oracle.params(), &SentinelProtocol::default()).unwrap();
    oracle.run(&mut function)
}

fn default_oracle() -> DifferentialOracle {
    DifferentialOracle::new(OracleParams::default())
}

#[test]
fn test_branching_candidate_is_consistent() {
    let body = "return opt_param ? {a: [1, 2], b: 'x'} : {a: [], b: 'y'};";
    assert!(matches!(verdict(body, default_oracle()), Verdict::Consistent));
}

#[test]
fn test_constant_candidate_gives_no_signal() {
    assert!(matches!(verdict("return NaN;", default_oracle()), Verdict::NoSignal));
}

#[test]
fn test_call_count_fault_is_divergent() {
    let body = r#"
        globalThis.calls = (globalThis.calls || 0) + 1;
        if (globalThis.calls > 50 && opt_param) return -0;
        return opt_param ? 0 : 1;
    "#;
    match verdict(body, default_oracle()) {
        Verdict::Divergent { cold, hot } => {
            assert_eq!(cold.to_string(), "0");
            assert_eq!(hot.to_string(), "-0");
        }
        other => panic!("expected divergence, got {}", other),
    }
}

#[test]
fn test_throwing_candidate_is_inconclusive() {
    let body = "if (!opt_param) throw new Error('falsy'); return 1;";
    assert!(matches!(
        verdict(body, default_oracle()),
        Verdict::Inconclusive(InconclusiveReason::Exception)
    ));
}

#[test]
fn test_slow_warmup_is_inconclusive() {
    let body = "if (!opt_param) { var end = Date.now() + 20; while (Date.now() < end) {} } return opt_param;";
    let oracle = default_oracle().with_warmup_budget(Duration::from_millis(100));
    assert!(matches!(
        verdict(body, oracle),
        Verdict::Inconclusive(InconclusiveReason::WarmupTimedOut)
    ));
}

#[test]
fn test_non_terminating_candidate_times_out() {
    let oracle = default_oracle().with_invoke_timeout(Duration::from_millis(100));
    assert!(matches!(
        verdict("while (true) {}", oracle),
        Verdict::Inconclusive(InconclusiveReason::TimedOut)
    ));
}

#[test]
fn test_returned_values_are_modelled() {
    setup();
    let params = OracleParams {
        truthy_probe: "[1, 'a']".to_string(),
        falsy_probe: "null".to_string(),
        ..Default::default()
    };
    let oracle = DifferentialOracle::new(params);
    let body = "return opt_param === null ? new Date(NaN) : {list: opt_param, re: /x/g, n: new Number(3)};";
    let mut function =
        IsolateFunction::define(body, oracle.params(), &SentinelProtocol::default()).unwrap();
    assert!(matches!(oracle.run(&mut function), Verdict::Consistent));

    let value = function
        .invoke(Probe::Truthy, Instant::now() + Duration::from_secs(1))
        .unwrap();
    match value {
        Value::Object { class, properties, .. } => {
            assert_eq!(class, "Object");
            assert_eq!(properties["list"].to_string(), "[1, \"a\"]");
            assert!(matches!(properties["re"], Value::RegExp(ref s) if s == "/x/g"));
        }
        other => panic!("expected object, got {}", other),
    }
}

#[test]
fn test_candidate_syntax_error() {
    setup();
    let result = IsolateFunction::define("return (;", &OracleParams::default(), &SentinelProtocol::default());
    assert!(result.is_err());
}

#[test]
fn test_oversized_array_is_inconclusive() {
    let body = "return opt_param ? new Array(0xffffffff) : [];";
    assert!(matches!(
        verdict(body, default_oracle()),
        Verdict::Inconclusive(InconclusiveReason::Exception)
    ));
}

#[test]
fn test_heap_exhaustion_is_inconclusive() {
    setup();
    let oracle = default_oracle();
    let body = "let a = []; while (true) a.push(new Array(10000).fill(a.length));";
    let mut function = IsolateFunction::define_with_heap_limit(
        body,
        oracle.params(),
        &SentinelProtocol::default(),
        32 * 1024 * 1024,
    )
    .unwrap();
    assert!(matches!(
        oracle.run(&mut function),
        Verdict::Inconclusive(InconclusiveReason::OutOfMemory)
    ));
}

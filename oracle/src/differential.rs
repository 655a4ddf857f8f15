//! Differential-compilation oracle.
//!
//! A candidate is run twice cold with opposite branch-biased arguments, then
//! warmed up until the engine promotes it to its optimizing tier, then run
//! hot with the first argument again. If the cold runs can tell the branches
//! apart but the hot run disagrees with the cold run on the same branch, the
//! optimizing tier has changed the observable result.
//!
//! The same protocol runs in two places: embedded in the scaffold suffix
//! (see [`crate::scaffold`]) and host-driven through [`DifferentialOracle`].

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::value::{deep_equals, Value};

pub const DEFAULT_WARMUP_ITERATIONS: u32 = 0x50;
pub const DEFAULT_WARMUP_BUDGET: Duration = Duration::from_secs(5);

/// Names and probes shared by the scaffold and the host-driven driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleParams {
    pub candidate: String,
    pub parameter: String,
    pub comparator: String,
    pub truthy_probe: String,
    pub falsy_probe: String,
    pub warmup_probe: String,
    pub warmup_iterations: u32,
    /// Sentinel discriminant emitted on divergence.
    pub discriminant: u32,
}

impl Default for OracleParams {
    fn default() -> Self {
        Self {
            candidate: "opt".to_string(),
            parameter: "opt_param".to_string(),
            comparator: "deepEquals".to_string(),
            truthy_probe: "true".to_string(),
            falsy_probe: "false".to_string(),
            warmup_probe: "false".to_string(),
            warmup_iterations: DEFAULT_WARMUP_ITERATIONS,
            discriminant: 0,
        }
    }
}

impl OracleParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for name in [&self.candidate, &self.parameter, &self.comparator] {
            if !crate::builtins::is_identifier(name) {
                return Err(ConfigError::InvalidIdentifier(name.clone()));
            }
        }
        if self.candidate == self.comparator {
            return Err(ConfigError::InvalidOracleParams(
                "candidate and comparator must have different names".to_string(),
            ));
        }
        for probe in [&self.truthy_probe, &self.falsy_probe, &self.warmup_probe] {
            if probe.trim().is_empty() {
                return Err(ConfigError::InvalidOracleParams(
                    "probe expressions must not be empty".to_string(),
                ));
            }
        }
        if self.truthy_probe == self.falsy_probe {
            return Err(ConfigError::InvalidOracleParams(
                "truthy and falsy probes must differ".to_string(),
            ));
        }
        if self.warmup_iterations == 0 {
            return Err(ConfigError::InvalidOracleParams(
                "warm-up needs at least one iteration".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which argument a single invocation receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Truthy,
    Falsy,
    Warmup,
}

impl Probe {
    pub fn expression(self, params: &OracleParams) -> &str {
        match self {
            Probe::Truthy => &params.truthy_probe,
            Probe::Falsy => &params.falsy_probe,
            Probe::Warmup => &params.warmup_probe,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// The candidate threw; the message is informational only.
    Threw(String),
    /// The invocation did not finish before its deadline.
    TimedOut,
    /// The isolate reached its heap limit.
    OutOfMemory,
    /// The engine itself failed.
    Engine(String),
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokeError::Threw(msg) => write!(f, "candidate threw: {}", msg),
            InvokeError::TimedOut => write!(f, "invocation timed out"),
            InvokeError::OutOfMemory => write!(f, "heap limit reached"),
            InvokeError::Engine(msg) => write!(f, "engine failure: {}", msg),
        }
    }
}

/// A single-argument candidate that can be invoked repeatedly in one engine.
pub trait TieredFunction {
    fn invoke(&mut self, probe: Probe, deadline: Instant) -> Result<Value, InvokeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InconclusiveReason {
    Exception,
    TimedOut,
    WarmupTimedOut,
    OutOfMemory,
    TransportFailure,
}

impl fmt::Display for InconclusiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exception => write!(f, "exception"),
            Self::TimedOut => write!(f, "timed out"),
            Self::WarmupTimedOut => write!(f, "warm-up timed out"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::TransportFailure => write!(f, "transport failure"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "verdict", content = "detail", rename_all = "snake_case")]
pub enum Verdict {
    /// Both cold branches produced deep-equal results; nothing to compare.
    NoSignal,
    /// Hot and cold agree on the truthy branch.
    Consistent,
    /// The optimizing tier changed the truthy-branch result.
    Divergent { cold: Value, hot: Value },
    Inconclusive(InconclusiveReason),
}

impl Verdict {
    pub fn is_divergent(&self) -> bool {
        matches!(self, Verdict::Divergent { .. })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::NoSignal => write!(f, "no signal"),
            Verdict::Consistent => write!(f, "consistent"),
            Verdict::Divergent { cold, hot } => write!(f, "divergent: cold {} vs hot {}", cold, hot),
            Verdict::Inconclusive(reason) => write!(f, "inconclusive ({})", reason),
        }
    }
}

/// Compare the three observed results.
pub fn judge(cold_truthy: &Value, cold_falsy: &Value, hot_truthy: &Value) -> Verdict {
    if deep_equals(cold_truthy, cold_falsy) {
        return Verdict::NoSignal;
    }
    if !deep_equals(cold_truthy, hot_truthy) {
        return Verdict::Divergent {
            cold: cold_truthy.clone(),
            hot: hot_truthy.clone(),
        };
    }
    Verdict::Consistent
}

/// Host-driven oracle. Runs the protocol step by step from Rust.
#[derive(Debug, Clone)]
pub struct DifferentialOracle {
    params: OracleParams,
    warmup_budget: Duration,
    invoke_timeout: Duration,
}

impl DifferentialOracle {
    pub fn new(params: OracleParams) -> Self {
        Self {
            params,
            warmup_budget: DEFAULT_WARMUP_BUDGET,
            invoke_timeout: DEFAULT_WARMUP_BUDGET,
        }
    }

    /// Wall-clock budget for the whole warm-up loop.
    pub fn with_warmup_budget(mut self, budget: Duration) -> Self {
        self.warmup_budget = budget;
        self
    }

    /// Deadline for each cold and hot invocation.
    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = timeout;
        self
    }

    pub fn params(&self) -> &OracleParams {
        &self.params
    }

    pub fn run<F: TieredFunction>(&self, function: &mut F) -> Verdict {
        match self.observe(function) {
            Ok((cold_truthy, cold_falsy, hot_truthy)) => {
                let verdict = judge(&cold_truthy, &cold_falsy, &hot_truthy);
                if verdict.is_divergent() {
                    tracing::warn!(%verdict, "optimizing tier diverged from cold execution");
                } else {
                    tracing::debug!(%verdict, "oracle finished");
                }
                verdict
            }
            Err(reason) => {
                tracing::debug!(%reason, "oracle run inconclusive");
                Verdict::Inconclusive(reason)
            }
        }
    }

    fn observe<F: TieredFunction>(
        &self,
        function: &mut F,
    ) -> Result<(Value, Value, Value), InconclusiveReason> {
        let cold_truthy = self.invoke_once(function, Probe::Truthy)?;
        let cold_falsy = self.invoke_once(function, Probe::Falsy)?;

        let warmup_deadline = Instant::now() + self.warmup_budget;
        for _ in 0..self.params.warmup_iterations {
            if Instant::now() >= warmup_deadline {
                return Err(InconclusiveReason::WarmupTimedOut);
            }
            match function.invoke(Probe::Warmup, warmup_deadline) {
                Ok(_) => {}
                Err(InvokeError::TimedOut) => return Err(InconclusiveReason::WarmupTimedOut),
                Err(e) => return Err(reason_for(&e)),
            }
        }

        let hot_truthy = self.invoke_once(function, Probe::Truthy)?;
        Ok((cold_truthy, cold_falsy, hot_truthy))
    }

    fn invoke_once<F: TieredFunction>(
        &self,
        function: &mut F,
        probe: Probe,
    ) -> Result<Value, InconclusiveReason> {
        function
            .invoke(probe, Instant::now() + self.invoke_timeout)
            .map_err(|e| reason_for(&e))
    }
}

fn reason_for(error: &InvokeError) -> InconclusiveReason {
    match error {
        InvokeError::Threw(_) => InconclusiveReason::Exception,
        InvokeError::TimedOut => InconclusiveReason::TimedOut,
        InvokeError::OutOfMemory => InconclusiveReason::OutOfMemory,
        InvokeError::Engine(_) => InconclusiveReason::TransportFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// Candidate modelled in Rust: `tag(arg)` cold, with an optional broken
    /// optimizer that flips the truthy result once warmed up.
    struct SimulatedTiering {
        calls: u32,
        tier_up_after: u32,
        broken_optimizer: bool,
    }

    impl SimulatedTiering {
        fn new(broken_optimizer: bool) -> Self {
            Self {
                calls: 0,
                tier_up_after: 50,
                broken_optimizer,
            }
        }
    }

    impl TieredFunction for SimulatedTiering {
        fn invoke(&mut self, probe: Probe, _deadline: Instant) -> Result<Value, InvokeError> {
            self.calls += 1;
            let truthy = probe == Probe::Truthy;
            let optimized = self.calls > self.tier_up_after;
            let branch = if optimized && self.broken_optimizer { !truthy } else { truthy };
            Ok(Value::String(if branch { "truthy" } else { "falsy" }.to_string()))
        }
    }

    struct Constant;

    impl TieredFunction for Constant {
        fn invoke(&mut self, _probe: Probe, _deadline: Instant) -> Result<Value, InvokeError> {
            Ok(Value::Number(1.0))
        }
    }

    struct Throws;

    impl TieredFunction for Throws {
        fn invoke(&mut self, _probe: Probe, _deadline: Instant) -> Result<Value, InvokeError> {
            Err(InvokeError::Threw("TypeError".to_string()))
        }
    }

    struct SlowWarmup;

    impl TieredFunction for SlowWarmup {
        fn invoke(&mut self, probe: Probe, _deadline: Instant) -> Result<Value, InvokeError> {
            if probe == Probe::Warmup {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(Value::Bool(probe == Probe::Truthy))
        }
    }

    #[test]
    fn test_judge_no_signal_when_branches_agree() {
        let v = Value::Number(1.0);
        assert!(matches!(judge(&v, &v, &Value::Number(2.0)), Verdict::NoSignal));
    }

    #[test]
    fn test_judge_divergent_and_consistent() {
        let t = Value::Bool(true);
        let f = Value::Bool(false);
        assert!(matches!(judge(&t, &f, &t), Verdict::Consistent));
        assert!(judge(&t, &f, &f).is_divergent());
    }

    #[test]
    fn test_judge_signed_zero_divergence() {
        let verdict = judge(&Value::Number(0.0), &Value::Number(1.0), &Value::Number(-0.0));
        assert!(verdict.is_divergent());
    }

    #[test]
    fn test_correct_tiering_is_consistent() {
        let oracle = DifferentialOracle::new(OracleParams::default());
        let mut candidate = SimulatedTiering::new(false);
        assert!(matches!(oracle.run(&mut candidate), Verdict::Consistent));
        assert_eq!(candidate.calls, 3 + DEFAULT_WARMUP_ITERATIONS);
    }

    #[test]
    fn test_broken_optimizer_is_divergent() {
        let oracle = DifferentialOracle::new(OracleParams::default());
        let verdict = oracle.run(&mut SimulatedTiering::new(true));
        match verdict {
            Verdict::Divergent { cold, hot } => {
                assert!(deep_equals(&cold, &Value::String("truthy".into())));
                assert!(deep_equals(&hot, &Value::String("falsy".into())));
            }
            other => panic!("expected divergence, got {}", other),
        }
    }

    #[test]
    fn test_constant_function_never_signals() {
        let oracle = DifferentialOracle::new(OracleParams::default());
        assert!(matches!(oracle.run(&mut Constant), Verdict::NoSignal));
    }

    #[test]
    fn test_exception_is_inconclusive_not_mismatch() {
        let oracle = DifferentialOracle::new(OracleParams::default());
        assert!(matches!(
            oracle.run(&mut Throws),
            Verdict::Inconclusive(InconclusiveReason::Exception)
        ));
    }

    #[test]
    fn test_warmup_budget_exceeded_is_inconclusive() {
        let oracle = DifferentialOracle::new(OracleParams::default())
            .with_warmup_budget(Duration::from_millis(1));
        assert!(matches!(
            oracle.run(&mut SlowWarmup),
            Verdict::Inconclusive(InconclusiveReason::WarmupTimedOut)
        ));
    }

    #[test]
    fn test_last_warmup_call_may_finish_past_budget() {
        struct LateFinish;

        impl TieredFunction for LateFinish {
            fn invoke(&mut self, probe: Probe, _deadline: Instant) -> Result<Value, InvokeError> {
                if probe == Probe::Warmup {
                    thread::sleep(Duration::from_millis(40));
                }
                Ok(Value::Bool(probe == Probe::Truthy))
            }
        }

        let params = OracleParams {
            warmup_iterations: 2,
            ..Default::default()
        };
        // The second call starts inside the budget and ends after it.
        let oracle = DifferentialOracle::new(params).with_warmup_budget(Duration::from_millis(60));
        assert!(matches!(oracle.run(&mut LateFinish), Verdict::Consistent));
    }

    #[test]
    fn test_params_validation() {
        assert!(OracleParams::default().validate().is_ok());
        let zero = OracleParams {
            warmup_iterations: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
        let same_probe = OracleParams {
            falsy_probe: "true".to_string(),
            ..Default::default()
        };
        assert!(same_probe.validate().is_err());
    }
}

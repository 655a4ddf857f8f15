//! JIT differential-compilation oracle.
//!
//! This library adapts a JavaScript engine for fuzzing its optimizing
//! compiler. A candidate function is called cold with a truthy and a falsy
//! argument, warmed up until the engine optimizes it, and then called hot
//! with the truthy argument again. If the hot result differs from the cold
//! one, the engine is made to crash deliberately through the crash-sentinel
//! protocol so that an ordinary crash-detecting fuzzer records the finding.
//!
//! # Features
//!
//! - Target profiles (launch flags, scaffold, crash tests, builtin catalog,
//!   generator extensions) validated once and shared read-only
//! - Scaffold rendering for in-engine oracles
//! - Host-driven oracle over an embedded V8 isolate
//! - Process and embedded-isolate transports with timeouts
//! - Startup self-test of the crash-detection path
//!
//! # Example: wrapping a candidate
//!
//! ```rust,no_run
//! use oracle::TargetProfile;
//!
//! let profile = TargetProfile::builtin("spidermonkey").unwrap();
//! let program = profile.scaffold().wrap("return opt_param ? [1, 2] : 'x';");
//! println!("{}", program);
//! ```

pub mod builtins;
pub mod classify;
pub mod differential;
pub mod engine;
pub mod error;
pub mod generators;
pub mod harness;
pub mod launch;
pub mod profile;
pub mod scaffold;
pub mod sentinel;
pub mod value;

// Re-export commonly used items
pub use classify::{classify, Finding, Outcome};
pub use differential::{judge, DifferentialOracle, InconclusiveReason, OracleParams, Verdict};
pub use engine::{initialize_v8, EngineProcess, ExecutionResult, ExitStatus, IsolateFunction, IsolateTransport, Transport};
pub use error::{ConfigError, HarnessError, TransportError};
pub use harness::Harness;
pub use profile::{EngineKind, ProfileConfig, TargetProfile};
pub use value::{deep_equals, Value};

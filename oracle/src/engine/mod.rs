//! Execution transports.
//!
//! A transport owns exactly one target (an engine process or an embedded
//! isolate) and runs complete programs on it. Workers never share one.

pub mod convert;
pub mod isolate;
pub mod process;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::TransportError;

pub use isolate::{initialize_v8, IsolateFunction, IsolateTransport, DEFAULT_HEAP_LIMIT};
pub use process::EngineProcess;

pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Exited(i32),
    Signaled(i32),
    /// The program invoked the crash-sentinel protocol in-process.
    Sentinel(u32),
    /// The harness stopped the target after its deadline.
    Killed,
    /// The embedded isolate reached its heap limit and was terminated.
    OutOfMemory,
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exited with code {}", code),
            ExitStatus::Signaled(signal) => write!(f, "terminated by signal {}", signal),
            ExitStatus::Sentinel(d) => write!(f, "crash sentinel {}", d),
            ExitStatus::Killed => write!(f, "killed"),
            ExitStatus::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn timed_out() -> Self {
        Self {
            status: ExitStatus::Killed,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
        }
    }
}

#[async_trait]
pub trait Transport: Send {
    /// Start the target. Idempotent while a target is live.
    async fn launch(&mut self) -> Result<(), TransportError>;

    /// Run one complete program.
    async fn execute(
        &mut self,
        source: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, TransportError>;

    /// Discard the current target state and start a fresh one.
    async fn restart(&mut self) -> Result<(), TransportError>;

    fn describe(&self) -> String;

    /// Whether a crash-sentinel call is distinguishable from any other crash
    /// on this target.
    fn observes_sentinel(&self) -> bool {
        true
    }
}

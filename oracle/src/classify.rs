//! Mapping from raw execution results to fuzzing outcomes.

use std::fmt;

use serde::Serialize;

use crate::differential::InconclusiveReason;
use crate::engine::{ExecutionResult, ExitStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// The scaffold reached the crash sentinel.
    Sentinel { discriminant: u32 },
    /// The engine died on a signal on its own.
    Crash { signal: i32 },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::Sentinel { discriminant } => write!(f, "crash sentinel {}", discriminant),
            Finding::Crash { signal } => write!(f, "engine crash (signal {})", signal),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Consistent,
    Inconclusive(InconclusiveReason),
    Confirmed(Finding),
}

impl Outcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Outcome::Confirmed(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Consistent => write!(f, "consistent"),
            Outcome::Inconclusive(reason) => write!(f, "inconclusive ({})", reason),
            Outcome::Confirmed(finding) => write!(f, "confirmed: {}", finding),
        }
    }
}

/// SIGKILL comes from outside the engine (the kernel OOM killer, an
/// operator), never from a miscompilation.
const SIGKILL: i32 = 9;

pub fn classify(result: &ExecutionResult) -> Outcome {
    if result.timed_out {
        return Outcome::Inconclusive(InconclusiveReason::TimedOut);
    }
    match result.status {
        ExitStatus::Sentinel(discriminant) => Outcome::Confirmed(Finding::Sentinel { discriminant }),
        ExitStatus::Signaled(SIGKILL) => Outcome::Inconclusive(InconclusiveReason::TransportFailure),
        ExitStatus::Signaled(signal) => Outcome::Confirmed(Finding::Crash { signal }),
        ExitStatus::Killed => Outcome::Inconclusive(InconclusiveReason::TimedOut),
        ExitStatus::OutOfMemory => Outcome::Inconclusive(InconclusiveReason::OutOfMemory),
        ExitStatus::Exited(0) => Outcome::Consistent,
        ExitStatus::Exited(_) => Outcome::Inconclusive(InconclusiveReason::Exception),
    }
}

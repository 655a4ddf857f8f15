//! Fuzzing harness: one transport, one shared profile.

use std::sync::Arc;
use std::time::Duration;

use crate::builtins::parse_missing;
use crate::classify::{classify, Finding, Outcome};
use crate::differential::InconclusiveReason;
use crate::engine::{ExitStatus, Transport, DEFAULT_EXECUTION_TIMEOUT};
use crate::error::{ConfigError, HarnessError, TransportError};
use crate::profile::TargetProfile;

pub struct Harness<T: Transport> {
    profile: Arc<TargetProfile>,
    transport: T,
    timeout: Duration,
}

impl<T: Transport> Harness<T> {
    pub fn new(profile: Arc<TargetProfile>, transport: T) -> Self {
        Self {
            profile,
            transport,
            timeout: DEFAULT_EXECUTION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn profile(&self) -> &TargetProfile {
        &self.profile
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Startup checks: the target implements the declared builtins and every
    /// crash test is detected.
    pub async fn preflight(&mut self) -> Result<(), HarnessError> {
        self.transport.launch().await?;
        self.probe_builtins().await?;
        self.self_test(1).await?;
        tracing::info!(
            profile = %self.profile.name(),
            target = %self.transport.describe(),
            "preflight passed"
        );
        Ok(())
    }

    pub async fn probe_builtins(&mut self) -> Result<(), HarnessError> {
        let catalog = self.profile.builtins();
        if catalog.is_empty() {
            return Ok(());
        }
        let probe = catalog.probe_source();

        self.transport.restart().await?;
        let result = self.transport.execute(&probe, self.timeout).await?;
        let output = format!("{}\n{}", result.stdout, result.stderr);
        if let Some(missing) = parse_missing(&output) {
            return Err(ConfigError::MissingBuiltins(missing).into());
        }
        if result.timed_out || result.status != ExitStatus::Exited(0) {
            return Err(TransportError::Engine(format!("builtin probe {}", result.status)).into());
        }
        tracing::debug!(builtins = catalog.len(), "builtin probe passed");
        Ok(())
    }

    /// Run every crash test on a freshly restarted target, `rounds` times.
    /// Each must be confirmed, identically in every round. Targets that can
    /// tell a sentinel call apart must report exactly that.
    pub async fn self_test(&mut self, rounds: u32) -> Result<Vec<Outcome>, HarnessError> {
        let profile = self.profile.clone();
        let require_sentinel = self.transport.observes_sentinel();
        if !require_sentinel {
            tracing::debug!(
                target = %self.transport.describe(),
                "sentinel calls are indistinguishable from crashes on this target"
            );
        }
        let mut baseline: Option<Vec<Outcome>> = None;

        for round in 0..rounds.max(1) {
            let mut outcomes = Vec::with_capacity(profile.crash_tests().len());
            for snippet in profile.crash_tests() {
                self.transport.restart().await?;
                let result = self.transport.execute(snippet, self.timeout).await?;
                let outcome = classify(&result);
                let detected = match outcome {
                    Outcome::Confirmed(Finding::Sentinel { .. }) => true,
                    Outcome::Confirmed(Finding::Crash { .. }) => !require_sentinel,
                    _ => false,
                };
                if !detected {
                    return Err(ConfigError::SelfTestFailed {
                        snippet: snippet.clone(),
                        outcome: outcome.to_string(),
                    }
                    .into());
                }
                outcomes.push(outcome);
            }

            if let Some(expected) = &baseline {
                let mismatch = expected.iter().zip(&outcomes).position(|(a, b)| a != b);
                if let Some(i) = mismatch {
                    return Err(ConfigError::NonDeterministicSelfTest(profile.crash_tests()[i].clone()).into());
                }
            } else {
                baseline = Some(outcomes);
            }
            tracing::debug!(round, "self-test round passed");
        }

        Ok(baseline.unwrap_or_default())
    }

    /// Wrap a candidate body in the scaffold and run it on a fresh target.
    pub async fn run(&mut self, body: &str) -> Outcome {
        let program = self.profile.scaffold().wrap(body);
        self.run_program(&program).await
    }

    /// Run a complete program on a fresh target.
    pub async fn run_program(&mut self, program: &str) -> Outcome {
        let result = match self.transport.restart().await {
            Ok(()) => self.transport.execute(program, self.timeout).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(result) => {
                let outcome = classify(&result);
                if outcome.is_confirmed() {
                    tracing::warn!(%outcome, target = %self.transport.describe(), "finding confirmed");
                } else {
                    tracing::debug!(%outcome, "program finished");
                }
                outcome
            }
            Err(e) => {
                tracing::warn!(error = %e, "transport failed, restarting target");
                if let Err(e) = self.transport.restart().await {
                    tracing::error!(error = %e, "target restart failed");
                }
                Outcome::Inconclusive(InconclusiveReason::TransportFailure)
            }
        }
    }
}

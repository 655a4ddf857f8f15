//! External engine process fed through stdin.
//!
//! Each execution consumes the child: the program is written to stdin, stdin
//! is closed, and the child runs to completion. The next execution (or an
//! explicit restart) spawns a fresh process, which resets all engine state.
//! A crash whose stderr carries the sentinel marker is reported as a
//! sentinel call rather than a plain signal.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use super::{ExecutionResult, ExitStatus, Transport};
use crate::error::TransportError;
use crate::launch::LaunchDescriptor;
use crate::sentinel::SentinelProtocol;

pub struct EngineProcess {
    program: PathBuf,
    descriptor: LaunchDescriptor,
    sentinel: SentinelProtocol,
    child: Option<Child>,
    launches: u64,
}

impl EngineProcess {
    pub fn new(program: impl Into<PathBuf>, descriptor: LaunchDescriptor) -> Self {
        Self {
            program: program.into(),
            descriptor,
            sentinel: SentinelProtocol::default(),
            child: None,
            launches: 0,
        }
    }

    pub fn with_sentinel(mut self, sentinel: SentinelProtocol) -> Self {
        self.sentinel = sentinel;
        self
    }

    /// Number of processes spawned so far.
    pub fn launches(&self) -> u64 {
        self.launches
    }

    fn spawn(&mut self) -> Result<Child, TransportError> {
        let child = Command::new(&self.program)
            .args(&self.descriptor.arguments)
            .envs(&self.descriptor.environment)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;
        self.launches += 1;
        tracing::debug!(program = %self.program.display(), pid = ?child.id(), "engine launched");
        Ok(child)
    }
}

#[async_trait]
impl Transport for EngineProcess {
    async fn launch(&mut self) -> Result<(), TransportError> {
        if self.child.is_none() {
            self.child = Some(self.spawn()?);
        }
        Ok(())
    }

    async fn execute(
        &mut self,
        source: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, TransportError> {
        let mut child = match self.child.take() {
            Some(child) => child,
            None => self.spawn()?,
        };
        let mut stdin = child.stdin.take().ok_or(TransportError::MissingPipe("stdin"))?;

        let run = async move {
            // A target that dies before reading everything closes the pipe early.
            if let Err(e) = stdin.write_all(source.as_bytes()).await {
                if e.kind() != ErrorKind::BrokenPipe {
                    return Err(e);
                }
            }
            drop(stdin);
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(timeout, run).await {
            Ok(output) => output?,
            Err(_) => {
                tracing::debug!(program = %self.program.display(), "engine timed out, killed");
                return Ok(ExecutionResult::timed_out());
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let status = exit_status(&output.status);
        let status = match self.sentinel.recognize(&stderr) {
            Some(discriminant) if status != ExitStatus::Exited(0) => ExitStatus::Sentinel(discriminant),
            _ => status,
        };
        Ok(ExecutionResult {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
            timed_out: false,
        })
    }

    async fn restart(&mut self) -> Result<(), TransportError> {
        if let Some(mut child) = self.child.take() {
            // Already exited children make kill fail; that is fine.
            let _ = child.kill().await;
        }
        self.child = Some(self.spawn()?);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("process {}", self.program.display())
    }

    fn observes_sentinel(&self) -> bool {
        self.sentinel.marker.is_some()
    }
}

#[cfg(unix)]
fn exit_status(status: &std::process::ExitStatus) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => ExitStatus::Exited(code),
        (None, Some(signal)) => ExitStatus::Signaled(signal),
        (None, None) => ExitStatus::Killed,
    }
}

#[cfg(not(unix))]
fn exit_status(status: &std::process::ExitStatus) -> ExitStatus {
    match status.code() {
        Some(code) => ExitStatus::Exited(code),
        None => ExitStatus::Killed,
    }
}

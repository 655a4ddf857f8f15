//! Crash-sentinel protocol: the single reserved call form a scaffold uses to
//! report a confirmed miscompilation.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Action name that asks the engine shell to print its argument.
pub const PRINT_ACTION: &str = "FUZZILLI_PRINT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelProtocol {
    /// Global function the engine exposes for the protocol.
    pub identifier: String,
    /// First argument selecting the crash action.
    pub action: String,
    /// Discriminants the engine maps to distinct crash flavours.
    pub discriminants: Vec<u32>,
    /// Text an external engine writes to stderr when the crash action fires.
    /// Without it a process target's sentinel looks like any other crash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
}

impl Default for SentinelProtocol {
    fn default() -> Self {
        Self {
            identifier: "fuzzilli".to_string(),
            action: "FUZZILLI_CRASH".to_string(),
            discriminants: vec![0, 1, 2],
            marker: None,
        }
    }
}

impl SentinelProtocol {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !crate::builtins::is_identifier(&self.identifier) {
            return Err(ConfigError::InvalidIdentifier(self.identifier.clone()));
        }
        if self.action.is_empty() || self.action.contains(['\'', '\\', '\n']) {
            return Err(ConfigError::InvalidIdentifier(self.action.clone()));
        }
        if self.discriminants.is_empty() {
            return Err(ConfigError::EmptyCrashTests);
        }
        if let Some(marker) = &self.marker {
            if marker.trim().is_empty() || marker.contains('\n') {
                return Err(ConfigError::InvalidSentinelMarker(marker.clone()));
            }
        }
        Ok(())
    }

    /// Discriminant of a sentinel call reported on an engine's stderr.
    ///
    /// Digits right after the marker select the discriminant. Engines that
    /// print the marker alone are attributed the first declared one.
    pub fn recognize(&self, stderr: &str) -> Option<u32> {
        let marker = self.marker.as_deref()?;
        let at = stderr.find(marker)?;
        let digits: String = stderr[at + marker.len()..]
            .trim_start_matches([' ', ':', '(', '#'])
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        match digits.parse() {
            Ok(discriminant) => Some(discriminant),
            Err(_) => self.discriminants.first().copied(),
        }
    }

    /// Render the call for `discriminant`, e.g. `fuzzilli('FUZZILLI_CRASH', 0)`.
    pub fn call(&self, discriminant: u32) -> Result<String, ConfigError> {
        if !self.discriminants.contains(&discriminant) {
            return Err(ConfigError::UnknownDiscriminant(discriminant));
        }
        Ok(format!(
            "{}('{}', {})",
            self.identifier, self.action, discriminant
        ))
    }

    /// One self-test snippet per declared discriminant.
    pub fn crash_tests(&self) -> Vec<String> {
        self.discriminants
            .iter()
            .map(|d| format!("{}('{}', {})", self.identifier, self.action, d))
            .collect()
    }

    pub fn is_crash_action(&self, action: &str) -> bool {
        action == self.action
    }
}

//! Launch descriptor: the arguments and environment a target engine process
//! starts with. Read by the execution transports, never mutated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Flags through which engine shells accept a script to run.
const ENTRY_POINT_FLAGS: &[&str] = &["-f", "--file", "-e", "--execute", "-m", "--module"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchDescriptor {
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl LaunchDescriptor {
    pub fn new<I, S>(arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            arguments: arguments.into_iter().map(Into::into).collect(),
            environment: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.environment.insert(key.to_string(), value.to_string());
        self
    }

    /// Arguments must never name the program to run; the transport supplies it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for arg in &self.arguments {
            let flag = arg.split('=').next().unwrap_or(arg);
            let is_script = arg.ends_with(".js") || arg.ends_with(".mjs");
            if ENTRY_POINT_FLAGS.contains(&flag) || is_script {
                return Err(ConfigError::EntryPointArgument(arg.clone()));
            }
        }
        Ok(())
    }

    /// Arguments joined for V8's flag parser.
    pub fn flag_string(&self) -> String {
        self.arguments.join(" ")
    }
}

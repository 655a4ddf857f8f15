//! Error types shared across the crate.
//!
//! Configuration errors are fatal at startup and are never produced once a
//! fuzzing session runs. Transport errors belong to the execution layer and
//! are absorbed as inconclusive runs by the harness.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("launch argument '{0}' provides an entry point; code is supplied by the transport")]
    EntryPointArgument(String),
    #[error("profile declares no crash tests")]
    EmptyCrashTests,
    #[error("crash test {0} is blank")]
    BlankCrashTest(usize),
    #[error("sentinel marker '{0}' must be a non-blank single line")]
    InvalidSentinelMarker(String),
    #[error("generator '{0}' needs at least one iteration")]
    ZeroIterations(String),
    #[error("profile '{profile}' targets {expected}, but {actual} was selected")]
    EngineMismatch {
        profile: String,
        expected: String,
        actual: String,
    },
    #[error("scaffold placeholder '{{{{{0}}}}}' is unknown")]
    UnknownPlaceholder(String),
    #[error("scaffold has an unterminated placeholder at byte {0}")]
    UnterminatedPlaceholder(usize),
    #[error("scaffold suffix calls '{0}', which the prefix does not define")]
    UndefinedHelper(String),
    #[error("scaffold prefix does not define required function '{0}'")]
    MissingDefinition(String),
    #[error("'{0}' is not a valid identifier")]
    InvalidIdentifier(String),
    #[error("builtin '{0}' clashes with a name the scaffold or sentinel already uses")]
    ReservedBuiltin(String),
    #[error("builtin '{name}' has an invalid signature: {reason}")]
    InvalidSignature { name: String, reason: String },
    #[error("target does not implement declared builtins: {}", .0.join(", "))]
    MissingBuiltins(Vec<String>),
    #[error("weighted entry '{0}' must have a positive weight")]
    ZeroWeight(String),
    #[error("generator '{generator}' references unknown builtin '{builtin}'")]
    UnknownBuiltinReference { generator: String, builtin: String },
    #[error("generator '{0}' is both registered and disabled")]
    ConflictingGenerator(String),
    #[error("disabled generator identifiers must not be empty")]
    EmptyGeneratorId,
    #[error("sentinel discriminant {0} is not declared by the protocol")]
    UnknownDiscriminant(u32),
    #[error("invalid oracle parameter: {0}")]
    InvalidOracleParams(String),
    #[error("crash test `{snippet}` was classified as {outcome}, expected a confirmed finding")]
    SelfTestFailed { snippet: String, outcome: String },
    #[error("crash test `{0}` classified differently across self-test rounds")]
    NonDeterministicSelfTest(String),
    #[error("unknown built-in profile '{0}'")]
    UnknownProfile(String),
    #[error("failed to read profile: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse profile: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to spawn engine '{program}': {source}")]
    Spawn { program: String, source: io::Error },
    #[error("engine i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("engine pipe '{0}' was not captured")]
    MissingPipe(&'static str),
    #[error("engine failure: {0}")]
    Engine(String),
}

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

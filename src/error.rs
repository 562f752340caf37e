//! Error types shared by the GP and NEAT breeding subsystems.
//!
//! Recoverable search exhaustion ("no candidate node", "no valid swap") is
//! never an error: operators report it as `None` and fall back to cloning.
//! Everything here is fatal to the experiment that produced it.

use thiserror::Error;

/// Result type for breeding operations.
pub type BreedResult<T> = Result<T, BreedError>;

/// Fatal failures raised by the breeding core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BreedError {
    /// A missing, malformed or out-of-range parameter, or a structurally
    /// impossible setup (no terminal for a type, rehang on a typed system).
    #[error("invalid configuration at `{key}`: {message}")]
    Config { key: String, message: String },

    /// A network could not be activated (outputs never received signal).
    #[error("network topology error: {0}")]
    Topology(String),

    /// `load_sensors` was given the wrong number of values.
    #[error("sensor count mismatch: expected {expected}, got {actual}")]
    SensorCount { expected: usize, actual: usize },

    /// A structural invariant was broken after a validated edit.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Text or binary genome decoding failed.
    #[error("codec error: {0}")]
    Codec(String),
}

impl BreedError {
    /// Shorthand for a configuration error at a key path.
    pub fn config(key: impl ToString, message: impl Into<String>) -> Self {
        BreedError::Config {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for BreedError {
    fn from(err: serde_json::Error) -> Self {
        BreedError::Codec(err.to_string())
    }
}

impl From<bincode::Error> for BreedError {
    fn from(err: bincode::Error) -> Self {
        BreedError::Codec(err.to_string())
    }
}

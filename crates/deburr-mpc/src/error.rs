use std::path::PathBuf;

use deburr_ddp::DdpError;
use deburr_model::ModelError;
use thiserror::Error;

/// Top-level error type for deburr-mpc.
#[derive(Debug, Error)]
pub enum MpcError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("OCP error: {0}")]
    Ocp(#[from] OcpError),

    #[error("Debug archive error: {0}")]
    Debug(#[from] DebugError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("MPC used before initialize")]
    NotInitialized,

    /// Robot or target interface failure in the control loop.
    #[error("Interface error: {0}")]
    Interface(String),
}

/// Settings loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Robot settings: {0}")]
    Robot(#[from] ModelError),
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by the OCP formulator. All but `Solver` and `Model` are
/// raised before the optimizer runs.
#[derive(Debug, Error)]
pub enum OcpError {
    #[error("{what} dimension mismatch: expected {expected}, got {got}")]
    Dimension {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{0} contains non-finite values")]
    NonFinite(&'static str),

    #[error("node index {index} out of range (horizon {horizon})")]
    NodeOutOfRange { index: usize, horizon: usize },

    #[error("OCP used before initialize")]
    NotInitialized,

    #[error("node {index} has no {name} cost")]
    MissingCost { index: usize, name: &'static str },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Solver error: {0}")]
    Solver(#[from] DdpError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

/// Debug archive I/O and format errors.
#[derive(Debug, Error)]
pub enum DebugError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not a debug archive (format tag {0:?})")]
    Format(String),

    #[error("unsupported archive version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("archive holds {found} records, expected {expected}")]
    WrongKind { expected: String, found: String },

    #[error("record {index}: {message}")]
    Schema { index: usize, message: String },

    #[error("{0} contains non-finite values")]
    NonFinite(&'static str),
}

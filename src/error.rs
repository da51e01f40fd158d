use thiserror::Error;

/// The one error type every library module returns. The CLI layer maps
/// each variant to a process exit code (see `main::exit_code_for`).
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("schema error: {0}")]
    Schema(String),

    #[error("semantic error: {0}")]
    Semantic(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("policy violation: {0}")]
    Policy(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("ci-gate error: {0}")]
    Ci(String),
}

impl From<std::io::Error> for SwarmError {
    fn from(e: std::io::Error) -> Self {
        SwarmError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for SwarmError {
    fn from(e: serde_json::Error) -> Self {
        SwarmError::Schema(e.to_string())
    }
}

pub type SwarmResult<T> = Result<T, SwarmError>;

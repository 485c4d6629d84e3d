//! Error types shared by the simulator and the sensitivity analysis.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    /// Bad configuration: missing or unknown parameter keys, malformed bounds.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An operation was called with inputs or in a state it does not accept.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// The external solver failed at a given sweep index.
    #[error("Oracle failed at sweep index {index}: {reason}")]
    OracleFailure { index: usize, reason: String },
}

impl SimError {
    pub fn configuration(message: impl Into<String>) -> Self {
        SimError::Configuration(message.into())
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        SimError::Precondition(message.into())
    }
}

pub type Result<T> = std::result::Result<T, SimError>;

/// Returns a precondition error unless `actual == expected`.
pub(crate) fn ensure_dimension(what: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(SimError::precondition(format!(
            "{what} dimension mismatch. Expected {expected}, got {actual}."
        )));
    }
    Ok(())
}

use strata::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("table {0} already exists")]
    TableExists(String),

    #[error("{0}")]
    Invalid(String),
}

impl ExecutionError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ExecutionError::Invalid(msg.into())
    }
}

pub type ExecResult<T> = std::result::Result<T, ExecutionError>;

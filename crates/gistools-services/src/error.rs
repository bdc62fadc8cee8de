use std::time::Duration;

use gistools_schema::SchemaError;
use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Service-level errors with user-friendly messages
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Not connected: configure a connection first")]
    NotConnected,

    #[error("{0}")]
    ValidationFailed(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    ServerError(String),

    #[error("Metadata unavailable: {0}")]
    MetadataUnavailable(String),

    /// A multi-statement DDL run stopped at `target`; statements already
    /// executed stay applied
    #[error("Stopped at {target} after {completed} done, {skipped} skipped: {message}")]
    BatchAborted {
        completed: usize,
        skipped: usize,
        target: String,
        message: String,
    },

    #[error("Another operation is in progress")]
    Busy,

    #[error("Read-only: {0}")]
    ReadOnly(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<SchemaError> for ServiceError {
    fn from(err: SchemaError) -> Self {
        ServiceError::MetadataUnavailable(err.to_string())
    }
}

impl From<gistools_core::GisError> for ServiceError {
    fn from(err: gistools_core::GisError) -> Self {
        ServiceError::ServerError(err.to_string())
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    /// A catalog query failed; nothing is retried
    #[error("Metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("Driver '{0}' does not support schema introspection")]
    SchemaNotSupported(String),
}

impl From<gistools_core::GisError> for SchemaError {
    fn from(err: gistools_core::GisError) -> Self {
        SchemaError::MetadataUnavailable(err.to_string())
    }
}

pub type SchemaResult<T> = Result<T, SchemaError>;

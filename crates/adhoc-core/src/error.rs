use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdhocError {
    #[error("Schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Sink error: {0}")]
    Sink(#[source] std::io::Error),

    #[error("Allocation limit exceeded: requested {requested} bytes, limit {limit} bytes")]
    AllocationLimit { requested: usize, limit: usize },

    #[error("Table has already been released")]
    TableReleased,

    #[error("Invalid property: {0}")]
    InvalidProperty(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),
}

impl AdhocError {
    /// Reclassify an Arrow error raised while writing to a byte sink.
    ///
    /// The IPC writer reports sink failures as `ArrowError::IoError`; those
    /// become [`AdhocError::Sink`] so callers can tell a broken sink apart
    /// from a malformed batch.
    pub fn from_sink(err: arrow::error::ArrowError) -> Self {
        match err {
            arrow::error::ArrowError::IoError(_, io) => AdhocError::Sink(io),
            other => AdhocError::ArrowError(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, AdhocError>;

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::error::ArrowError;

    #[test]
    fn test_sink_errors_are_reclassified() {
        let io = std::io::Error::new(std::io::ErrorKind::WriteZero, "disk full");
        let err = AdhocError::from_sink(ArrowError::IoError("write failed".into(), io));
        assert!(matches!(err, AdhocError::Sink(_)));

        let err = AdhocError::from_sink(ArrowError::InvalidArgumentError("bad".into()));
        assert!(matches!(err, AdhocError::ArrowError(_)));
    }
}

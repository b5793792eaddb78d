//! Error types for Arrow Flight operations

use thiserror::Error;

/// Errors that can occur during Flight operations
#[derive(Debug, Error)]
pub enum FlightError {
    /// Authentication failed or no credential was returned
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Flight info carried no endpoint or ticket to fetch
    #[error("No endpoint in flight info for query: {0}")]
    MissingEndpoint(String),

    /// Table not found
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Server rejected one or more session options
    #[error("Session option error: {0}")]
    SessionOption(String),

    /// Header name or value that cannot travel as gRPC metadata
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Unification, property or configuration error
    #[error(transparent)]
    Core(#[from] adhoc_core::AdhocError),

    /// Arrow error
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    /// Arrow Flight error
    #[error("Flight error: {0}")]
    FlightDecodeError(#[from] arrow_flight::error::FlightError),

    /// gRPC transport error
    #[error("Transport error: {0}")]
    TransportError(#[from] tonic::transport::Error),

    /// gRPC status error
    #[error("gRPC error: {0}")]
    GrpcError(#[from] tonic::Status),

    /// Protobuf decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] prost::DecodeError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Timed out waiting for the server
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl From<FlightError> for tonic::Status {
    fn from(err: FlightError) -> Self {
        match err {
            FlightError::Unauthenticated(msg) => tonic::Status::unauthenticated(msg),
            FlightError::MissingEndpoint(msg) => tonic::Status::not_found(msg),
            FlightError::TableNotFound(msg) => tonic::Status::not_found(msg),
            FlightError::SessionOption(msg) => tonic::Status::invalid_argument(msg),
            FlightError::InvalidHeader(msg) => tonic::Status::invalid_argument(msg),
            FlightError::Core(e) => tonic::Status::internal(e.to_string()),
            FlightError::ArrowError(e) => tonic::Status::internal(e.to_string()),
            FlightError::FlightDecodeError(e) => tonic::Status::internal(e.to_string()),
            FlightError::TransportError(e) => tonic::Status::unavailable(e.to_string()),
            FlightError::GrpcError(status) => status,
            FlightError::DecodeError(e) => tonic::Status::invalid_argument(e.to_string()),
            FlightError::IoError(e) => tonic::Status::internal(e.to_string()),
            FlightError::InvalidRequest(msg) => tonic::Status::invalid_argument(msg),
            FlightError::Timeout(msg) => tonic::Status::deadline_exceeded(msg),
        }
    }
}

impl FlightError {
    /// True when the server refused the caller's credentials
    pub fn is_unauthenticated(&self) -> bool {
        match self {
            FlightError::Unauthenticated(_) => true,
            FlightError::GrpcError(status) => status.code() == tonic::Code::Unauthenticated,
            _ => false,
        }
    }
}

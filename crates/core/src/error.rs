// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Dispatch creation error: {0}")]
    DispatchCreation(String),

    #[error("Unknown dispatch: {0}")]
    UnknownDispatch(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Nothing to export: dispatch {0} has no results")]
    EmptyResultSet(String),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::port::TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl From<crate::port::InventoryError> for AppError {
    fn from(err: crate::port::InventoryError) -> Self {
        AppError::Resolution(err.to_string())
    }
}

impl From<crate::port::ArtifactStoreError> for AppError {
    fn from(err: crate::port::ArtifactStoreError) -> Self {
        AppError::Export(err.to_string())
    }
}

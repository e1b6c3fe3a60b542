// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid execution state transition for {target_id}: {from} -> {to}")]
    InvalidStateTransition {
        target_id: String,
        from: String,
        to: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;

// Domain Layer - Pure business logic and entities

pub mod dispatch;
pub mod error;
pub mod execution;
pub mod result_set;
pub mod target;

// Re-exports
pub use dispatch::{CommandPayload, Dispatch, DispatchId, DispatchMetadata, DispatchState};
pub use error::DomainError;
pub use execution::{ExecutionOutput, ExecutionState, TargetExecution};
pub use result_set::{ResultSet, ResultSummary};
pub use target::{Target, TargetFilter, TargetId};

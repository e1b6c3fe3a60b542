// Port Layer - Interfaces for external dependencies

pub mod artifact_store;
pub mod id_provider; // For deterministic testing
pub mod inventory;
pub mod time_provider;
pub mod transport;

// Re-exports
pub use artifact_store::{ArtifactStore, ArtifactStoreError};
pub use id_provider::IdProvider;
pub use inventory::{InventoryError, InventorySource};
pub use time_provider::TimeProvider;
pub use transport::{ExecutionHandle, RemoteState, RemoteStatus, Transport, TransportError};

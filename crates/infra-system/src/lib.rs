// Fleet Infrastructure - System Adapters
// Implements: Transport, InventorySource, ArtifactStore

pub mod fs_artifact_store;
pub mod json_inventory;
pub mod subprocess_transport;

pub use fs_artifact_store::FsArtifactStore;
pub use json_inventory::JsonFileInventory;
pub use subprocess_transport::{SubprocessTransport, SubprocessTransportConfig};

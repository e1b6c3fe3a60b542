// Inventory Source Port
// Opaque provider of raw instance records; the resolver maps them to Targets

use crate::domain::TargetFilter;
use async_trait::async_trait;
use thiserror::Error;

/// Inventory errors
#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Inventory unreachable: {0}")]
    Unreachable(String),

    #[error("Malformed inventory data: {0}")]
    Malformed(String),
}

/// Inventory Source trait
///
/// Implementations:
/// - JsonFileInventory: reads an exported instance list from disk
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// List raw instance records
    ///
    /// `filter` is a hint only: sources may pre-filter with it or return
    /// everything. The resolver re-applies it to every record.
    ///
    /// # Errors
    /// - InventoryError::Unreachable if the source cannot be queried
    /// - InventoryError::Malformed if the response cannot be decoded
    async fn list(&self, filter: &TargetFilter) -> Result<Vec<serde_json::Value>, InventoryError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fixed in-memory inventory
    pub struct StaticInventory {
        records: Vec<serde_json::Value>,
        unreachable: Option<String>,
        call_count: AtomicUsize,
    }

    impl StaticInventory {
        pub fn new(records: Vec<serde_json::Value>) -> Self {
            Self {
                records,
                unreachable: None,
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn new_unreachable(message: impl Into<String>) -> Self {
            Self {
                records: Vec::new(),
                unreachable: Some(message.into()),
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InventorySource for StaticInventory {
        async fn list(
            &self,
            _filter: &TargetFilter,
        ) -> Result<Vec<serde_json::Value>, InventoryError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            match &self.unreachable {
                Some(msg) => Err(InventoryError::Unreachable(msg.clone())),
                None => Ok(self.records.clone()),
            }
        }
    }
}

// Artifact Store Port
// Durable destination for exported reports (local disk, object storage, ...)

use async_trait::async_trait;
use thiserror::Error;

/// Artifact store errors
#[derive(Error, Debug)]
pub enum ArtifactStoreError {
    #[error("Permission denied writing {path}: {message}")]
    PermissionDenied { path: String, message: String },

    #[error("Write failed for {path}: {message}")]
    WriteFailed { path: String, message: String },
}

/// Artifact store trait
///
/// Writing to an existing path replaces its content.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), ArtifactStoreError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory artifact store
    #[derive(Default)]
    pub struct InMemoryArtifactStore {
        files: Mutex<HashMap<String, Vec<u8>>>,
        write_count: Mutex<usize>,
        read_only: bool,
    }

    impl InMemoryArtifactStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every write fails with PermissionDenied
        pub fn new_read_only() -> Self {
            Self {
                read_only: true,
                ..Self::default()
            }
        }

        pub fn get(&self, path: &str) -> Option<Vec<u8>> {
            self.files.lock().unwrap().get(path).cloned()
        }

        pub fn paths(&self) -> Vec<String> {
            let mut paths: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
            paths.sort();
            paths
        }

        pub fn write_count(&self) -> usize {
            *self.write_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl ArtifactStore for InMemoryArtifactStore {
        async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), ArtifactStoreError> {
            *self.write_count.lock().unwrap() += 1;
            if self.read_only {
                return Err(ArtifactStoreError::PermissionDenied {
                    path: path.to_string(),
                    message: "store is read-only".to_string(),
                });
            }
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), bytes.to_vec());
            Ok(())
        }
    }
}

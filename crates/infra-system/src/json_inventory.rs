// JSON file inventory source
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;

use fleet_core::domain::TargetFilter;
use fleet_core::port::{InventoryError, InventorySource};

/// Keys under which an exported instance list may be wrapped
const LIST_KEYS: [&str; 2] = ["instances", "InstanceInformationList"];

/// Reads an instance list exported to disk
///
/// Accepted layouts: a bare JSON array, `{"instances": [...]}` or the cloud
/// CLI's `{"InstanceInformationList": [...]}`. The file is re-read on every
/// call so edits are picked up.
pub struct JsonFileInventory {
    path: PathBuf,
}

impl JsonFileInventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

fn extract_records(document: Value) -> Result<Vec<Value>, InventoryError> {
    match document {
        Value::Array(records) => Ok(records),
        Value::Object(mut map) => LIST_KEYS
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(records)) => Some(records),
                _ => None,
            })
            .ok_or_else(|| {
                InventoryError::Malformed(format!(
                    "expected an array or an object with one of {:?}",
                    LIST_KEYS
                ))
            }),
        _ => Err(InventoryError::Malformed(
            "top-level value is not an array or object".to_string(),
        )),
    }
}

#[async_trait]
impl InventorySource for JsonFileInventory {
    async fn list(&self, _filter: &TargetFilter) -> Result<Vec<Value>, InventoryError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| InventoryError::Unreachable(format!("{}: {}", self.path.display(), e)))?;

        let document: Value = serde_json::from_slice(&bytes)
            .map_err(|e| InventoryError::Malformed(format!("{}: {}", self.path.display(), e)))?;

        let records = extract_records(document)?;
        debug!(path = %self.path.display(), records = records.len(), "Inventory file loaded");
        Ok(records)
    }
}

//! Target Resolver - turns an inventory listing into an exact target set
//!
//! Two raw record shapes are understood:
//! - cloud inventory: `{"InstanceId", "Tags": [{"Key", "Value"}], "PlatformName", "PingStatus"}`
//! - flat: `{"id", "tags": {"k": "v"}, "platform", "managed"}`

use crate::domain::{Target, TargetFilter};
use crate::error::{AppError, Result};
use crate::port::InventorySource;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInstance {
    Cloud(CloudRecord),
    Flat(FlatRecord),
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CloudRecord {
    instance_id: String,
    #[serde(default)]
    tags: Vec<CloudTag>,
    #[serde(default)]
    platform_name: Option<String>,
    #[serde(default)]
    ping_status: Option<String>,
    #[serde(default)]
    managed: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CloudTag {
    key: String,
    value: String,
}

#[derive(Deserialize)]
struct FlatRecord {
    id: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    managed: bool,
}

impl From<RawInstance> for Target {
    fn from(raw: RawInstance) -> Self {
        match raw {
            RawInstance::Cloud(record) => {
                // Registered with the agent and online counts as managed
                let managed = record.managed.unwrap_or_else(|| {
                    record
                        .ping_status
                        .as_deref()
                        .is_some_and(|s| s.eq_ignore_ascii_case("online"))
                });
                Target {
                    id: record.instance_id,
                    tags: record.tags.into_iter().map(|t| (t.key, t.value)).collect(),
                    platform: record.platform_name,
                    managed,
                }
            }
            RawInstance::Flat(record) => Target {
                id: record.id,
                tags: record.tags,
                platform: record.platform,
                managed: record.managed,
            },
        }
    }
}

/// Map one raw inventory record to a Target
pub fn parse_record(record: serde_json::Value) -> std::result::Result<Target, String> {
    let raw: RawInstance = serde_json::from_value(record)
        .map_err(|_| "record has neither `InstanceId` nor `id`".to_string())?;
    let target = Target::from(raw);
    if target.id.trim().is_empty() {
        return Err("empty target id".to_string());
    }
    Ok(target)
}

/// Target Resolver
pub struct TargetResolver {
    inventory: Arc<dyn InventorySource>,
}

impl TargetResolver {
    pub fn new(inventory: Arc<dyn InventorySource>) -> Self {
        Self { inventory }
    }

    /// Resolve a filter to the matching targets, sorted by id
    ///
    /// # Errors
    /// - AppError::Resolution if the inventory is unreachable, a record is
    ///   malformed, or two records share an id
    pub async fn resolve(&self, filter: &TargetFilter) -> Result<Vec<Target>> {
        let records = self.inventory.list(filter).await.map_err(|e| {
            error!(error = %e, filter = %filter, "Inventory query failed");
            AppError::from(e)
        })?;

        let total = records.len();
        let mut inventory: BTreeMap<String, Target> = BTreeMap::new();

        for (idx, record) in records.into_iter().enumerate() {
            let target = parse_record(record)
                .map_err(|e| AppError::Resolution(format!("record #{}: {}", idx, e)))?;

            if inventory.contains_key(&target.id) {
                return Err(AppError::Resolution(format!(
                    "duplicate target id in inventory: {}",
                    target.id
                )));
            }
            inventory.insert(target.id.clone(), target);
        }

        let targets: Vec<Target> = inventory
            .into_values()
            .filter(|t| {
                let hit = filter.matches(t);
                debug!(target_id = %t.id, matched = hit, "Evaluated target");
                hit
            })
            .collect();

        info!(
            filter = %filter,
            inventory_size = total,
            matched = targets.len(),
            "Targets resolved"
        );
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::inventory::mocks::StaticInventory;
    use serde_json::json;

    fn fixture() -> Vec<serde_json::Value> {
        vec![
            json!({"InstanceId": "i-lab-1", "PingStatus": "Online", "PlatformName": "Ubuntu",
                   "Tags": [{"Key": "env", "Value": "lab"}]}),
            json!({"InstanceId": "i-lab-2", "PingStatus": "Online",
                   "Tags": [{"Key": "env", "Value": "lab"}, {"Key": "role", "Value": "db"}]}),
            json!({"InstanceId": "i-lab-3", "PingStatus": "ConnectionLost",
                   "Tags": [{"Key": "env", "Value": "lab"}]}),
            json!({"id": "i-prod-1", "managed": true, "tags": {"env": "prod"}}),
            json!({"id": "i-prod-2", "managed": true, "tags": {"env": "prod"}}),
        ]
    }

    fn resolver(records: Vec<serde_json::Value>) -> TargetResolver {
        TargetResolver::new(Arc::new(StaticInventory::new(records)))
    }

    #[tokio::test]
    async fn test_resolve_managed_lab_targets() {
        let filter = TargetFilter::tag("env", "lab").managed_only();
        let targets = resolver(fixture()).resolve(&filter).await.unwrap();

        let ids: Vec<&str> = targets.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["i-lab-1", "i-lab-2"]);
        assert_eq!(targets[0].platform.as_deref(), Some("Ubuntu"));
        assert_eq!(targets[1].tag("role"), Some("db"));
    }

    #[tokio::test]
    async fn test_resolve_has_no_false_positives_or_negatives() {
        let records = fixture();
        let resolver = resolver(records.clone());
        let all: Vec<Target> = records
            .into_iter()
            .map(|r| parse_record(r).unwrap())
            .collect();

        let filters = [
            TargetFilter::All,
            TargetFilter::tag("env", "prod"),
            TargetFilter::tag("env", "lab").managed_only(),
            TargetFilter::managed(false),
            TargetFilter::tag("role", "db").negate(),
            TargetFilter::tag("env", "staging"),
        ];

        for filter in filters {
            let resolved = resolver.resolve(&filter).await.unwrap();
            let expected: Vec<&str> = all
                .iter()
                .filter(|t| filter.matches(t))
                .map(|t| t.id.as_str())
                .collect();
            let got: Vec<&str> = resolved.iter().map(|t| t.id.as_str()).collect();
            assert_eq!(got, expected, "filter {}", filter);
        }
    }

    #[tokio::test]
    async fn test_resolve_is_deterministic() {
        let inventory = Arc::new(StaticInventory::new(fixture()));
        let resolver = TargetResolver::new(Arc::clone(&inventory) as Arc<dyn InventorySource>);
        let filter = TargetFilter::All;

        let first = resolver.resolve(&filter).await.unwrap();
        let second = resolver.resolve(&filter).await.unwrap();
        assert_eq!(first, second);
        // Every resolve reads the inventory again
        assert_eq!(inventory.call_count(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_inventory() {
        let resolver = TargetResolver::new(Arc::new(StaticInventory::new_unreachable(
            "connection refused",
        )));

        let err = resolver.resolve(&TargetFilter::All).await.unwrap_err();
        assert!(matches!(err, AppError::Resolution(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_malformed_record() {
        let resolver = resolver(vec![
            json!({"id": "i-1", "managed": true}),
            json!({"hostname": "no-id-here"}),
        ]);

        let err = resolver.resolve(&TargetFilter::All).await.unwrap_err();
        assert!(matches!(err, AppError::Resolution(ref msg) if msg.contains("record #1")));
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_malformed() {
        let resolver = resolver(vec![
            json!({"id": "i-1", "managed": true}),
            json!({"InstanceId": "i-1", "PingStatus": "Online"}),
        ]);

        let err = resolver.resolve(&TargetFilter::All).await.unwrap_err();
        assert!(err.to_string().contains("duplicate target id"));
    }

    #[test]
    fn test_parse_record_shapes() {
        let cloud = parse_record(json!({
            "InstanceId": "i-1",
            "PingStatus": "Online",
            "Tags": [{"Key": "env", "Value": "lab"}],
            "AgentVersion": "3.2.0"
        }))
        .unwrap();
        assert!(cloud.managed);
        assert_eq!(cloud.tag("env"), Some("lab"));

        let explicit = parse_record(json!({"InstanceId": "i-2", "Managed": false, "PingStatus": "Online"}))
            .unwrap();
        assert!(!explicit.managed);

        let flat = parse_record(json!({"id": "web-1", "platform": "Linux"})).unwrap();
        assert!(!flat.managed);
        assert_eq!(flat.platform.as_deref(), Some("Linux"));

        assert!(parse_record(json!({"id": "  "})).is_err());
        assert!(parse_record(json!("i-1")).is_err());
    }
}

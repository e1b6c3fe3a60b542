//! Shared wiring for the end-to-end tests: real adapters over a temp dir

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fleet_core::application::{
    DispatchConfig, DispatchEngine, Exporter, ResultAggregator, TargetResolver,
};
use fleet_core::domain::{DispatchId, ResultSet};
use fleet_core::port::id_provider::SequentialIdProvider;
use fleet_core::port::time_provider::SystemTimeProvider;
use fleet_infra_system::{
    FsArtifactStore, JsonFileInventory, SubprocessTransport, SubprocessTransportConfig,
};
use serde_json::json;

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub resolver: TargetResolver,
    pub engine: DispatchEngine,
    pub exporter: Exporter,
    pub transport: Arc<SubprocessTransport>,
}

impl Harness {
    pub fn new(config: DispatchConfig) -> Self {
        Self::with_transport(config, SubprocessTransportConfig::default())
    }

    pub fn with_transport(config: DispatchConfig, transport: SubprocessTransportConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let inventory_path = dir.path().join("inventory.json");
        std::fs::write(&inventory_path, serde_json::to_vec(&inventory()).unwrap()).unwrap();

        let transport = Arc::new(SubprocessTransport::new(transport));
        let engine = DispatchEngine::new(
            Arc::clone(&transport) as Arc<dyn fleet_core::port::Transport>,
            Arc::new(ResultAggregator::new()),
            Arc::new(SequentialIdProvider::new("cmd")),
            Arc::new(SystemTimeProvider),
            config,
        );

        Self {
            resolver: TargetResolver::new(Arc::new(JsonFileInventory::new(&inventory_path))),
            engine,
            exporter: Exporter::new(Arc::new(FsArtifactStore::new(dir.path()))),
            transport,
            dir,
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub async fn wait(&self, id: &DispatchId) -> ResultSet {
        self.engine
            .aggregator()
            .await_completion(id, Duration::from_secs(20))
            .await
            .unwrap()
    }
}

/// Cloud-style export with one lab box offline, plus two flat prod records
pub fn inventory() -> serde_json::Value {
    json!({
        "InstanceInformationList": [
            {"InstanceId": "i-lab-1", "PingStatus": "Online", "PlatformName": "Ubuntu",
             "Tags": [{"Key": "env", "Value": "lab"}]},
            {"InstanceId": "i-lab-2", "PingStatus": "Online", "PlatformName": "Ubuntu",
             "Tags": [{"Key": "env", "Value": "lab"}]},
            {"InstanceId": "i-lab-3", "PingStatus": "Online", "PlatformName": "Amazon Linux",
             "Tags": [{"Key": "env", "Value": "lab"}]},
            {"InstanceId": "i-lab-4", "PingStatus": "ConnectionLost",
             "Tags": [{"Key": "env", "Value": "lab"}]},
            {"id": "i-prod-1", "managed": true, "tags": {"env": "prod"}},
            {"id": "i-prod-2", "managed": true, "tags": {"env": "prod"}}
        ]
    })
}

pub fn fast_config() -> DispatchConfig {
    DispatchConfig {
        max_concurrency: 4,
        target_timeout_ms: 5_000,
        poll_interval_ms: 20,
    }
}

pub fn ids(result_set: &ResultSet) -> Vec<&str> {
    result_set.executions.keys().map(String::as_str).collect()
}

pub fn shell_path(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

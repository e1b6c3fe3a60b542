//! Exporter - persist a ResultSet as a JSON or CSV artifact
//!
//! The artifact path is `<destination>/<dispatch_id>.<ext>`, so exporting the
//! same dispatch twice overwrites the earlier artifact.

use crate::domain::{ResultSet, TargetExecution};
use crate::error::{AppError, Result};
use crate::port::ArtifactStore;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};

pub const CSV_HEADER: [&str; 7] = [
    "target_id",
    "status",
    "response_code",
    "stdout",
    "stderr",
    "started_at",
    "finished_at",
];

/// Export format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(AppError::Config(format!(
                "unknown export format '{}' (expected json or csv)",
                other
            ))),
        }
    }
}

/// Where an export landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub path: String,
    pub format: ExportFormat,
    pub record_count: usize,
}

/// Exporter
pub struct Exporter {
    store: Arc<dyn ArtifactStore>,
}

impl Exporter {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Artifact path for a dispatch and format
    pub fn artifact_path(destination: &str, dispatch_id: &str, format: ExportFormat) -> String {
        let file = format!("{}.{}", dispatch_id, format.extension());
        let destination = destination.trim_end_matches('/');
        if destination.is_empty() {
            file
        } else {
            format!("{}/{}", destination, file)
        }
    }

    /// Render and write one artifact
    ///
    /// # Errors
    /// - AppError::EmptyResultSet if there is nothing to export (nothing written)
    /// - AppError::Export if the store rejects the write
    pub async fn export(
        &self,
        result_set: &ResultSet,
        format: ExportFormat,
        destination: &str,
    ) -> Result<ArtifactDescriptor> {
        if result_set.is_empty() {
            return Err(AppError::EmptyResultSet(result_set.dispatch_id().to_string()));
        }

        let bytes = match format {
            ExportFormat::Json => serde_json::to_vec_pretty(result_set)?,
            ExportFormat::Csv => render_csv(result_set).into_bytes(),
        };
        let path = Self::artifact_path(destination, result_set.dispatch_id(), format);

        self.store.write(&path, &bytes).await.map_err(|e| {
            error!(
                dispatch_id = %result_set.dispatch_id(),
                path = %path,
                error = %e,
                "Export failed"
            );
            AppError::from(e)
        })?;

        info!(
            dispatch_id = %result_set.dispatch_id(),
            format = %format,
            path = %path,
            records = result_set.len(),
            bytes = bytes.len(),
            "Result set exported"
        );

        Ok(ArtifactDescriptor {
            path,
            format,
            record_count: result_set.len(),
        })
    }

    /// Export in several formats, stopping at the first failure
    pub async fn export_all(
        &self,
        result_set: &ResultSet,
        formats: &[ExportFormat],
        destination: &str,
    ) -> Result<Vec<ArtifactDescriptor>> {
        let mut descriptors = Vec::with_capacity(formats.len());
        for format in formats {
            descriptors.push(self.export(result_set, *format, destination).await?);
        }
        Ok(descriptors)
    }
}

fn render_csv(result_set: &ResultSet) -> String {
    let mut out = String::new();
    push_row(&mut out, CSV_HEADER.iter().map(|h| h.to_string()));
    // executions is a BTreeMap, so rows come out sorted by target id
    for execution in result_set.executions.values() {
        push_row(&mut out, csv_fields(execution));
    }
    out
}

fn csv_fields(execution: &TargetExecution) -> [String; 7] {
    [
        execution.target_id.clone(),
        execution.state.to_string(),
        execution
            .response_code
            .map(|c| c.to_string())
            .unwrap_or_default(),
        execution.stdout.clone(),
        execution.stderr.clone(),
        rfc3339(execution.started_at),
        rfc3339(execution.finished_at),
    ]
}

fn push_row(out: &mut String, fields: impl IntoIterator<Item = String>) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&quote(&field));
    }
    out.push_str("\r\n");
}

/// RFC 4180 field quoting
fn quote(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn rfc3339(millis: Option<i64>) -> String {
    millis
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CommandPayload, Dispatch, DispatchMetadata, ExecutionOutput, Target,
    };
    use crate::port::artifact_store::mocks::InMemoryArtifactStore;
    use std::collections::BTreeMap;
    use tokio_test::assert_err;

    fn result_set() -> ResultSet {
        let targets = vec![
            Target::new("i-b", true).with_tag("env", "lab"),
            Target::new("i-a", true).with_tag("env", "lab").with_platform("Ubuntu"),
        ];
        let metadata = DispatchMetadata {
            comment: Some("nightly".to_string()),
            ..DispatchMetadata::default()
        };
        let dispatch = Dispatch::new(
            "cmd-42",
            1_700_000_000_000,
            CommandPayload::new(["uptime", "df -h"]).unwrap(),
            targets,
            metadata,
        )
        .unwrap();

        let mut a = TargetExecution::pending("i-a");
        a.start(1_700_000_000_100).unwrap();
        a.succeed(
            1_700_000_000_250,
            ExecutionOutput {
                response_code: Some(0),
                stdout: "up 3 days, load 0.1, 0.2".to_string(),
                stderr: String::new(),
            },
        )
        .unwrap();

        let mut b = TargetExecution::pending("i-b");
        b.start(1_700_000_000_100).unwrap();
        b.fail(
            1_700_000_000_900,
            Some(ExecutionOutput {
                response_code: Some(2),
                stdout: "line one\nline two".to_string(),
                stderr: "say \"no\"".to_string(),
            }),
            Some("exit code 2".to_string()),
        )
        .unwrap();

        let executions = BTreeMap::from([("i-a".to_string(), a), ("i-b".to_string(), b)]);
        ResultSet::new(dispatch, executions)
    }

    fn exporter() -> (Arc<InMemoryArtifactStore>, Exporter) {
        let store = Arc::new(InMemoryArtifactStore::new());
        (Arc::clone(&store), Exporter::new(store))
    }

    #[tokio::test]
    async fn test_json_export_round_trips() {
        let (store, exporter) = exporter();
        let rs = result_set();

        let artifact = exporter
            .export(&rs, ExportFormat::Json, "/reports/")
            .await
            .unwrap();
        assert_eq!(artifact.path, "/reports/cmd-42.json");
        assert_eq!(artifact.record_count, 2);

        let parsed: ResultSet = serde_json::from_slice(&store.get(&artifact.path).unwrap()).unwrap();
        assert_eq!(parsed, rs);
        assert_eq!(parsed.dispatch.metadata.comment.as_deref(), Some("nightly"));
        assert_eq!(parsed.dispatch.target("i-a").unwrap().tag("env"), Some("lab"));
    }

    #[tokio::test]
    async fn test_csv_layout_and_quoting() {
        let (store, exporter) = exporter();
        let artifact = exporter
            .export(&result_set(), ExportFormat::Csv, "out")
            .await
            .unwrap();
        assert_eq!(artifact.path, "out/cmd-42.csv");

        let csv = String::from_utf8(store.get(&artifact.path).unwrap()).unwrap();
        let expected = concat!(
            "target_id,status,response_code,stdout,stderr,started_at,finished_at\r\n",
            "i-a,SUCCEEDED,0,\"up 3 days, load 0.1, 0.2\",,",
            "2023-11-14T22:13:20.100Z,2023-11-14T22:13:20.250Z\r\n",
            "i-b,FAILED,2,\"line one\nline two\",\"say \"\"no\"\"\",",
            "2023-11-14T22:13:20.100Z,2023-11-14T22:13:20.900Z\r\n",
        );
        assert_eq!(csv, expected);
    }

    #[tokio::test]
    async fn test_reexport_overwrites_same_path() {
        let (store, exporter) = exporter();
        let rs = result_set();

        let first = exporter.export(&rs, ExportFormat::Json, "r").await.unwrap();
        let second = exporter.export(&rs, ExportFormat::Json, "r").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.paths(), vec!["r/cmd-42.json".to_string()]);
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_result_set_writes_nothing() {
        let (store, exporter) = exporter();
        let mut rs = result_set();
        rs.executions.clear();

        let err = assert_err!(exporter.export(&rs, ExportFormat::Csv, "r").await);
        assert!(matches!(err, AppError::EmptyResultSet(ref id) if id == "cmd-42"));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_export_error() {
        let exporter = Exporter::new(Arc::new(InMemoryArtifactStore::new_read_only()));

        let err = assert_err!(exporter.export(&result_set(), ExportFormat::Json, "r").await);
        assert!(matches!(err, AppError::Export(ref msg) if msg.contains("Permission denied")));
    }

    #[tokio::test]
    async fn test_export_all() {
        let (store, exporter) = exporter();
        let artifacts = exporter
            .export_all(&result_set(), &[ExportFormat::Json, ExportFormat::Csv], "")
            .await
            .unwrap();

        assert_eq!(artifacts.len(), 2);
        assert_eq!(store.paths(), vec!["cmd-42.csv".to_string(), "cmd-42.json".to_string()]);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!(" csv ".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!("xml".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("plain"), "plain");
        assert_eq!(quote("a,b"), "\"a,b\"");
        assert_eq!(quote("cr\rlf"), "\"cr\rlf\"");
        assert_eq!(quote(""), "");
    }
}

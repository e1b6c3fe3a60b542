// Dispatch Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::execution::TargetExecution;
use crate::domain::target::Target;
use serde::{Deserialize, Serialize};

/// Dispatch ID (UUID v4 in production)
pub type DispatchId = String;

/// Document name used when the caller does not name one
pub const DEFAULT_DOCUMENT: &str = "RunShellScript";

/// Ordered, non-empty list of shell commands sent to every target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct CommandPayload(Vec<String>);

impl CommandPayload {
    pub fn new<I, S>(commands: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let commands: Vec<String> = commands.into_iter().map(Into::into).collect();
        if commands.is_empty() {
            return Err(DomainError::ValidationError(
                "command list is empty".to_string(),
            ));
        }
        if let Some(pos) = commands.iter().position(|c| c.trim().is_empty()) {
            return Err(DomainError::ValidationError(format!(
                "command #{} is blank",
                pos + 1
            )));
        }
        Ok(Self(commands))
    }

    pub fn commands(&self) -> &[String] {
        &self.0
    }

    /// Commands joined into a single newline-separated script
    pub fn script(&self) -> String {
        self.0.join("\n")
    }
}

impl TryFrom<Vec<String>> for CommandPayload {
    type Error = DomainError;

    fn try_from(commands: Vec<String>) -> Result<Self> {
        Self::new(commands)
    }
}

impl From<CommandPayload> for Vec<String> {
    fn from(payload: CommandPayload) -> Self {
        payload.0
    }
}

/// Free-form audit metadata attached to a dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMetadata {
    pub document: String,
    #[serde(default)]
    pub comment: Option<String>,
}

impl Default for DispatchMetadata {
    fn default() -> Self {
        Self {
            document: DEFAULT_DOCUMENT.to_string(),
            comment: None,
        }
    }
}

/// Overall dispatch state (always derived from the executions)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchState {
    Running,
    Completed,
}

impl DispatchState {
    /// `Completed` once no execution is in flight, regardless of outcomes
    pub fn derive<'a>(executions: impl IntoIterator<Item = &'a TargetExecution>) -> Self {
        if executions.into_iter().all(|e| e.state.is_terminal()) {
            DispatchState::Completed
        } else {
            DispatchState::Running
        }
    }
}

impl std::fmt::Display for DispatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchState::Running => write!(f, "RUNNING"),
            DispatchState::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// Dispatch Entity
///
/// The target set is fixed at creation; a retry pass creates a new
/// dispatch pointing back through `retry_of`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispatch {
    pub id: DispatchId,
    pub payload: CommandPayload,
    pub targets: Vec<Target>,
    pub metadata: DispatchMetadata,
    pub created_at: i64, // epoch ms
    #[serde(default)]
    pub retry_of: Option<DispatchId>,
}

impl Dispatch {
    /// Create a new Dispatch
    ///
    /// # Arguments
    ///
    /// * `id` - Unique dispatch ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `payload` - Commands to run
    /// * `targets` - Target set; must be non-empty with unique ids
    /// * `metadata` - Document name and comment
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        payload: CommandPayload,
        mut targets: Vec<Target>,
        metadata: DispatchMetadata,
    ) -> Result<Self> {
        if targets.is_empty() {
            return Err(DomainError::ValidationError(
                "target set is empty".to_string(),
            ));
        }

        targets.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(dup) = targets.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(DomainError::ValidationError(format!(
                "duplicate target id: {}",
                dup[0].id
            )));
        }

        Ok(Self {
            id: id.into(),
            payload,
            targets,
            metadata,
            created_at,
            retry_of: None,
        })
    }

    pub fn target_ids(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(|t| t.id.as_str())
    }

    pub fn target(&self, id: &str) -> Option<&Target> {
        self.targets
            .binary_search_by(|t| t.id.as_str().cmp(id))
            .ok()
            .map(|idx| &self.targets[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(ids: &[&str]) -> Vec<Target> {
        ids.iter().map(|id| Target::new(*id, true)).collect()
    }

    #[test]
    fn test_payload_rejects_empty_and_blank() {
        assert!(CommandPayload::new(Vec::<String>::new()).is_err());

        let err = CommandPayload::new(["echo hi", "   "]).unwrap_err();
        assert!(err.to_string().contains("#2"));

        let payload = CommandPayload::new(["uptime", "df -h"]).unwrap();
        assert_eq!(payload.script(), "uptime\ndf -h");
    }

    #[test]
    fn test_payload_deserialize_validates() {
        let ok: CommandPayload = serde_json::from_str(r#"["echo hi"]"#).unwrap();
        assert_eq!(ok.commands(), ["echo hi"]);

        assert!(serde_json::from_str::<CommandPayload>("[]").is_err());
    }

    #[test]
    fn test_dispatch_sorts_targets_and_rejects_duplicates() {
        let payload = CommandPayload::new(["echo hi"]).unwrap();

        let dispatch = Dispatch::new(
            "d-1",
            1000,
            payload.clone(),
            targets(&["i-3", "i-1", "i-2"]),
            DispatchMetadata::default(),
        )
        .unwrap();
        assert_eq!(dispatch.target_ids().collect::<Vec<_>>(), ["i-1", "i-2", "i-3"]);
        assert!(dispatch.target("i-2").is_some());
        assert!(dispatch.target("i-9").is_none());

        let dup = Dispatch::new(
            "d-2",
            1000,
            payload.clone(),
            targets(&["i-1", "i-1"]),
            DispatchMetadata::default(),
        );
        assert!(dup.unwrap_err().to_string().contains("duplicate"));

        let empty = Dispatch::new("d-3", 1000, payload, vec![], DispatchMetadata::default());
        assert!(empty.is_err());
    }
}

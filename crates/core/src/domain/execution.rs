// Target Execution Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::target::TargetId;
use serde::{Deserialize, Serialize};

/// Per-target execution state
///
/// Legal paths: Pending -> Running -> {Succeeded, Failed, TimedOut} and
/// Pending -> Failed (transport rejected the send).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded | ExecutionState::Failed | ExecutionState::TimedOut
        )
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionState::Pending => write!(f, "PENDING"),
            ExecutionState::Running => write!(f, "RUNNING"),
            ExecutionState::Succeeded => write!(f, "SUCCEEDED"),
            ExecutionState::Failed => write!(f, "FAILED"),
            ExecutionState::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

/// Output captured from a terminal report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub response_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// One (Dispatch, Target) execution record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetExecution {
    pub target_id: TargetId,
    pub state: ExecutionState,
    pub response_code: Option<i32>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub started_at: Option<i64>,  // epoch ms
    pub finished_at: Option<i64>, // epoch ms
    #[serde(default)]
    pub reason: Option<String>,
}

impl TargetExecution {
    pub fn pending(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            state: ExecutionState::Pending,
            response_code: None,
            stdout: String::new(),
            stderr: String::new(),
            started_at: None,
            finished_at: None,
            reason: None,
        }
    }

    fn transition(&self, allowed: &[ExecutionState], to: ExecutionState) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(DomainError::InvalidStateTransition {
                target_id: self.target_id.clone(),
                from: self.state.to_string(),
                to: to.to_string(),
            })
        }
    }

    fn record_output(&mut self, output: ExecutionOutput) {
        self.response_code = output.response_code;
        self.stdout = output.stdout;
        self.stderr = output.stderr;
    }

    /// Transport accepted the send
    pub fn start(&mut self, now_millis: i64) -> Result<()> {
        self.transition(&[ExecutionState::Pending], ExecutionState::Running)?;
        self.state = ExecutionState::Running;
        self.started_at = Some(now_millis);
        Ok(())
    }

    pub fn succeed(&mut self, now_millis: i64, output: ExecutionOutput) -> Result<()> {
        self.transition(&[ExecutionState::Running], ExecutionState::Succeeded)?;
        self.state = ExecutionState::Succeeded;
        self.record_output(output);
        self.finished_at = Some(now_millis);
        Ok(())
    }

    /// Failure from Running, or fast-fail straight from Pending
    pub fn fail(
        &mut self,
        now_millis: i64,
        output: Option<ExecutionOutput>,
        reason: Option<String>,
    ) -> Result<()> {
        self.transition(
            &[ExecutionState::Pending, ExecutionState::Running],
            ExecutionState::Failed,
        )?;
        self.state = ExecutionState::Failed;
        if let Some(output) = output {
            self.record_output(output);
        }
        self.started_at.get_or_insert(now_millis);
        self.finished_at = Some(now_millis);
        self.reason = reason;
        Ok(())
    }

    pub fn time_out(&mut self, now_millis: i64, reason: impl Into<String>) -> Result<()> {
        self.transition(&[ExecutionState::Running], ExecutionState::TimedOut)?;
        self.state = ExecutionState::TimedOut;
        self.finished_at = Some(now_millis);
        self.reason = Some(reason.into());
        Ok(())
    }
}

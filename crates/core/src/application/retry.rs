// Retry pass selection
use crate::domain::{ExecutionState, ResultSet, Target, TargetExecution};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Retry decision for one execution
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Skip,
}

/// Which terminal outcomes are eligible for a retry pass
///
/// Succeeded and in-flight executions are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySelection {
    pub failed: bool,
    pub timed_out: bool,
}

impl Default for RetrySelection {
    fn default() -> Self {
        Self {
            failed: true,
            timed_out: true,
        }
    }
}

impl RetrySelection {
    pub fn failed_only() -> Self {
        Self {
            failed: true,
            timed_out: false,
        }
    }

    pub fn timed_out_only() -> Self {
        Self {
            failed: false,
            timed_out: true,
        }
    }

    pub fn decide(&self, execution: &TargetExecution) -> RetryDecision {
        let eligible = match execution.state {
            ExecutionState::Failed => self.failed,
            ExecutionState::TimedOut => self.timed_out,
            _ => false,
        };
        if eligible {
            RetryDecision::Retry
        } else {
            RetryDecision::Skip
        }
    }

    /// Targets of `result_set` to send again, sorted by id
    pub fn select(&self, result_set: &ResultSet) -> Vec<Target> {
        let targets: Vec<Target> = result_set
            .executions
            .values()
            .filter(|e| self.decide(e) == RetryDecision::Retry)
            .filter_map(|e| result_set.dispatch.target(&e.target_id).cloned())
            .collect();

        debug!(
            dispatch_id = %result_set.dispatch_id(),
            selected = targets.len(),
            failed = self.failed,
            timed_out = self.timed_out,
            "Selected retry targets"
        );
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CommandPayload, Dispatch, DispatchMetadata, ExecutionOutput};
    use std::collections::BTreeMap;

    fn result_set() -> ResultSet {
        let targets = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|id| Target::new(*id, true))
            .collect();
        let dispatch = Dispatch::new(
            "cmd-1".to_string(),
            0,
            CommandPayload::new(["uptime"]).unwrap(),
            targets,
            DispatchMetadata::default(),
        )
        .unwrap();

        let mut executions = BTreeMap::new();
        let mut ok = TargetExecution::pending("a");
        ok.start(1).unwrap();
        ok.succeed(2, ExecutionOutput::default()).unwrap();
        executions.insert("a".to_string(), ok);

        let mut failed = TargetExecution::pending("b");
        failed.fail(1, None, Some("unreachable".to_string())).unwrap();
        executions.insert("b".to_string(), failed);

        let mut timed_out = TargetExecution::pending("c");
        timed_out.start(1).unwrap();
        timed_out.time_out(5, "no report").unwrap();
        executions.insert("c".to_string(), timed_out);

        let mut running = TargetExecution::pending("d");
        running.start(1).unwrap();
        executions.insert("d".to_string(), running);

        executions.insert("e".to_string(), TargetExecution::pending("e"));

        ResultSet::new(dispatch, executions)
    }

    fn ids(targets: &[Target]) -> Vec<&str> {
        targets.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_default_selects_failed_and_timed_out() {
        let rs = result_set();
        assert_eq!(ids(&RetrySelection::default().select(&rs)), ["b", "c"]);
    }

    #[test]
    fn test_narrow_selections() {
        let rs = result_set();
        assert_eq!(ids(&RetrySelection::failed_only().select(&rs)), ["b"]);
        assert_eq!(ids(&RetrySelection::timed_out_only().select(&rs)), ["c"]);

        let none = RetrySelection {
            failed: false,
            timed_out: false,
        };
        assert!(none.select(&rs).is_empty());
    }

    #[test]
    fn test_non_terminal_and_succeeded_are_skipped() {
        let rs = result_set();
        let selection = RetrySelection::default();
        for id in ["a", "d", "e"] {
            assert_eq!(selection.decide(rs.get(id).unwrap()), RetryDecision::Skip, "{}", id);
        }
    }
}

// Result Set - aggregated executions of one dispatch

use crate::domain::dispatch::{Dispatch, DispatchState};
use crate::domain::execution::{ExecutionState, TargetExecution};
use crate::domain::target::TargetId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// All executions of one dispatch, keyed by target id.
///
/// Key set is a subset of the dispatch's target set and equals it once the
/// dispatch is `Completed`. Map order carries no meaning beyond making
/// snapshots and exports reproducible.
///
/// `state` is written out but never read back: a loaded report derives it
/// from its executions again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredResultSet")]
pub struct ResultSet {
    pub dispatch: Dispatch,
    pub state: DispatchState,
    pub executions: BTreeMap<TargetId, TargetExecution>,
}

#[derive(Deserialize)]
struct StoredResultSet {
    dispatch: Dispatch,
    executions: BTreeMap<TargetId, TargetExecution>,
}

impl From<StoredResultSet> for ResultSet {
    fn from(stored: StoredResultSet) -> Self {
        ResultSet::new(stored.dispatch, stored.executions)
    }
}

/// Per-state counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl ResultSet {
    pub fn new(dispatch: Dispatch, executions: BTreeMap<TargetId, TargetExecution>) -> Self {
        let state = DispatchState::derive(executions.values());
        Self {
            dispatch,
            state,
            executions,
        }
    }

    pub fn dispatch_id(&self) -> &str {
        &self.dispatch.id
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    pub fn is_completed(&self) -> bool {
        self.state == DispatchState::Completed
    }

    pub fn get(&self, target_id: &str) -> Option<&TargetExecution> {
        self.executions.get(target_id)
    }

    /// Executions currently in any of the given states
    pub fn in_states<'a>(
        &'a self,
        states: &'a [ExecutionState],
    ) -> impl Iterator<Item = &'a TargetExecution> + 'a {
        self.executions
            .values()
            .filter(move |e| states.contains(&e.state))
    }

    pub fn summary(&self) -> ResultSummary {
        let mut summary = ResultSummary {
            total: self.executions.len(),
            ..Default::default()
        };
        for exec in self.executions.values() {
            match exec.state {
                ExecutionState::Pending => summary.pending += 1,
                ExecutionState::Running => summary.running += 1,
                ExecutionState::Succeeded => summary.succeeded += 1,
                ExecutionState::Failed => summary.failed += 1,
                ExecutionState::TimedOut => summary.timed_out += 1,
            }
        }
        summary
    }
}

impl std::fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} targets: {} succeeded, {} failed, {} timed out",
            self.total, self.succeeded, self.failed, self.timed_out
        )?;
        let in_flight = self.pending + self.running;
        if in_flight > 0 {
            write!(f, ", {} in flight", in_flight)?;
        }
        Ok(())
    }
}

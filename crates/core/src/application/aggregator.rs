//! Result Aggregator - owns the per-target execution records of every
//! in-flight dispatch and answers snapshot queries.
//!
//! Each target slot is locked on its own, so completions for different
//! targets never contend or overwrite each other. Overall state is derived
//! from the slots on every read.

use crate::domain::{
    Dispatch, DispatchId, ExecutionOutput, ExecutionState, ResultSet, TargetExecution, TargetId,
};
use crate::error::{AppError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Completion signal sent by a worker unit for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionEvent {
    pub target_id: TargetId,
    pub at: i64, // epoch ms
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Transport accepted the send
    Started,
    Succeeded(ExecutionOutput),
    Failed {
        output: Option<ExecutionOutput>,
        reason: Option<String>,
    },
    TimedOut {
        reason: String,
    },
}

impl ExecutionEvent {
    pub fn new(target_id: impl Into<String>, at: i64, kind: EventKind) -> Self {
        Self {
            target_id: target_id.into(),
            at,
            kind,
        }
    }
}

struct DispatchEntry {
    dispatch: Dispatch,
    slots: BTreeMap<TargetId, Mutex<TargetExecution>>,
    finished: AtomicUsize,
    completed: watch::Sender<bool>,
}

impl DispatchEntry {
    async fn snapshot(&self) -> ResultSet {
        let mut executions = BTreeMap::new();
        for (target_id, slot) in &self.slots {
            executions.insert(target_id.clone(), slot.lock().await.clone());
        }
        ResultSet::new(self.dispatch.clone(), executions)
    }
}

/// Result Aggregator
#[derive(Default)]
pub struct ResultAggregator {
    dispatches: RwLock<HashMap<DispatchId, Arc<DispatchEntry>>>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, dispatch_id: &str) -> Result<Arc<DispatchEntry>> {
        self.dispatches
            .read()
            .await
            .get(dispatch_id)
            .cloned()
            .ok_or_else(|| AppError::UnknownDispatch(dispatch_id.to_string()))
    }

    /// Start tracking a dispatch; every target begins as Pending
    pub async fn register(&self, dispatch: Dispatch) -> Result<()> {
        let mut dispatches = self.dispatches.write().await;
        if dispatches.contains_key(&dispatch.id) {
            return Err(AppError::DispatchCreation(format!(
                "dispatch id already in use: {}",
                dispatch.id
            )));
        }

        let slots = dispatch
            .target_ids()
            .map(|id| (id.to_string(), Mutex::new(TargetExecution::pending(id))))
            .collect();
        let (completed, _) = watch::channel(false);

        debug!(dispatch_id = %dispatch.id, targets = dispatch.targets.len(), "Dispatch registered");
        dispatches.insert(
            dispatch.id.clone(),
            Arc::new(DispatchEntry {
                dispatch,
                slots,
                finished: AtomicUsize::new(0),
                completed,
            }),
        );
        Ok(())
    }

    /// Apply one worker event to its target's slot
    ///
    /// Returns the slot's new state. Illegal transitions are rejected and
    /// leave the slot untouched.
    pub async fn apply(&self, dispatch_id: &str, event: ExecutionEvent) -> Result<ExecutionState> {
        let entry = self.entry(dispatch_id).await?;
        let slot = entry.slots.get(&event.target_id).ok_or_else(|| {
            AppError::Internal(format!(
                "target {} is not part of dispatch {}",
                event.target_id, dispatch_id
            ))
        })?;

        let state = {
            let mut exec = slot.lock().await;
            let applied = match event.kind {
                EventKind::Started => exec.start(event.at),
                EventKind::Succeeded(output) => exec.succeed(event.at, output),
                EventKind::Failed { output, reason } => exec.fail(event.at, output, reason),
                EventKind::TimedOut { reason } => exec.time_out(event.at, reason),
            };
            if let Err(e) = applied {
                warn!(dispatch_id = %dispatch_id, error = %e, "Rejected execution event");
                return Err(e.into());
            }
            exec.state
        };

        debug!(
            dispatch_id = %dispatch_id,
            target_id = %event.target_id,
            state = %state,
            "Execution updated"
        );

        if state.is_terminal() {
            let finished = entry.finished.fetch_add(1, Ordering::SeqCst) + 1;
            if finished == entry.slots.len() {
                info!(dispatch_id = %dispatch_id, targets = finished, "All targets reached a terminal state");
                entry.completed.send_replace(true);
            }
        }
        Ok(state)
    }

    /// Current result set (partial while the dispatch is running)
    pub async fn snapshot(&self, dispatch_id: &str) -> Result<ResultSet> {
        let entry = self.entry(dispatch_id).await?;
        Ok(entry.snapshot().await)
    }

    /// Wait until the dispatch completes or `timeout` elapses
    ///
    /// On timeout the partial snapshot is returned rather than an error.
    pub async fn await_completion(&self, dispatch_id: &str, timeout: Duration) -> Result<ResultSet> {
        let entry = self.entry(dispatch_id).await?;
        let mut rx = entry.completed.subscribe();

        let completed = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|done| *done)).await,
            Ok(Ok(_))
        );
        if !completed {
            warn!(
                dispatch_id = %dispatch_id,
                timeout_ms = timeout.as_millis() as u64,
                "Caller timeout elapsed, returning partial results"
            );
        }

        Ok(entry.snapshot().await)
    }

    /// Fail every target that has not reached a terminal state
    ///
    /// Returns how many targets were failed.
    pub async fn fail_unfinished(&self, dispatch_id: &str, now_millis: i64, reason: &str) -> Result<usize> {
        let entry = self.entry(dispatch_id).await?;
        let unfinished: Vec<TargetId> = {
            let mut ids = Vec::new();
            for (target_id, slot) in &entry.slots {
                if !slot.lock().await.state.is_terminal() {
                    ids.push(target_id.clone());
                }
            }
            ids
        };

        let mut failed = 0;
        for target_id in unfinished {
            let event = ExecutionEvent::new(
                target_id,
                now_millis,
                EventKind::Failed {
                    output: None,
                    reason: Some(reason.to_string()),
                },
            );
            if self.apply(dispatch_id, event).await.is_ok() {
                failed += 1;
            }
        }
        Ok(failed)
    }

    /// Stop tracking a dispatch, returning its last snapshot
    ///
    /// Nothing is dropped automatically; hosts release a dispatch once its
    /// result set has been exported.
    pub async fn release(&self, dispatch_id: &str) -> Result<ResultSet> {
        let entry = self
            .dispatches
            .write()
            .await
            .remove(dispatch_id)
            .ok_or_else(|| AppError::UnknownDispatch(dispatch_id.to_string()))?;
        debug!(dispatch_id = %dispatch_id, "Dispatch released");
        Ok(entry.snapshot().await)
    }

    /// Ids of all tracked dispatches, sorted
    pub async fn dispatch_ids(&self) -> Vec<DispatchId> {
        let mut ids: Vec<DispatchId> = self.dispatches.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

// Per-target unit of work: send, then poll until a terminal report

use super::cancel::CancelToken;
use super::constants::CANCELLED_REASON;
use crate::application::aggregator::{EventKind, ExecutionEvent};
use crate::domain::{CommandPayload, ExecutionOutput, Target};
use crate::port::{ExecutionHandle, RemoteState, RemoteStatus, TimeProvider, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

pub(crate) struct TargetUnit {
    pub dispatch_id: String,
    pub target: Target,
    pub payload: Arc<CommandPayload>,
    pub transport: Arc<dyn Transport>,
    pub time_provider: Arc<dyn TimeProvider>,
    pub events: mpsc::UnboundedSender<ExecutionEvent>,
    pub cancel: CancelToken,
    pub target_timeout: Duration,
    pub poll_interval: Duration,
}

impl TargetUnit {
    fn emit(&self, kind: EventKind) {
        let event = ExecutionEvent::new(
            self.target.id.clone(),
            self.time_provider.now_millis(),
            kind,
        );
        if self.events.send(event).is_err() {
            warn!(
                dispatch_id = %self.dispatch_id,
                target_id = %self.target.id,
                "Result channel closed, dropping event"
            );
        }
    }

    fn failed(reason: impl Into<String>) -> EventKind {
        EventKind::Failed {
            output: None,
            reason: Some(reason.into()),
        }
    }

    pub async fn run(mut self) {
        if self.cancel.is_cancelled() {
            debug!(target_id = %self.target.id, "Dispatch cancelled before send");
            self.emit(Self::failed(CANCELLED_REASON));
            return;
        }

        let deadline = Instant::now() + self.target_timeout;

        let sent = timeout(
            self.target_timeout,
            self.transport.send(&self.target, &self.payload),
        )
        .await;
        let handle = match sent {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                warn!(
                    dispatch_id = %self.dispatch_id,
                    target_id = %self.target.id,
                    error = %e,
                    "Send rejected"
                );
                self.emit(Self::failed(e.to_string()));
                return;
            }
            Err(_) => {
                warn!(
                    dispatch_id = %self.dispatch_id,
                    target_id = %self.target.id,
                    "Send not accepted before timeout"
                );
                self.emit(Self::failed(format!(
                    "send not accepted within {}ms",
                    self.target_timeout.as_millis()
                )));
                return;
            }
        };

        self.emit(EventKind::Started);
        let outcome = self.await_report(&handle, deadline).await;
        info!(
            dispatch_id = %self.dispatch_id,
            target_id = %self.target.id,
            outcome = outcome_label(&outcome),
            "Target finished"
        );
        self.emit(outcome);
    }

    /// Poll until terminal, the per-target deadline, or cancellation
    async fn await_report(&mut self, handle: &ExecutionHandle, deadline: Instant) -> EventKind {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.give_up(handle, self.timed_out()).await;
            }

            match timeout(remaining, self.transport.poll(handle)).await {
                Err(_) => return self.give_up(handle, self.timed_out()).await,
                Ok(Err(e)) => return Self::failed(e.to_string()),
                Ok(Ok(status)) if status.is_terminal() => return classify(status),
                Ok(Ok(_)) => {}
            }

            // The attempt in flight has been observed; stop here if asked to
            if self.cancel.is_cancelled() {
                return self.give_up(handle, Self::failed(CANCELLED_REASON)).await;
            }

            let pause = self
                .poll_interval
                .min(deadline.saturating_duration_since(Instant::now()));
            tokio::select! {
                _ = sleep(pause) => {}
                _ = self.cancel.wait() => {
                    debug!(target_id = %self.target.id, "Cancel requested, finishing current attempt");
                }
            }
        }
    }

    /// Release the invocation before recording a non-reported outcome
    async fn give_up(&self, handle: &ExecutionHandle, outcome: EventKind) -> EventKind {
        debug!(
            target_id = %self.target.id,
            handle = %handle.id,
            "Abandoning invocation"
        );
        self.transport.abandon(handle).await;
        outcome
    }

    fn timed_out(&self) -> EventKind {
        EventKind::TimedOut {
            reason: format!(
                "no terminal report within {}ms",
                self.target_timeout.as_millis()
            ),
        }
    }
}

/// Map a terminal remote status to an execution outcome
pub(crate) fn classify(status: RemoteStatus) -> EventKind {
    let output = ExecutionOutput {
        response_code: status.response_code,
        stdout: status.stdout,
        stderr: status.stderr,
    };
    match status.state {
        RemoteState::Success if matches!(output.response_code, None | Some(0)) => {
            EventKind::Succeeded(output)
        }
        RemoteState::TimedOut => EventKind::TimedOut {
            reason: "agent reported timeout".to_string(),
        },
        _ => {
            let reason = output
                .response_code
                .map(|code| format!("exit code {}", code));
            EventKind::Failed {
                output: Some(output),
                reason,
            }
        }
    }
}

fn outcome_label(kind: &EventKind) -> &'static str {
    match kind {
        EventKind::Started => "started",
        EventKind::Succeeded(_) => "succeeded",
        EventKind::Failed { .. } => "failed",
        EventKind::TimedOut { .. } => "timed_out",
    }
}

// Transport Port
// Abstraction for reaching a target's agent: send a payload, poll its status

use crate::domain::{CommandPayload, Target, TargetId};
use async_trait::async_trait;
use thiserror::Error;

/// Opaque reference to one invocation on one target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionHandle {
    pub id: String,
    pub target_id: TargetId,
}

/// Remote invocation state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    InProgress,
    /// Finished; the response code decides success
    Success,
    Failed,
    /// The agent itself gave up on the invocation
    TimedOut,
}

/// Result of one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStatus {
    pub state: RemoteState,
    pub response_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteStatus {
    pub fn in_progress() -> Self {
        Self {
            state: RemoteState::InProgress,
            response_code: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Terminal report from a finished process
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            state: if code == 0 {
                RemoteState::Success
            } else {
                RemoteState::Failed
            },
            response_code: Some(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state != RemoteState::InProgress
    }
}

/// Transport errors
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Target unreachable: {0}")]
    Unreachable(String),

    #[error("Send rejected: {0}")]
    Rejected(String),

    #[error("Unknown execution handle: {0}")]
    UnknownHandle(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Transport trait
///
/// Implementations:
/// - SubprocessTransport: runs a command template (local shell, ssh, ...)
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the payload on a target
    ///
    /// # Errors
    /// - TransportError::Unreachable / Rejected when the send fails outright
    async fn send(
        &self,
        target: &Target,
        payload: &CommandPayload,
    ) -> Result<ExecutionHandle, TransportError>;

    /// Query the current status of a started invocation
    async fn poll(&self, handle: &ExecutionHandle) -> Result<RemoteStatus, TransportError>;

    /// Stop tracking an invocation the caller no longer waits for
    ///
    /// Called after a per-target timeout or a cancel. Implementations that can
    /// stop the remote work should do so; the handle is invalid afterwards.
    async fn abandon(&self, _handle: &ExecutionHandle) {}
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock transport behavior for one target
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Exit 0 with the given stdout
        Succeed(String),
        /// Exit with code and stderr
        Exit(i32, String),
        /// Send fails outright
        Reject(String),
        /// Never reports a terminal state
        Hang,
        /// Poll returns a transport error
        PollError(String),
        /// Agent reports its own timeout
        RemoteTimeout,
        /// Panic inside poll (for worker isolation testing)
        Panic(String),
    }

    /// Mock Transport for testing
    pub struct MockTransport {
        default: MockBehavior,
        behaviors: Mutex<HashMap<String, MockBehavior>>,
        polls_before_report: usize,
        send_delay: Duration,
        polls: Mutex<HashMap<String, usize>>,
        send_count: AtomicUsize,
        poll_count: AtomicUsize,
        abandon_count: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockTransport {
        pub fn new(default: MockBehavior) -> Self {
            Self {
                default,
                behaviors: Mutex::new(HashMap::new()),
                polls_before_report: 0,
                send_delay: Duration::ZERO,
                polls: Mutex::new(HashMap::new()),
                send_count: AtomicUsize::new(0),
                poll_count: AtomicUsize::new(0),
                abandon_count: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Succeed("mock output".to_string()))
        }

        /// Override the behavior for one target
        pub fn with_target(self, target_id: impl Into<String>, behavior: MockBehavior) -> Self {
            self.behaviors
                .lock()
                .unwrap()
                .insert(target_id.into(), behavior);
            self
        }

        /// Report InProgress for the first `polls` polls of every invocation
        pub fn with_polls_before_report(mut self, polls: usize) -> Self {
            self.polls_before_report = polls;
            self
        }

        pub fn with_send_delay(mut self, delay: Duration) -> Self {
            self.send_delay = delay;
            self
        }

        pub fn send_count(&self) -> usize {
            self.send_count.load(Ordering::SeqCst)
        }

        pub fn poll_count(&self) -> usize {
            self.poll_count.load(Ordering::SeqCst)
        }

        pub fn abandon_count(&self) -> usize {
            self.abandon_count.load(Ordering::SeqCst)
        }

        /// Highest number of invocations in flight at the same time
        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        fn behavior_for(&self, target_id: &str) -> MockBehavior {
            self.behaviors
                .lock()
                .unwrap()
                .get(target_id)
                .cloned()
                .unwrap_or_else(|| self.default.clone())
        }

        fn finish(&self) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(
            &self,
            target: &Target,
            _payload: &CommandPayload,
        ) -> Result<ExecutionHandle, TransportError> {
            let n = self.send_count.fetch_add(1, Ordering::SeqCst);
            let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

            if !self.send_delay.is_zero() {
                tokio::time::sleep(self.send_delay).await;
            }

            if let MockBehavior::Reject(msg) = self.behavior_for(&target.id) {
                self.finish();
                return Err(TransportError::Unreachable(msg));
            }

            Ok(ExecutionHandle {
                id: format!("{}-{}", target.id, n),
                target_id: target.id.clone(),
            })
        }

        async fn poll(&self, handle: &ExecutionHandle) -> Result<RemoteStatus, TransportError> {
            self.poll_count.fetch_add(1, Ordering::SeqCst);

            let seen = {
                let mut polls = self.polls.lock().unwrap();
                let count = polls.entry(handle.id.clone()).or_insert(0);
                *count += 1;
                *count
            };
            if seen <= self.polls_before_report {
                return Ok(RemoteStatus::in_progress());
            }

            let status = match self.behavior_for(&handle.target_id) {
                MockBehavior::Succeed(stdout) => RemoteStatus::exited(0, stdout, ""),
                MockBehavior::Exit(code, stderr) => RemoteStatus::exited(code, "", stderr),
                MockBehavior::Hang => return Ok(RemoteStatus::in_progress()),
                MockBehavior::RemoteTimeout => RemoteStatus {
                    state: RemoteState::TimedOut,
                    ..RemoteStatus::in_progress()
                },
                MockBehavior::PollError(msg) => {
                    self.finish();
                    return Err(TransportError::Io(msg));
                }
                MockBehavior::Panic(msg) => panic!("{}", msg),
                MockBehavior::Reject(msg) => {
                    return Err(TransportError::UnknownHandle(format!(
                        "{} ({})",
                        handle.id, msg
                    )))
                }
            };
            self.finish();
            Ok(status)
        }

        async fn abandon(&self, _handle: &ExecutionHandle) {
            self.abandon_count.fetch_add(1, Ordering::SeqCst);
            self.finish();
        }
    }
}

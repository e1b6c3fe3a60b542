// Dispatch constants (no magic values)

/// Default number of targets worked on at once per dispatch
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Default per-target timeout, measured from the send (60s)
pub const DEFAULT_TARGET_TIMEOUT_MS: u64 = 60_000;

/// Default pause between two polls of the same invocation (500ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Failure reason recorded for targets stopped by a cancel request
pub const CANCELLED_REASON: &str = "cancelled";

/// Failure reason recorded when a worker died before reporting
pub const WORKER_ABORTED_REASON: &str = "worker aborted";

// Dispatch Engine - fan a command out to a target set and track every execution

mod cancel;
pub mod config;
pub mod constants;
mod unit;
mod worker_pool;

pub use cancel::{cancel_channel, CancelHandle, CancelToken};
pub use config::DispatchConfig;
pub use worker_pool::WorkerPool;

use crate::application::aggregator::ResultAggregator;
use crate::application::retry::RetrySelection;
use crate::domain::{CommandPayload, Dispatch, DispatchId, DispatchMetadata, ResultSet, Target};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, TimeProvider, Transport};
use constants::WORKER_ABORTED_REASON;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use unit::TargetUnit;

/// Dispatch request
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub commands: Vec<String>,
    pub targets: Vec<Target>,
    pub metadata: DispatchMetadata,
    /// Overrides `DispatchConfig::target_timeout_ms` for this dispatch
    pub target_timeout: Option<Duration>,
    pub retry_of: Option<DispatchId>,
}

impl DispatchRequest {
    pub fn new<I, S>(commands: I, targets: Vec<Target>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
            targets,
            metadata: DispatchMetadata::default(),
            target_timeout: None,
            retry_of: None,
        }
    }

    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.metadata.document = document.into();
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.metadata.comment = Some(comment.into());
        self
    }

    pub fn with_target_timeout(mut self, timeout: Duration) -> Self {
        self.target_timeout = Some(timeout);
        self
    }
}

type Cancellations = Arc<Mutex<HashMap<DispatchId, CancelHandle>>>;

/// Dispatch Engine
pub struct DispatchEngine {
    transport: Arc<dyn Transport>,
    aggregator: Arc<ResultAggregator>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    config: DispatchConfig,
    cancellations: Cancellations,
}

impl DispatchEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        aggregator: Arc<ResultAggregator>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            transport,
            aggregator,
            id_provider,
            time_provider,
            config,
            cancellations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn aggregator(&self) -> &Arc<ResultAggregator> {
        &self.aggregator
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Validate the request and build the Dispatch record (no side effects)
    fn create(&self, request: DispatchRequest) -> Result<Dispatch> {
        let payload = CommandPayload::new(request.commands)
            .map_err(|e| AppError::DispatchCreation(e.to_string()))?;

        if request.metadata.document.trim().is_empty() {
            return Err(AppError::DispatchCreation(
                "document name is empty".to_string(),
            ));
        }

        let id = self.id_provider.generate_id();
        let created_at = self.time_provider.now_millis();

        let mut dispatch = Dispatch::new(id, created_at, payload, request.targets, request.metadata)
            .map_err(|e| AppError::DispatchCreation(e.to_string()))?;
        dispatch.retry_of = request.retry_of;
        Ok(dispatch)
    }

    /// Create a dispatch and start the fan-out
    ///
    /// Returns as soon as the dispatch is registered; results can be polled
    /// through the aggregator right away while sends are still going out.
    ///
    /// # Errors
    /// - AppError::DispatchCreation for an empty/blank command list or an
    ///   empty/duplicated target set; nothing is sent in that case
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchId> {
        let target_timeout = request
            .target_timeout
            .unwrap_or_else(|| self.config.target_timeout());

        let dispatch = self.create(request).map_err(|e| {
            warn!(error = %e, "Dispatch rejected");
            e
        })?;
        let dispatch_id = dispatch.id.clone();

        self.aggregator.register(dispatch.clone()).await?;
        let (cancel_handle, cancel_token) = cancel_channel();
        self.cancellations
            .lock()
            .await
            .insert(dispatch_id.clone(), cancel_handle);

        info!(
            dispatch_id = %dispatch_id,
            document = %dispatch.metadata.document,
            targets = dispatch.targets.len(),
            commands = dispatch.payload.commands().len(),
            max_concurrency = self.config.max_concurrency,
            target_timeout_ms = target_timeout.as_millis() as u64,
            retry_of = ?dispatch.retry_of,
            "Dispatch created"
        );

        let fan_out = FanOut {
            transport: Arc::clone(&self.transport),
            aggregator: Arc::clone(&self.aggregator),
            time_provider: Arc::clone(&self.time_provider),
            cancellations: Arc::clone(&self.cancellations),
            max_concurrency: self.config.max_concurrency,
            poll_interval: self.config.poll_interval(),
            target_timeout,
        };
        tokio::spawn(fan_out.run(dispatch, cancel_token));

        Ok(dispatch_id)
    }

    /// Request cooperative cancellation
    ///
    /// Returns true if the dispatch was still in flight.
    pub async fn cancel(&self, dispatch_id: &str) -> Result<bool> {
        let snapshot = self.aggregator.snapshot(dispatch_id).await?;
        if snapshot.is_completed() {
            return Ok(false);
        }

        match self.cancellations.lock().await.get(dispatch_id) {
            Some(handle) => {
                if handle.cancel() {
                    info!(dispatch_id = %dispatch_id, "Dispatch cancellation requested");
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Start a retry pass over a previous dispatch's failed targets
    ///
    /// Always creates a new dispatch; the previous result set is only read.
    pub async fn retry(&self, previous: &ResultSet, selection: RetrySelection) -> Result<DispatchId> {
        let targets = selection.select(previous);
        if targets.is_empty() {
            return Err(AppError::DispatchCreation(format!(
                "no targets eligible for retry in dispatch {}",
                previous.dispatch_id()
            )));
        }

        let original = &previous.dispatch;
        let comment = match &original.metadata.comment {
            Some(c) => format!("retry of {}: {}", original.id, c),
            None => format!("retry of {}", original.id),
        };

        info!(
            dispatch_id = %original.id,
            targets = targets.len(),
            "Starting retry pass"
        );

        let request = DispatchRequest {
            commands: original.payload.commands().to_vec(),
            targets,
            metadata: DispatchMetadata {
                document: original.metadata.document.clone(),
                comment: Some(comment),
            },
            target_timeout: None,
            retry_of: Some(original.id.clone()),
        };
        self.dispatch(request).await
    }
}

/// Background side of one dispatch: worker pool plus result collector
struct FanOut {
    transport: Arc<dyn Transport>,
    aggregator: Arc<ResultAggregator>,
    time_provider: Arc<dyn TimeProvider>,
    cancellations: Cancellations,
    max_concurrency: usize,
    poll_interval: Duration,
    target_timeout: Duration,
}

impl FanOut {
    async fn run(self, dispatch: Dispatch, cancel: CancelToken) {
        let dispatch_id = dispatch.id.clone();
        let payload = Arc::new(dispatch.payload);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let mut pool = WorkerPool::new(self.max_concurrency);
        for target in dispatch.targets {
            let unit = TargetUnit {
                dispatch_id: dispatch_id.clone(),
                target,
                payload: Arc::clone(&payload),
                transport: Arc::clone(&self.transport),
                time_provider: Arc::clone(&self.time_provider),
                events: events_tx.clone(),
                cancel: cancel.clone(),
                target_timeout: self.target_timeout,
                poll_interval: self.poll_interval,
            };
            pool.spawn(unit.run());
        }
        drop(events_tx);

        // Collector: the only writer of this dispatch's result set
        while let Some(event) = events_rx.recv().await {
            if let Err(e) = self.aggregator.apply(&dispatch_id, event).await {
                error!(dispatch_id = %dispatch_id, error = %e, "Failed to record execution event");
            }
        }

        let panicked = pool.join().await;
        let now = self.time_provider.now_millis();
        match self
            .aggregator
            .fail_unfinished(&dispatch_id, now, WORKER_ABORTED_REASON)
            .await
        {
            Ok(0) => {}
            Ok(n) => warn!(
                dispatch_id = %dispatch_id,
                targets = n,
                panicked = panicked,
                "Targets left unfinished by their worker were failed"
            ),
            // Released by its host as soon as it completed
            Err(AppError::UnknownDispatch(_)) => {
                debug!(dispatch_id = %dispatch_id, "Dispatch released before close-out")
            }
            Err(e) => warn!(dispatch_id = %dispatch_id, error = %e, "Could not close out dispatch"),
        }

        self.cancellations.lock().await.remove(&dispatch_id);

        if let Ok(result_set) = self.aggregator.snapshot(&dispatch_id).await {
            info!(
                dispatch_id = %dispatch_id,
                state = %result_set.state,
                summary = %result_set.summary(),
                "Dispatch finished"
            );
        }
    }
}

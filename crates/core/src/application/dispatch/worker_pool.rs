// Bounded worker pool (task + semaphore)

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

/// Runs units of work with at most `size` of them active at once.
///
/// Every unit is spawned immediately as its own task and parks on the
/// semaphore until a slot frees up, so a panicking or slow unit never holds
/// back its siblings beyond its own slot.
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
    tasks: JoinSet<()>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            tasks: JoinSet::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue one unit; it starts once a slot is free
    pub fn spawn<F>(&mut self, unit: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            unit.await;
        });
    }

    /// Wait for every unit to end. Returns how many panicked.
    pub async fn join(mut self) -> usize {
        let mut panicked = 0;
        while let Some(result) = self.tasks.join_next().await {
            if let Err(join_err) = result {
                if join_err.is_panic() {
                    error!(error = ?join_err, "Worker unit panicked");
                    panicked += 1;
                } else {
                    error!(error = ?join_err, "Worker unit cancelled");
                }
            }
        }
        panicked
    }
}

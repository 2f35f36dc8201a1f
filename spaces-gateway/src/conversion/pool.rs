use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::runner::{self, CompletionSignal};
use super::{ConversionError, ConversionJob, ConversionOutcome};

/// Bounded executor for conversion jobs.
///
/// At most `max_concurrent` child processes run at once and at most
/// `queue_capacity` more requests wait for a slot. Anything beyond that is
/// rejected with `ConversionError::QueueFull` instead of spawning.
#[derive(Clone)]
pub struct ConversionPool {
    running: Arc<Semaphore>,
    admission: Arc<Semaphore>,
    max_concurrent: usize,
    queue_capacity: usize,
}

impl ConversionPool {
    pub fn new(max_concurrent: usize, queue_capacity: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        info!(max_concurrent, queue_capacity, "Conversion pool initialized");

        Self {
            running: Arc::new(Semaphore::new(max_concurrent)),
            admission: Arc::new(Semaphore::new(max_concurrent + queue_capacity)),
            max_concurrent,
            queue_capacity,
        }
    }

    /// Admit a job, run it once a slot frees up, and wait for its outcome.
    ///
    /// The process is driven by a spawned task that owns the job, so it keeps
    /// its slot and its staged input until it exits even if the caller stops
    /// waiting.
    pub async fn submit(&self, job: ConversionJob) -> Result<ConversionOutcome, ConversionError> {
        let admitted = self.admission.clone().try_acquire_owned().map_err(|_| {
            warn!(job_id = %job.id, "Rejecting conversion: queue is full");
            ConversionError::QueueFull {
                capacity: self.max_concurrent + self.queue_capacity,
            }
        })?;

        let running = Arc::clone(&self.running);
        let (mut signal, outcome) = CompletionSignal::channel(job.id);

        tokio::spawn(async move {
            let slot = match running.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    drop(admitted);
                    signal.complete(ConversionOutcome::StartupError {
                        message: "conversion pool is closed".to_string(),
                    });
                    return;
                }
            };

            debug!(job_id = %job.id, "Conversion slot acquired");
            let result = runner::run(&job).await;

            // The staged input lives exactly as long as the job
            drop(job);

            // Capacity is released before the requester hears back
            drop(slot);
            drop(admitted);
            signal.complete(result);
        });

        outcome.await.map_err(|_| ConversionError::Aborted)
    }

    /// Jobs currently holding a process slot
    pub fn running_jobs(&self) -> usize {
        self.max_concurrent - self.running.available_permits()
    }

    /// Requests that can still be admitted before rejection
    pub fn available_capacity(&self) -> usize {
        self.admission.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

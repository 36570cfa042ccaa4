//! Background worker that runs the pipeline off the upload path.

use crate::processing::pipeline::Pipeline;
use crate::records::FileRecord;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A unit of work handed from the upload path to the worker.
#[derive(Debug)]
pub(crate) struct ProcessingJob {
    pub record_id: Uuid,
    pub done: Option<oneshot::Sender<Option<FileRecord>>>,
}

/// Ids with a job queued or running.
#[derive(Debug, Default)]
struct Scheduled(Mutex<HashSet<Uuid>>);

impl Scheduled {
    fn claim(&self, id: Uuid) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).insert(id)
    }

    fn release(&self, id: Uuid) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
    }
}

/// Sending side of the job queue.
#[derive(Debug, Clone)]
pub(crate) struct WorkerHandle {
    sender: mpsc::UnboundedSender<ProcessingJob>,
    scheduled: Arc<Scheduled>,
}

impl WorkerHandle {
    /// Queue a job unless one for the same record is already queued or running.
    ///
    /// Returns `Ok(false)` for such a duplicate, and gives the job back when the worker has
    /// stopped.
    pub fn submit(&self, job: ProcessingJob) -> Result<bool, ProcessingJob> {
        let id = job.record_id;
        if !self.scheduled.claim(id) {
            tracing::debug!(file_id = %id, "Record already scheduled");
            return Ok(false);
        }
        self.sender.send(job).map(|()| true).map_err(|err| {
            self.scheduled.release(id);
            err.0
        })
    }
}

/// Waits for the worker to go idle after its handles are dropped.
#[derive(Debug)]
pub(crate) struct WorkerDrain {
    task: JoinHandle<()>,
    permits: Arc<Semaphore>,
    concurrency: u32,
}

impl WorkerDrain {
    /// Resolve once the queue is empty and every in-flight job has finished.
    pub async fn wait(self) {
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "Processing worker ended abnormally");
        }
        let _ = self.permits.acquire_many(self.concurrency).await;
    }
}

/// Start the worker loop on the current runtime.
///
/// Each job runs in its own task; at most `concurrency` run at once. The loop ends when every
/// [`WorkerHandle`] has been dropped, letting in-flight jobs finish.
pub(crate) fn spawn_worker(
    pipeline: Arc<Pipeline>,
    concurrency: usize,
) -> (WorkerHandle, WorkerDrain) {
    let (sender, mut receiver) = mpsc::unbounded_channel::<ProcessingJob>();
    let concurrency = u32::try_from(concurrency.max(1)).unwrap_or(u32::MAX >> 3);
    let permits = Arc::new(Semaphore::new(concurrency as usize));
    let loop_permits = permits.clone();
    let scheduled = Arc::new(Scheduled::default());
    let loop_scheduled = scheduled.clone();

    let task = tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            let Ok(permit) = loop_permits.clone().acquire_owned().await else {
                break;
            };
            let pipeline = pipeline.clone();
            let scheduled = loop_scheduled.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let outcome = match pipeline.process(job.record_id).await {
                    Ok(record) => record,
                    Err(err) => {
                        tracing::error!(file_id = %job.record_id, error = %err, "Processing job failed");
                        None
                    }
                };
                scheduled.release(job.record_id);
                if let Some(done) = job.done {
                    let _ = done.send(outcome);
                }
            });
        }
        tracing::debug!("Processing worker stopped");
    });

    (
        WorkerHandle { sender, scheduled },
        WorkerDrain {
            task,
            permits,
            concurrency,
        },
    )
}

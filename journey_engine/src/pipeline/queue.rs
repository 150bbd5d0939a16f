//! Non-blocking handoff between the webhook receiver and the pipeline.
//!
//! The receiver pushes event ids onto a bounded channel and returns immediately; a worker drains the channel and
//! runs the pipeline, keeping a bounded number of events in flight at once. Retries are re-delivered through the
//! same channel after their backoff delay has elapsed on a timer task.

use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use log::{debug, warn};
use tokio::sync::mpsc;

use crate::{
    db_types::EventId,
    pipeline::{EventPipeline, ProcessOutcome},
    traits::{EventManagement, JourneyManagement, TransferManagement},
};

/// How many events the worker processes concurrently.
pub const MAX_CONCURRENT_EVENTS: usize = 8;

#[derive(Debug, Clone)]
pub struct PipelineJob {
    pub event_id: EventId,
}

/// The sending half of the handoff. Cheap to clone; owned by the receiver.
#[derive(Clone)]
pub struct PipelineHandle {
    sender: mpsc::Sender<PipelineJob>,
}

impl PipelineHandle {
    /// A bare handle plus the receiving end, for callers that drain the channel themselves (tests, mostly).
    pub fn channel(buffer_size: usize) -> (Self, mpsc::Receiver<PipelineJob>) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        (Self { sender }, receiver)
    }

    /// Enqueues without waiting. Returns false (and logs) when the queue is saturated; the event stays `queued` in
    /// the store for operator replay rather than blocking the HTTP response.
    pub fn try_enqueue(&self, event_id: EventId) -> bool {
        match self.sender.try_send(PipelineJob { event_id }) {
            Ok(()) => true,
            Err(e) => {
                warn!("🔄️ Pipeline queue is saturated; event left in queued state: {e}");
                false
            },
        }
    }

    pub async fn enqueue(&self, event_id: EventId) -> bool {
        match self.sender.send(PipelineJob { event_id }).await {
            Ok(()) => true,
            Err(e) => {
                warn!("🔄️ Pipeline queue is closed: {e}");
                false
            },
        }
    }
}

/// Drains the job channel. Runs indefinitely; spawn it once from the composition root and do not await it.
pub struct PipelineWorker<B> {
    pipeline: Arc<EventPipeline<B>>,
    receiver: mpsc::Receiver<PipelineJob>,
    retry_sender: mpsc::Sender<PipelineJob>,
}

impl<B> PipelineWorker<B>
where B: EventManagement + TransferManagement + JourneyManagement
{
    pub fn new(pipeline: EventPipeline<B>, buffer_size: usize) -> (PipelineHandle, Self) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let worker = Self { pipeline: Arc::new(pipeline), receiver, retry_sender: sender.clone() };
        (PipelineHandle { sender }, worker)
    }

    pub async fn run(mut self) {
        debug!("🔄️ Pipeline worker started");
        let mut in_flight = FuturesUnordered::new();
        let mut closed = false;
        loop {
            tokio::select! {
                job = self.receiver.recv(), if !closed && in_flight.len() < MAX_CONCURRENT_EVENTS => match job {
                    Some(job) => in_flight.push(process_job(Arc::clone(&self.pipeline), job, self.retry_sender.clone())),
                    None => closed = true,
                },
                Some(()) = in_flight.next(), if !in_flight.is_empty() => {},
                else => break,
            }
        }
        debug!("🔄️ Pipeline worker has shut down");
    }
}

async fn process_job<B>(pipeline: Arc<EventPipeline<B>>, job: PipelineJob, retry: mpsc::Sender<PipelineJob>)
where B: EventManagement + TransferManagement + JourneyManagement {
    if let ProcessOutcome::Retry { delay } = pipeline.process_event(&job.event_id).await {
        // Deferred re-delivery; the timer task owns nothing but the job and the channel
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if retry.send(job).await.is_err() {
                warn!("🔄️ Could not re-deliver a retry job; the pipeline worker is gone");
            }
        });
    }
}

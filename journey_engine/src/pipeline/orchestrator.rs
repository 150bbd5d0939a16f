//! The event processing pipeline.
//!
//! Orchestrates enrichment and dispatch to resource-type processors, invokes the journey tracker, and manages the
//! retry-with-backoff and quarantine policy. Failures never escape this boundary as errors; they surface only as
//! processing-state transitions on the stored event.

use std::time::{Duration as StdDuration, Instant};

use chrono::{Duration, Utc};
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::{
    db_types::{EventId, ProcessingState, WebhookEvent},
    events::{EventProducers, EventQuarantinedEvent},
    journeys::JourneyTracker,
    pipeline::{EventProcessor, ProcessingContext, ProcessorError},
    traits::{EventApiError, EventManagement, JourneyApiError, JourneyManagement, TransferManagement},
};

/// An event is given up on after this many attempts.
pub const MAX_PROCESSING_ATTEMPTS: i64 = 3;
/// Events older than this are never retried; staleness makes replay pointless.
pub const MAX_EVENT_AGE_HOURS: i64 = 24;
/// Enrichment looks this far back for sibling events of the same resource.
pub const ENRICHMENT_WINDOW_HOURS: i64 = 24;
pub const ENRICHMENT_EVENT_CAP: i64 = 50;

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Event(#[from] EventApiError),
    #[error("{0}")]
    Journey(#[from] JourneyApiError),
    #[error("{0}")]
    Processor(#[from] ProcessorError),
}

impl PipelineError {
    /// Validation failures are permanent; retrying them cannot succeed.
    fn is_validation(&self) -> bool {
        matches!(self, PipelineError::Processor(ProcessorError::Validation(_)))
            || self.to_string().to_lowercase().contains("validation")
    }
}

/// The terminal disposition of one processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed,
    /// Requeued; the caller schedules re-delivery after the backoff delay.
    Retry { delay: StdDuration },
    Quarantined,
    /// Nothing was done (already completed, missing record, or the store was unreachable).
    Skipped,
}

pub struct EventPipeline<B> {
    db: B,
    tracker: JourneyTracker<B>,
    producers: EventProducers,
    processors: Vec<EventProcessor>,
}

impl<B> EventPipeline<B>
where B: EventManagement + TransferManagement + JourneyManagement
{
    pub fn new(db: B, tracker: JourneyTracker<B>, producers: EventProducers, processors: Vec<EventProcessor>) -> Self {
        Self { db, tracker, producers, processors }
    }

    /// Processes one stored event end to end. Never returns an error; every failure is converted into a state
    /// transition and reported through the outcome.
    pub async fn process_event(&self, event_id: &EventId) -> ProcessOutcome {
        let existing = match self.db.fetch_event_by_event_id(event_id).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                warn!("🔄️ Event {event_id} was queued but no longer exists in the store");
                return ProcessOutcome::Skipped;
            },
            Err(e) => {
                error!("🔄️ Could not load event {event_id}: {e}");
                return ProcessOutcome::Skipped;
            },
        };
        if matches!(existing.processing_state, ProcessingState::Completed | ProcessingState::Quarantined) {
            debug!("🔄️ Event {event_id} is already {}; nothing to do", existing.processing_state);
            return ProcessOutcome::Skipped;
        }
        let event = match self.db.begin_processing(event_id).await {
            Ok(event) => event,
            Err(e) => {
                error!("🔄️ Could not mark event {event_id} as processing: {e}");
                return ProcessOutcome::Skipped;
            },
        };
        debug!("🔄️ Processing event {event_id} (attempt {})", event.processing_attempts);
        let started = Instant::now();
        match self.run_stages(&event).await {
            Ok(()) => {
                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = started.elapsed().as_millis() as i64;
                match self.db.complete_event(event_id, duration_ms).await {
                    Ok(()) => {
                        debug!("🔄️ Event {event_id} completed in {duration_ms} ms");
                        ProcessOutcome::Completed
                    },
                    Err(e) => self.handle_failure(&event, PipelineError::Event(e)).await,
                }
            },
            Err(e) => self.handle_failure(&event, e).await,
        }
    }

    async fn run_stages(&self, event: &WebhookEvent) -> Result<(), PipelineError> {
        let mut ctx = ProcessingContext::new();
        if let Some(resource_id) = event.resource_id.as_deref() {
            let since = Utc::now() - Duration::hours(ENRICHMENT_WINDOW_HOURS);
            ctx.recent_events =
                self.db.fetch_recent_events_for_resource(resource_id, since, ENRICHMENT_EVENT_CAP).await?;
            ctx.active_instances = self.db.fetch_open_instances_for_resource(resource_id).await?;
        }
        match self.processors.iter().find(|p| p.can_process(event)) {
            Some(processor) => {
                debug!("🔄️ Dispatching event {} to the {} processor", event.event_id, processor.name());
                processor.process(&self.db, event, &mut ctx).await?;
            },
            None => debug!("🔄️ No processor registered for event {} ({})", event.event_id, event.event_type),
        }
        // Journey tracking is best-effort relative to the core domain-state mutation; its failures are recorded
        // but never fail the event
        if let Err(e) = self.tracker.process_event(event, &ctx).await {
            warn!("🔄️ Journey tracking failed for event {}: {e}", event.event_id);
        }
        Ok(())
    }

    async fn handle_failure(&self, event: &WebhookEvent, error: PipelineError) -> ProcessOutcome {
        let event_id = &event.event_id;
        let attempts = event.processing_attempts;
        let too_old = Utc::now() - event.effective_timestamp() > Duration::hours(MAX_EVENT_AGE_HOURS);
        let permanent = error.is_validation() || too_old;
        if !permanent && attempts < MAX_PROCESSING_ATTEMPTS {
            #[allow(clippy::cast_sign_loss)]
            let delay = StdDuration::from_secs(1u64 << (attempts as u64).min(16));
            warn!("🔄️ Event {event_id} failed on attempt {attempts}: {error}. Retrying in {}s", delay.as_secs());
            match self.db.requeue_event(event_id, &error.to_string()).await {
                Ok(()) => ProcessOutcome::Retry { delay },
                Err(e) => {
                    error!("🔄️ Could not requeue event {event_id}: {e}");
                    let _ = self.db.fail_event(event_id, &error.to_string()).await;
                    ProcessOutcome::Skipped
                },
            }
        } else {
            let reason = if permanent {
                format!("Permanent failure after {attempts} attempt(s): {error}")
            } else {
                format!("Retries exhausted after {attempts} attempt(s). Last error: {error}")
            };
            info!("🔄️ Quarantining event {event_id}: {reason}");
            if let Err(e) = self.db.quarantine_event(event_id, &reason).await {
                error!("🔄️ Could not quarantine event {event_id}: {e}");
                return ProcessOutcome::Skipped;
            }
            for producer in &self.producers.event_quarantined_producer {
                producer
                    .publish_event(EventQuarantinedEvent { event_id: event_id.clone(), reason: reason.clone() })
                    .await;
            }
            ProcessOutcome::Quarantined
        }
    }

    pub fn tracker(&self) -> &JourneyTracker<B> {
        &self.tracker
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

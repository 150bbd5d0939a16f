//! The journey tracker state machine.
//!
//! Consumes processed events plus their context, matches them against applicable journey definitions, and
//! creates/updates/finalises per-resource instances. Handles out-of-order arrivals, repeated-event conflicts,
//! stuck and abandoned detection and completion prediction.
//!
//! Instance updates are read-then-write; a keyed mutex per (definition, resource) pair serialises concurrent
//! updates so two in-flight events for the same resource cannot clobber each other's step index.

use std::{cmp::max, collections::HashMap, sync::Arc};

use chrono::{Duration, Utc};
use log::{debug, info, trace, warn};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::{
    db_types::{
        InstanceStatus,
        JourneyInstance,
        NewJourneyInstance,
        NewJourneyStep,
        WebhookEvent,
        OUT_OF_ORDER_SEQUENCE,
    },
    events::{EventProducers, JourneyCompletedEvent, JourneyFailedEvent},
    journeys::{ConflictResolution, JourneyDefinition},
    pipeline::ProcessingContext,
    traits::{JourneyApiError, JourneyManagement},
};

/// Instances with no qualifying event for this long are force-terminated by the abandonment sweep.
pub const ABANDONED_AFTER_DAYS: i64 = 7;
/// Stuck threshold for definitions that declare no timeout.
pub const DEFAULT_STUCK_THRESHOLD_MINUTES: i64 = 1440;
/// Estimated minutes for a remaining step with no upper timing bound.
pub const DEFAULT_STEP_ESTIMATE_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
}

/// What `process_event` did, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerSummary {
    pub instances_started: usize,
    pub instances_updated: usize,
    pub instances_abandoned: usize,
    pub instances_stuck: usize,
}

pub struct JourneyTracker<B> {
    db: B,
    producers: EventProducers,
    locks: Mutex<HashMap<(i64, String), Arc<Mutex<()>>>>,
}

impl<B> JourneyTracker<B>
where B: JourneyManagement
{
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers, locks: Mutex::new(HashMap::new()) }
    }

    /// Applies one processed event to every applicable journey definition, then runs the resource-scoped
    /// abandonment sweep. One definition's failure never blocks another's processing.
    pub async fn process_event(
        &self,
        event: &WebhookEvent,
        ctx: &ProcessingContext,
    ) -> Result<TrackerSummary, JourneyApiError> {
        let mut summary = TrackerSummary::default();
        let definitions = self.db.fetch_active_definitions().await?;
        let applicable = definitions.iter().filter(|d| d.config.0.references(event));
        for definition in applicable {
            match self.apply_definition(definition, event, ctx).await {
                Ok((started, updated)) => {
                    summary.instances_started += started;
                    summary.instances_updated += updated;
                },
                Err(e) => {
                    warn!(
                        "🧭️ Journey '{}' v{} could not process event {}: {e}",
                        definition.name, definition.version, event.event_id
                    );
                },
            }
        }
        // The sweeps are resource-scoped, not definition-scoped: any event touching the resource flushes out
        // instances of any definition that have gone quiet
        if let Some(resource_id) = event.resource_id.as_deref() {
            summary.instances_abandoned = self.sweep_abandoned(resource_id).await?;
            summary.instances_stuck = self.sweep_stuck(resource_id, &definitions).await?;
        }
        Ok(summary)
    }

    /// Force-terminates long-inactive instances of any definition for the given resource.
    pub async fn sweep_abandoned(&self, resource_id: &str) -> Result<usize, JourneyApiError> {
        let cutoff = Utc::now() - Duration::days(ABANDONED_AFTER_DAYS);
        let abandoned = self.db.abandon_instances_inactive_since(cutoff, Some(resource_id)).await?;
        for instance in &abandoned {
            info!(
                "🧭️ Journey instance #{} for resource {} abandoned after {} days of inactivity",
                instance.id, instance.resource_id, ABANDONED_AFTER_DAYS
            );
        }
        Ok(abandoned.len())
    }

    /// Marks active instances of any definition for this resource as stuck when they have outlived their
    /// inactivity threshold.
    async fn sweep_stuck(
        &self,
        resource_id: &str,
        definitions: &[JourneyDefinition],
    ) -> Result<usize, JourneyApiError> {
        let mut flagged = 0;
        for mut instance in self.db.fetch_open_instances_for_resource(resource_id).await? {
            if instance.status != InstanceStatus::Active {
                continue;
            }
            match definitions.iter().find(|d| d.id == instance.definition_id) {
                Some(definition) => self.evaluate_stuck(definition, &mut instance),
                // The definition was retired while the instance was in flight; fall back to the default threshold
                None => self.evaluate_stuck_with_threshold(&mut instance, DEFAULT_STUCK_THRESHOLD_MINUTES),
            }
            if instance.status == InstanceStatus::Stuck {
                self.db.update_instance(&instance).await?;
                flagged += 1;
            }
        }
        Ok(flagged)
    }

    async fn apply_definition(
        &self,
        definition: &JourneyDefinition,
        event: &WebhookEvent,
        ctx: &ProcessingContext,
    ) -> Result<(usize, usize), JourneyApiError> {
        let resource_id = match event.resource_id.as_deref() {
            Some(id) => id,
            // Instances are keyed by resource; an event without one cannot start or advance a journey
            None => return Ok((0, 0)),
        };
        let lock = self.lock_for(definition.id, resource_id).await;
        let _guard = lock.lock().await;

        let mut started = 0;
        let mut started_id = None;
        if definition.config.0.is_start(event) {
            if let Some(instance) = self.handle_start(definition, event, ctx, resource_id).await? {
                started_id = Some(instance.id);
                started = 1;
            }
        }
        let mut updated = 0;
        let open = self.db.fetch_open_instances(definition.id, resource_id).await?;
        for instance in open {
            // The freshly started instance already recorded this event as its "Journey Started" step
            if Some(instance.id) == started_id {
                continue;
            }
            if self.update_instance(definition, instance, event).await? {
                updated += 1;
            }
        }
        Ok((started, updated))
    }

    //--------------------------------------  instance creation  ---------------------------------------------------
    async fn handle_start(
        &self,
        definition: &JourneyDefinition,
        event: &WebhookEvent,
        ctx: &ProcessingContext,
        resource_id: &str,
    ) -> Result<Option<JourneyInstance>, JourneyApiError> {
        let open = self.db.fetch_open_instances(definition.id, resource_id).await?;
        let active: Vec<&JourneyInstance> = open.iter().filter(|i| i.status == InstanceStatus::Active).collect();
        match definition.config.0.conflict_resolution {
            ConflictResolution::Oldest if !active.is_empty() => {
                debug!(
                    "🧭️ Journey '{}' already active for resource {resource_id}; keeping the oldest instance",
                    definition.name
                );
                return Ok(None);
            },
            ConflictResolution::Newest => {
                for stale in active {
                    let mut stale = stale.clone();
                    stale.status = InstanceStatus::Abandoned;
                    stale.end_time = Some(Utc::now());
                    stale.notes = Some("Superseded by a newer journey for this resource".to_string());
                    self.db.update_instance(&stale).await?;
                    info!("🧭️ Journey instance #{} abandoned in favour of a newer start", stale.id);
                }
            },
            ConflictResolution::Parallel => {
                let cap = definition.config.0.max_active_per_resource;
                if active.len() as i64 >= cap {
                    warn!(
                        "🧭️ Journey '{}' for resource {resource_id} is at its active-instance cap of {cap}. Start \
                         event {} rejected.",
                        definition.name, event.event_id
                    );
                    return Ok(None);
                }
            },
            _ => {},
        }
        let ts = event.effective_timestamp();
        let mut metadata = json!({
            "topic": event.topic,
            "resource_uri": event.resource_uri,
        });
        if let Some(transfer) = &ctx.transfer {
            metadata["transfer_status"] = Value::String(transfer.status.to_string());
        }
        if let Some(customer_id) = &ctx.customer_id {
            metadata["customer_id"] = Value::String(customer_id.clone());
        }
        let mut instance = self
            .db
            .create_instance(NewJourneyInstance {
                definition_id: definition.id,
                definition_version: definition.version,
                resource_id: resource_id.to_string(),
                resource_type: event.resource_type,
                resource_metadata: metadata,
                start_time: ts,
                last_event_time: ts,
            })
            .await?;
        let expected = definition.config.0.find_expected_step(&event.event_type).is_some();
        self.db.append_step(NewJourneyStep::journey_started(instance.id, event, expected)).await?;
        self.refresh_prediction(definition, &mut instance);
        self.db.update_instance(&instance).await?;
        info!(
            "🧭️ Journey '{}' v{} started for resource {resource_id} (instance #{})",
            definition.name, definition.version, instance.id
        );
        Ok(Some(instance))
    }

    //--------------------------------------   instance updates  ---------------------------------------------------
    /// Applies the event to one open instance. Returns true if the instance advanced.
    async fn update_instance(
        &self,
        definition: &JourneyDefinition,
        mut instance: JourneyInstance,
        event: &WebhookEvent,
    ) -> Result<bool, JourneyApiError> {
        let config = &definition.config.0;
        let ts = event.effective_timestamp();

        // Idempotency guard: a given (instance, event) pair is applied at most once
        if self.db.step_exists(instance.id, &event.event_id).await? {
            trace!("🧭️ Event {} already applied to instance #{}; skipping", event.event_id, instance.id);
            return Ok(false);
        }

        // Out-of-order events are recorded for audit but never advance the authoritative timeline
        if ts < instance.last_event_time {
            debug!(
                "🧭️ Event {} for instance #{} is timestamped before the last applied event; recording out of order",
                event.event_id, instance.id
            );
            self.record_unsequenced_step(&instance, event, json!({"out_of_order": true})).await?;
            return Ok(false);
        }

        // A repeated event type is a conflict unless the matching expected step is explicitly retryable
        let step_def = config.find_expected_step(&event.event_type);
        let steps = self.db.fetch_steps_for_instance(instance.id).await?;
        let repeated = steps.iter().any(|s| s.event_type == event.event_type);
        let mut conflict = None;
        if repeated && !step_def.map_or(false, |s| s.retryable) {
            let severity = if config.is_terminal_type(&event.event_type) {
                ConflictSeverity::High
            } else if step_def.is_some() {
                ConflictSeverity::Medium
            } else {
                ConflictSeverity::Low
            };
            if severity == ConflictSeverity::High {
                warn!(
                    "🧭️ Repeated terminal event type {} for instance #{} rejected (high severity conflict)",
                    event.event_type, instance.id
                );
                self.record_unsequenced_step(&instance, event, json!({"conflict_severity": "high", "rejected": true}))
                    .await?;
                return Ok(false);
            }
            debug!(
                "🧭️ Repeated event type {} for instance #{} accepted ({:?} severity conflict)",
                event.event_type, instance.id, severity
            );
            conflict = Some(severity);
        }

        // Timing evaluation against the matched step's window, measured from the journey start
        let from_start_ms = (ts - instance.start_time).num_milliseconds();
        let from_previous_ms = (ts - instance.last_event_time).num_milliseconds();
        let elapsed_minutes = (ts - instance.start_time).num_minutes();
        let (expected, on_time, step_name) = match step_def {
            Some(step) => (true, step.on_time(elapsed_minutes), step.name.clone()),
            None => (false, true, event.event_type.clone()),
        };
        let mut metadata = json!({});
        if let Some(severity) = conflict {
            metadata["conflict_severity"] = Value::String(format!("{severity:?}").to_lowercase());
        }
        let sequence = instance.current_step_index + 1;
        self.db
            .append_step(NewJourneyStep {
                instance_id: instance.id,
                sequence,
                step_name: step_name.clone(),
                event_id: event.event_id.clone(),
                event_type: event.event_type.clone(),
                timestamp: ts,
                duration_from_start_ms: from_start_ms,
                duration_from_previous_ms: from_previous_ms,
                expected,
                on_time,
                event_metadata: metadata,
            })
            .await?;

        instance.current_step_index = sequence;
        instance.last_event_time = ts;
        if expected && !instance.completed_steps.0.contains(&step_name) {
            instance.completed_steps.0.push(step_name);
        }
        // An accepted in-order event on a stuck instance brings it back to life
        if instance.status == InstanceStatus::Stuck {
            info!("🧭️ Instance #{} is no longer stuck; returning to active", instance.id);
            instance.status = InstanceStatus::Active;
        }

        if config.is_end(event) {
            instance.status = InstanceStatus::Completed;
            instance.end_time = Some(ts);
            instance.total_duration_ms = Some(from_start_ms);
            instance.progress_percentage = 100;
            instance.estimated_completion_time = None;
            info!("🧭️ Instance #{} completed in {from_start_ms} ms", instance.id);
        } else if config.is_failure(event) {
            instance.status = InstanceStatus::Failed;
            instance.end_time = Some(ts);
            instance.total_duration_ms = Some(from_start_ms);
            instance.estimated_completion_time = None;
            info!("🧭️ Instance #{} failed on {}", instance.id, event.event_type);
        } else if !config.expected_steps.is_empty() {
            let completed = instance.completed_steps.0.len() as i64;
            let total = config.expected_steps.len() as i64;
            instance.progress_percentage = (completed * 100) / total;
        }

        if instance.status == InstanceStatus::Active {
            self.refresh_prediction(definition, &mut instance);
        }
        self.evaluate_stuck(definition, &mut instance);
        self.db.update_instance(&instance).await?;
        self.publish_terminal_hooks(&instance).await;
        Ok(true)
    }

    async fn record_unsequenced_step(
        &self,
        instance: &JourneyInstance,
        event: &WebhookEvent,
        metadata: Value,
    ) -> Result<(), JourneyApiError> {
        let ts = event.effective_timestamp();
        self.db
            .append_step(NewJourneyStep {
                instance_id: instance.id,
                sequence: OUT_OF_ORDER_SEQUENCE,
                step_name: event.event_type.clone(),
                event_id: event.event_id.clone(),
                event_type: event.event_type.clone(),
                timestamp: ts,
                duration_from_start_ms: (ts - instance.start_time).num_milliseconds(),
                duration_from_previous_ms: (ts - instance.last_event_time).num_milliseconds(),
                expected: false,
                on_time: false,
                event_metadata: metadata,
            })
            .await?;
        Ok(())
    }

    //--------------------------------------  prediction & risk  ---------------------------------------------------
    /// Estimates the completion time for an active instance with declared steps still outstanding. Deliberately a
    /// simple, reproducible heuristic rather than a statistical model.
    fn refresh_prediction(&self, definition: &JourneyDefinition, instance: &mut JourneyInstance) {
        let config = &definition.config.0;
        let remaining: Vec<_> = config
            .expected_steps
            .iter()
            .filter(|s| !instance.completed_steps.0.contains(&s.name))
            .collect();
        if instance.status != InstanceStatus::Active || remaining.is_empty() {
            instance.estimated_completion_time = None;
            return;
        }
        let estimate_minutes: i64 =
            remaining.iter().map(|s| s.max_minutes.unwrap_or(DEFAULT_STEP_ESTIMATE_MINUTES)).sum();
        instance.estimated_completion_time = Some(Utc::now() + Duration::minutes(estimate_minutes));
        instance.confidence_score = max(50, (instance.progress_percentage as f64 * 0.8).round() as i64);
    }

    /// Flags an active instance as stuck when it has been inactive for longer than half its declared timeout
    /// (or a 24h default). Runs on every update regardless of outcome.
    fn evaluate_stuck(&self, definition: &JourneyDefinition, instance: &mut JourneyInstance) {
        let threshold =
            definition.config.0.timeout_minutes.map(|t| t / 2).unwrap_or(DEFAULT_STUCK_THRESHOLD_MINUTES);
        self.evaluate_stuck_with_threshold(instance, threshold);
    }

    fn evaluate_stuck_with_threshold(&self, instance: &mut JourneyInstance, threshold: i64) {
        if instance.status != InstanceStatus::Active {
            return;
        }
        let inactive_minutes = (Utc::now() - instance.last_event_time).num_minutes();
        if inactive_minutes > threshold {
            warn!(
                "🧭️ Instance #{} has been inactive for {inactive_minutes} minutes (threshold {threshold}); \
                 marking as stuck",
                instance.id
            );
            instance.status = InstanceStatus::Stuck;
            instance.risk_score = 75;
            instance
                .risk_factors
                .0
                .push(format!("No qualifying event for {inactive_minutes} minutes (threshold {threshold} minutes)"));
        }
    }

    async fn publish_terminal_hooks(&self, instance: &JourneyInstance) {
        match instance.status {
            InstanceStatus::Completed => {
                for producer in &self.producers.journey_completed_producer {
                    producer.publish_event(JourneyCompletedEvent { instance: instance.clone() }).await;
                }
            },
            InstanceStatus::Failed => {
                for producer in &self.producers.journey_failed_producer {
                    producer.publish_event(JourneyFailedEvent { instance: instance.clone() }).await;
                }
            },
            _ => {},
        }
    }

    async fn lock_for(&self, definition_id: i64, resource_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry((definition_id, resource_id.to_string()))
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

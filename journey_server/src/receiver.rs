//! The webhook receiver.
//!
//! Validates, deduplicates, persists and hands off incoming provider events. The receiver always produces a
//! success-class acknowledgement: any failure is captured internally (as a failed-webhook record plus logs) so the
//! provider's retry policy cannot amplify an internal outage into a delivery storm.

use std::{sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use jg_common::{helpers::truncate_utf8, Secret};
use journey_engine::{
    breaker::{BreakerError, CircuitBreaker},
    db_types::{EventId, NewFailedWebhook, NewWebhookEvent, ResourceType, WebhookEvent},
    dedup::DeduplicationService,
    helpers::{extract_resource_id, normalize_event_type, resource_type_from_uri},
    pipeline::PipelineHandle,
    traits::{EventApiError, EventManagement},
};
use log::{debug, info, trace, warn};
use serde_json::Value;
use thiserror::Error;

use crate::{
    data_objects::{WebhookAck, WebhookEnvelope},
    helpers::calculate_hmac,
};

/// How much of an unparseable request body is kept in the forensic record.
const MAX_CAPTURED_BODY_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("Could not parse webhook body: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("The webhook envelope carries no event id")]
    MissingEventId,
    #[error("The webhook signature is missing or invalid and signature enforcement is enabled")]
    SignatureRejected,
    #[error("The event store circuit breaker is open")]
    BreakerOpen,
    #[error("{0}")]
    Store(#[from] EventApiError),
}

impl From<BreakerError<EventApiError>> for ReceiverError {
    fn from(e: BreakerError<EventApiError>) -> Self {
        match e {
            BreakerError::Open => ReceiverError::BreakerOpen,
            BreakerError::Inner(e) => ReceiverError::Store(e),
        }
    }
}

/// Transport metadata extracted by the route handler.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub source_ip: Option<String>,
    pub signature: Option<String>,
}

pub struct WebhookReceiver<B> {
    db: B,
    dedup: Arc<DeduplicationService<B>>,
    breaker: Arc<CircuitBreaker>,
    pipeline: PipelineHandle,
    secret: Secret<String>,
    enforce_signatures: bool,
}

impl<B: Clone> Clone for WebhookReceiver<B> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            dedup: Arc::clone(&self.dedup),
            breaker: Arc::clone(&self.breaker),
            pipeline: self.pipeline.clone(),
            secret: self.secret.clone(),
            enforce_signatures: self.enforce_signatures,
        }
    }
}

impl<B> WebhookReceiver<B>
where B: EventManagement
{
    pub fn new(
        db: B,
        dedup: Arc<DeduplicationService<B>>,
        breaker: Arc<CircuitBreaker>,
        pipeline: PipelineHandle,
        secret: Secret<String>,
        enforce_signatures: bool,
    ) -> Self {
        Self { db, dedup, breaker, pipeline, secret, enforce_signatures }
    }

    /// Ingests one raw webhook request. Always returns an acknowledgement; never panics or propagates an error to
    /// the caller.
    pub async fn handle_webhook(&self, body: &[u8], meta: RequestMeta) -> WebhookAck {
        let started = Instant::now();
        match self.ingest(body, &meta).await {
            Ok((event, duplicate)) => {
                #[allow(clippy::cast_possible_truncation)]
                let elapsed_ms = started.elapsed().as_millis() as i64;
                debug!("📨️ Event {} acknowledged in {elapsed_ms} ms (duplicate: {duplicate})", event.event_id);
                WebhookAck::success(event.event_id.to_string(), duplicate, elapsed_ms)
            },
            Err(e) => {
                let request_id = format!("req_{:016x}", rand::random::<u64>());
                warn!("📨️ Webhook [{request_id}] could not be ingested: {e}");
                self.capture_failure(body, &meta, &e).await;
                WebhookAck::failure(request_id)
            },
        }
    }

    async fn ingest(&self, body: &[u8], meta: &RequestMeta) -> Result<(WebhookEvent, bool), ReceiverError> {
        let payload: Value = serde_json::from_slice(body)?;
        // Tolerant parsing: every envelope field is optional, and shape problems are warnings, not rejections.
        // Downstream consumers treat the fields as optional too.
        let envelope: WebhookEnvelope = serde_json::from_value(payload.clone()).unwrap_or_else(|e| {
            warn!("📨️ Webhook envelope has an unexpected shape ({e}). Continuing with what could be read.");
            WebhookEnvelope::default()
        });
        let event_id: EventId = envelope.id.clone().ok_or(ReceiverError::MissingEventId)?.into();
        let topic = envelope.topic.clone().unwrap_or_else(|| {
            warn!("📨️ Event {event_id} carries no topic");
            String::new()
        });
        let event_timestamp = parse_event_timestamp(&event_id, envelope.timestamp.as_deref());

        // The current trust model records invalid signatures rather than dropping the event; the enforcement
        // switch turns them into (still acknowledged) failed webhooks instead
        let signature_valid = match meta.signature.as_deref() {
            Some(signature) => signature == calculate_hmac(self.secret.reveal(), body),
            None => false,
        };
        if !signature_valid {
            warn!("📨️ Event {event_id} arrived with a missing or invalid signature");
            if self.enforce_signatures {
                return Err(ReceiverError::SignatureRejected);
            }
        }

        let resource_uri = envelope.links.as_ref().and_then(|l| l.resource.as_ref()).map(|r| r.href.clone());
        let resource_type = resource_uri.as_deref().map(resource_type_from_uri).unwrap_or(ResourceType::Unknown);
        let resource_id =
            envelope.resource_id.clone().or_else(|| resource_uri.as_deref().and_then(extract_resource_id));

        let dedup_status = self.dedup.check(&event_id).await?;
        trace!("📨️ Dedup check for {event_id}: {dedup_status:?}");

        // Persist regardless of duplicate status; the store's idempotent insert is authoritative for duplicate
        // detection even when the in-memory tier has been evicted or lost to a restart
        #[allow(clippy::cast_possible_wrap)]
        let new_event = NewWebhookEvent {
            event_id,
            event_type: normalize_event_type(&topic),
            resource_type,
            resource_id,
            resource_uri,
            topic,
            event_timestamp,
            payload,
            payload_size: body.len() as i64,
            signature: meta.signature.clone(),
            signature_valid,
            source_ip: meta.source_ip.clone(),
        };
        let (event, inserted) = self.breaker.execute(self.db.record_event_arrival(new_event)).await?;
        let duplicate = dedup_status.duplicate || !inserted;

        if duplicate {
            // A repeat arrival creates no new processing obligation; the stored record keeps whatever state its
            // first arrival reached
            info!(
                "📨️ Event {} is a duplicate (arrival {} of this id). Not re-queued.",
                event.event_id,
                event.duplicate_count + 1
            );
        } else if self.breaker.is_open().await {
            info!("📨️ Event {} recorded but not queued; the store breaker is open", event.event_id);
        } else {
            if let Err(e) = self.breaker.execute(self.db.mark_event_queued(&event.event_id)).await {
                warn!("📨️ Could not mark event {} as queued: {e}", event.event_id);
            }
            self.pipeline.try_enqueue(event.event_id.clone());
        }
        Ok((event, duplicate))
    }

    /// Best-effort forensic capture. Bypasses the breaker: this is already the fallback path, and a single write
    /// is the only way the raw request can survive a store hiccup for later recovery.
    async fn capture_failure(&self, body: &[u8], meta: &RequestMeta, error: &ReceiverError) {
        let raw_body = String::from_utf8_lossy(body);
        let failure = NewFailedWebhook {
            source_ip: meta.source_ip.clone(),
            error: error.to_string(),
            raw_body: truncate_utf8(&raw_body, MAX_CAPTURED_BODY_BYTES).to_string(),
        };
        if let Err(e) = self.db.record_failed_webhook(failure).await {
            warn!("📨️ Could not record the failed webhook: {e}");
        }
    }
}

fn parse_event_timestamp(event_id: &EventId, raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            warn!("📨️ Event {event_id} carries an unparseable timestamp '{raw}': {e}");
            None
        },
    }
}

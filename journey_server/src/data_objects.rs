use serde::{Deserialize, Serialize};

/// The provider's webhook envelope. Parsing is deliberately tolerant: every field is optional so that a malformed
/// envelope still produces an event record wherever possible, with validation problems logged as warnings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub id: Option<String>,
    #[serde(default, rename = "resourceId")]
    pub resource_id: Option<String>,
    pub topic: Option<String>,
    /// ISO-8601, as asserted by the provider
    pub timestamp: Option<String>,
    #[serde(default, rename = "_links")]
    pub links: Option<EnvelopeLinks>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvelopeLinks {
    #[serde(default)]
    pub resource: Option<Link>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
}

/// The acknowledgement body. Webhook responses are always in the 200 range, otherwise the provider will retry and
/// amplify an internal outage into a delivery storm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none", rename = "eventId")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "processingTime")]
    pub processing_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "requestId")]
    pub request_id: Option<String>,
}

impl WebhookAck {
    pub fn success(event_id: String, duplicate: bool, processing_time_ms: i64) -> Self {
        Self {
            received: true,
            event_id: Some(event_id),
            duplicate: Some(duplicate),
            processing_time: Some(processing_time_ms),
            error: None,
            request_id: None,
        }
    }

    pub fn failure(request_id: String) -> Self {
        Self {
            received: true,
            event_id: None,
            duplicate: None,
            processing_time: None,
            error: Some(true),
            request_id: Some(request_id),
        }
    }
}

use serde_json::Value;
use thiserror::Error;

use crate::db_types::{TransferRecord, TransferUpdate, WebhookEvent};

/// Storage contract for the transfer records and customer relations owned by the resource processors.
#[allow(async_fn_in_trait)]
pub trait TransferManagement {
    /// Returns the transfer record for the given provider transfer id, creating it in the `unknown` status if it
    /// does not exist yet.
    async fn fetch_or_create_transfer(&self, transfer_id: &str) -> Result<TransferRecord, TransferApiError>;

    /// Applies a status update to the transfer, appends the raw event to its audit trail, and associates the
    /// customer id when one is known. Returns the updated record.
    async fn apply_transfer_update(
        &self,
        transfer_id: &str,
        update: TransferUpdate,
        customer_id: Option<&str>,
        raw_event: &Value,
    ) -> Result<TransferRecord, TransferApiError>;

    async fn fetch_transfer(&self, transfer_id: &str) -> Result<Option<TransferRecord>, TransferApiError>;

    /// Upserts a relation entry linking a customer id to an event. This subsystem owns no customer table; relations
    /// are its only customer-domain writes.
    async fn link_customer(&self, customer_id: &str, event: &WebhookEvent) -> Result<(), TransferApiError>;
}

#[derive(Debug, Clone, Error)]
pub enum TransferApiError {
    #[error("Internal database error: {0}")]
    DatabaseError(String),
    #[error("The transfer {0} does not exist")]
    TransferNotFound(String),
}

impl From<sqlx::Error> for TransferApiError {
    fn from(e: sqlx::Error) -> Self {
        TransferApiError::DatabaseError(e.to_string())
    }
}

//! Journey Engine
//!
//! The core of the webhook journey gateway: it ingests asynchronous event notifications from an external payments
//! provider, durably records and deduplicates them, and drives per-resource journey state machines that model
//! multi-step real-world processes (customer onboarding, fund transfers, verification flows).
//!
//! The library is divided into four main sections:
//! 1. Database management and control ([`mod@sqlite`] behind the [`traits`] contracts). You should never need to
//!    access the database directly; the pipeline and tracker are generic over the storage traits, and SQLite is the
//!    supported backend. The data types used in the database are defined in [`db_types`] and are public.
//! 2. Ingestion plumbing: the [`dedup`] service and the [`breaker`] that protects the store during outages.
//! 3. The event processing [`pipeline`]: enrichment, resource processors, retry/backoff and quarantine.
//! 4. The journey tracker ([`mod@journeys`]): definitions, instance state machine, conflict handling, stuck and
//!    abandoned detection, completion prediction.
//!
//! The engine also provides a set of hooks that can be subscribed to. These are emitted when certain actions occur,
//! for example when a journey instance completes, a `JourneyCompletedEvent` is published. A simple actor framework
//! is used so that consumers can hook into these events and perform custom actions.

#[cfg(feature = "sqlite")]
mod sqlite;

pub mod breaker;
pub mod db_types;
pub mod dedup;
pub mod events;
pub mod helpers;
pub mod journeys;
pub mod pipeline;
pub mod traits;

#[cfg(all(feature = "sqlite", any(feature = "test_utils", test)))]
pub mod test_utils;

pub use breaker::{BreakerError, BreakerState, CircuitBreaker};
pub use dedup::{DedupStatus, DeduplicationService};
pub use journeys::{default_definitions, JourneyTracker};
pub use pipeline::{EventPipeline, PipelineHandle, PipelineWorker, ProcessOutcome};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{
    EventApiError,
    EventManagement,
    JourneyApiError,
    JourneyManagement,
    TransferApiError,
    TransferManagement,
};

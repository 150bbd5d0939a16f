//! Background maintenance workers.
//!
//! The per-event sweeps in the tracker only fire for resources that still see traffic; these workers catch
//! everything else on a timer.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use journey_engine::{
    dedup::DeduplicationService,
    journeys::ABANDONED_AFTER_DAYS,
    traits::JourneyManagement,
    SqliteDatabase,
};
use log::*;
use tokio::task::JoinHandle;

/// Starts the abandonment sweep worker. Do not await the returned JoinHandle, as it will run indefinitely.
pub fn start_sweep_worker(db: SqliteDatabase, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("🕰️ Journey abandonment sweep worker started");
        loop {
            timer.tick().await;
            let cutoff = Utc::now() - chrono::Duration::days(ABANDONED_AFTER_DAYS);
            match db.abandon_instances_inactive_since(cutoff, None).await {
                Ok(abandoned) if abandoned.is_empty() => trace!("🕰️ No journeys to abandon"),
                Ok(abandoned) => {
                    info!("🕰️ {} journey instance(s) abandoned", abandoned.len());
                    for instance in &abandoned {
                        debug!(
                            "🕰️ Abandoned instance #{} (definition {}, resource {})",
                            instance.id, instance.definition_id, instance.resource_id
                        );
                    }
                },
                Err(e) => error!("🕰️ Error running the abandonment sweep: {e}"),
            }
        }
    })
}

/// Starts the dedup cache eviction worker. Do not await the returned JoinHandle, as it will run indefinitely.
pub fn start_dedup_eviction_worker(
    dedup: Arc<DeduplicationService<SqliteDatabase>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("🕰️ Dedup cache eviction worker started");
        loop {
            timer.tick().await;
            let evicted = dedup.evict_expired().await;
            trace!("🕰️ Dedup eviction pass complete ({evicted} entries dropped)");
        }
    })
}

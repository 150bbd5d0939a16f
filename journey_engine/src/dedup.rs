//! Two-tier event deduplication.
//!
//! The fast tier is a bounded, time-windowed in-memory map from event id to first-seen time and arrival count. On a
//! miss, the durable store is consulted so that duplicates are still caught after a process restart. The in-memory
//! tier is advisory only; the store's idempotent insert remains authoritative for duplicate detection, so a race
//! between two concurrent first arrivals resolves at the persistence layer.

use std::collections::{hash_map::Entry, HashMap};

use chrono::{DateTime, Duration, Utc};
use log::{debug, trace};
use tokio::sync::RwLock;

use crate::{
    db_types::EventId,
    traits::{EventApiError, EventManagement},
};

/// Entries older than this many days are evicted by the periodic sweep. Duplicates arriving later than the window
/// are treated as new; domain-layer idempotency absorbs the resulting repeat side effects.
pub const DEFAULT_DEDUP_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupStatus {
    pub duplicate: bool,
    /// How many times the event has arrived after the first time. Zero for a first arrival.
    pub count: i64,
}

#[derive(Debug, Clone, Copy)]
struct SeenEntry {
    first_seen: DateTime<Utc>,
    count: i64,
}

pub struct DeduplicationService<B> {
    db: B,
    window: Duration,
    seen: RwLock<HashMap<String, SeenEntry>>,
}

impl<B> DeduplicationService<B>
where B: EventManagement
{
    pub fn new(db: B, window: Duration) -> Self {
        Self { db, window, seen: RwLock::new(HashMap::new()) }
    }

    /// Checks whether the event id has been seen before and bumps its arrival counter.
    ///
    /// The counter starts at 0 for a new event and increments on every subsequent call. A miss in the in-memory
    /// tier falls back to a durable lookup and seeds the in-memory entry from the stored duplicate counter.
    pub async fn check(&self, event_id: &EventId) -> Result<DedupStatus, EventApiError> {
        {
            let mut seen = self.seen.write().await;
            if let Some(entry) = seen.get_mut(event_id.as_str()) {
                entry.count += 1;
                trace!("♻️ Event {event_id} seen {} times before", entry.count);
                return Ok(DedupStatus { duplicate: true, count: entry.count });
            }
        }
        // Not in memory. Check the durable store before declaring the event new, without holding the lock across
        // the await point.
        let stored = self.db.fetch_event_by_event_id(event_id).await?;
        let mut seen = self.seen.write().await;
        let status = match seen.entry(event_id.as_str().to_string()) {
            // Another task seeded the entry while we were looking at the store
            Entry::Occupied(mut entry) => {
                let entry = entry.get_mut();
                entry.count += 1;
                DedupStatus { duplicate: true, count: entry.count }
            },
            Entry::Vacant(slot) => match stored {
                Some(event) => {
                    let count = event.duplicate_count + 1;
                    debug!("♻️ Event {event_id} found in the durable store; seeding the cache at count {count}");
                    slot.insert(SeenEntry { first_seen: event.received_at, count });
                    DedupStatus { duplicate: true, count }
                },
                None => {
                    slot.insert(SeenEntry { first_seen: Utc::now(), count: 0 });
                    DedupStatus { duplicate: false, count: 0 }
                },
            },
        };
        Ok(status)
    }

    /// Drops entries older than the dedup window. A memory bound, not a correctness guarantee.
    pub async fn evict_expired(&self) -> usize {
        let cutoff = Utc::now() - self.window;
        let mut seen = self.seen.write().await;
        let before = seen.len();
        seen.retain(|_, entry| entry.first_seen >= cutoff);
        let evicted = before - seen.len();
        if evicted > 0 {
            debug!("♻️ Evicted {evicted} expired dedup entries ({} remain)", seen.len());
        }
        evicted
    }

    pub async fn tracked_entries(&self) -> usize {
        self.seen.read().await.len()
    }
}

//! The single serialization point for table assignment.
//!
//! Every reservation runs under the lock of its (restaurant, date, time)
//! bucket, and the chosen table is re-checked and committed under that
//! table's write lock. The bucket lock orders callers racing for the same
//! slot; the table lock makes the commit atomic against any other bucket
//! whose interval overlaps. Lock order is always bucket, then table.

use std::collections::BTreeMap;

use tokio::sync::{OwnedMutexGuard, OwnedRwLockWriteGuard};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::*;

use super::conflict::{is_table_free, validate_party_size};
use super::{hold_table, Engine, EngineError};

/// Per-bucket state guarded by the bucket lock: the waiting entries keyed
/// by `priority_order`. Promoted and cancelled entries leave the queue;
/// the numbering itself is kept by the engine so it survives the bucket.
#[derive(Debug, Default)]
pub struct BucketState {
    queue: BTreeMap<u32, Ulid>,
}

impl BucketState {
    /// Waiting entries.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Waiting entry ids in service order.
    pub fn entries(&self) -> impl Iterator<Item = Ulid> + '_ {
        self.queue.values().copied()
    }

    pub(super) fn push(&mut self, priority: u32, entry_id: Ulid) {
        self.queue.insert(priority, entry_id);
    }

    pub(super) fn remove(&mut self, priority: u32) -> Option<Ulid> {
        self.queue.remove(&priority)
    }
}

pub type BucketGuard = OwnedMutexGuard<BucketState>;

/// A table won by `try_reserve`, still write-locked. Dropping it without
/// `commit` releases the table untouched.
pub struct Reservation {
    pub span: Span,
    table: OwnedRwLockWriteGuard<TableState>,
    _bucket: Option<BucketGuard>,
}

impl Reservation {
    pub fn table(&self) -> &Table {
        &self.table.table
    }

    pub fn table_id(&self) -> Ulid {
        self.table.table.id
    }

    /// Status the table takes once a confirmed booking lands on it.
    pub fn reserved_status(&self) -> TableStatus {
        self.table.status_after_reserve()
    }

    pub fn seated_status(&self) -> TableStatus {
        self.table.status_after_seat()
    }

    /// Attach `booking` to the reserved table. Call only after the event
    /// describing it is durable.
    pub(super) fn commit(mut self, booking: &Booking, status: Option<TableStatus>) {
        debug_assert_eq!(booking.table_id, Some(self.table_id()));
        hold_table(&mut self.table, booking, status);
    }
}

impl Engine {
    /// Acquire the bucket lock, waiting at most `lock_timeout` per attempt
    /// with exponential backoff between attempts.
    pub(super) async fn lock_bucket(&self, key: BucketKey) -> Result<BucketGuard, EngineError> {
        let bucket = self.bucket(key);
        let attempts = self.settings.lock_attempts.max(1);
        for attempt in 0..attempts {
            match tokio::time::timeout(self.settings.lock_timeout, bucket.clone().lock_owned()).await {
                Ok(guard) => return Ok(guard),
                Err(_) => {
                    debug!(
                        restaurant = %key.restaurant_id, date = %key.date, time = %key.time,
                        attempt, "bucket lock timed out; backing off"
                    );
                    let backoff = self.settings.lock_backoff * 2u32.saturating_pow(attempt);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
        warn!(
            restaurant = %key.restaurant_id, date = %key.date, time = %key.time,
            attempts, "bucket lock contention exhausted"
        );
        metrics::counter!(crate::observability::CONTENTION_EXHAUSTED_TOTAL).increment(1);
        Err(EngineError::Contention { attempts })
    }

    /// Find and write-lock the smallest free table for the bucket. The
    /// caller proves it holds the bucket lock by passing its state.
    pub(super) async fn reserve_in_bucket(
        &self,
        _held: &BucketState,
        key: BucketKey,
        party_size: u32,
        duration_minutes: Option<u32>,
    ) -> Result<Option<Reservation>, EngineError> {
        let ctx = self.slot_context(key.restaurant_id, key.date, key.time).await?;
        if !ctx.open {
            return Ok(None);
        }
        let span = Span::of_slot(key.date, key.time, duration_minutes.unwrap_or(ctx.slot_minutes));
        let candidates = self.collect_candidates(&ctx.tables, &span, party_size).await;

        for candidate in candidates {
            let Some(ts) = self.get_table(&candidate.id) else { continue };
            let guard = ts.write_owned().await;
            // Another bucket with an overlapping interval may have won it meanwhile.
            if is_table_free(&guard, &span, party_size) {
                return Ok(Some(Reservation {
                    span,
                    table: guard,
                    _bucket: None,
                }));
            }
        }
        Ok(None)
    }

    /// Atomically pick the smallest free table for a party in a bucket.
    /// `None` means nothing fits (a normal outcome); the caller should
    /// waitlist. Re-running is always safe: nothing changes until `commit`.
    pub async fn try_reserve(
        &self,
        key: BucketKey,
        party_size: u32,
    ) -> Result<Option<Reservation>, EngineError> {
        validate_party_size(party_size)?;
        let bucket = self.lock_bucket(key).await?;
        let reservation = self.reserve_in_bucket(&bucket, key, party_size, None).await?;
        Ok(reservation.map(|mut r| {
            r._bucket = Some(bucket);
            r
        }))
    }
}

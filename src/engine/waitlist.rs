use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tokio::sync::Mutex;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::assignment::BucketState;
use super::conflict::{validate_party_size, validate_text};
use super::{Engine, EngineError};

impl Engine {
    /// Append a waiting entry to a bucket whose lock the caller holds.
    /// Holding the lock makes `priority_order` allocation atomic. The caller
    /// also holds the claim on `entry_id`.
    #[allow(clippy::too_many_arguments)]
    pub(super) async fn enqueue_locked(
        &self,
        bucket: &mut BucketState,
        entry_id: Ulid,
        key: BucketKey,
        party_size: u32,
        customer: Option<String>,
        notes: Option<String>,
    ) -> Result<WaitlistEntry, EngineError> {
        if bucket.len() >= MAX_WAITLIST_PER_BUCKET {
            return Err(EngineError::LimitExceeded("waitlist full for this slot"));
        }

        let entry = WaitlistEntry {
            id: entry_id,
            restaurant_id: key.restaurant_id,
            customer,
            notes,
            date: key.date,
            time: key.time,
            party_size,
            status: WaitlistStatus::Waiting,
            priority_order: self.next_priority(key),
            booking_id: None,
        };
        let event = Event::WaitlistEnqueued { entry: entry.clone() };
        let applied = self.wal_append(&event).await?;
        bucket.push(entry.priority_order, entry.id);
        self.note_priority(key, entry.priority_order);
        self.waitlist
            .insert(entry.id, Arc::new(Mutex::new(entry.clone())));
        drop(applied);

        self.publish(key.restaurant_id, &event);
        metrics::counter!(crate::observability::WAITLISTED_TOTAL).increment(1);
        info!(entry = %entry.id, restaurant = %key.restaurant_id, date = %key.date, time = %key.time, priority = entry.priority_order, "waitlisted");
        Ok(entry)
    }

    /// Put a request straight on the waitlist without trying for a table.
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue_waitlist(
        &self,
        entry_id: Ulid,
        restaurant_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        party_size: u32,
        customer: Option<String>,
        notes: Option<String>,
    ) -> Result<WaitlistEntry, EngineError> {
        validate_party_size(party_size)?;
        validate_text(&customer, MAX_CUSTOMER_LEN, "customer too long")?;
        validate_text(&notes, MAX_NOTES_LEN, "notes too long")?;
        self.restaurant(&restaurant_id)?;
        let _claim = self.claim_id(entry_id)?;

        let key = BucketKey {
            restaurant_id,
            date,
            time,
        };
        let mut bucket = self.lock_bucket(key).await?;
        let entry = self
            .enqueue_locked(&mut bucket, entry_id, key, party_size, customer, notes)
            .await;
        self.unlock_bucket(key, bucket);
        entry
    }

    /// Try to turn a waiting entry into a confirmed booking. Goes through
    /// the reservation path like any request, so it can skip the queue
    /// order (staff "seat now") but never the capacity check.
    pub async fn promote_waitlist_entry(&self, entry_id: Ulid) -> Result<Promotion, EngineError> {
        let shared = self.entry(&entry_id)?;
        let mut entry = shared.lock().await;
        match entry.status {
            WaitlistStatus::Promoted => {
                let booking_id = entry
                    .booking_id
                    .ok_or(EngineError::InvariantViolation("promoted entry has no booking"))?;
                return Ok(Promotion::AlreadyPromoted { booking_id });
            }
            WaitlistStatus::Cancelled => return Err(EngineError::WaitlistEntryClosed(entry_id)),
            WaitlistStatus::Waiting => {}
        }

        let key = entry.bucket();
        let mut bucket = self.lock_bucket(key).await?;
        let Some(reservation) = self
            .reserve_in_bucket(&bucket, key, entry.party_size, None)
            .await?
        else {
            self.unlock_bucket(key, bucket);
            return Ok(Promotion::StillWaiting);
        };

        let table_id = reservation.table_id();
        let booking = Booking {
            id: Ulid::new(),
            restaurant_id: entry.restaurant_id,
            table_id: Some(table_id),
            customer: entry.customer.clone(),
            notes: entry.notes.clone(),
            date: entry.date,
            time: entry.time,
            duration_minutes: reservation.span.duration() as u32,
            party_size: entry.party_size,
            status: BookingStatus::Confirmed,
            is_walk_in: false,
            assignment_method: AssignmentMethod::Auto,
            was_on_waitlist: true,
        };
        let table_status = Some(reservation.reserved_status());
        let event = Event::WaitlistPromoted {
            entry_id,
            booking: booking.clone(),
            table_status,
        };
        let applied = self.wal_append(&event).await?;
        reservation.commit(&booking, table_status);
        self.bookings
            .insert(booking.id, Arc::new(Mutex::new(booking.clone())));
        entry.status = WaitlistStatus::Promoted;
        entry.booking_id = Some(booking.id);
        bucket.remove(entry.priority_order);
        drop(applied);
        self.unlock_bucket(key, bucket);
        drop(entry);

        self.publish(booking.restaurant_id, &event);
        metrics::counter!(crate::observability::PROMOTIONS_TOTAL).increment(1);
        info!(entry = %entry_id, booking = %booking.id, table = %table_id, "waitlist entry promoted");
        Ok(Promotion::Promoted {
            booking_id: booking.id,
            table_id,
        })
    }

    /// Mark an entry cancelled. Already-terminal entries are returned unchanged.
    pub async fn cancel_waitlist_entry(&self, entry_id: Ulid) -> Result<WaitlistEntry, EngineError> {
        let shared = self.entry(&entry_id)?;
        let mut entry = shared.lock().await;
        if entry.status != WaitlistStatus::Waiting {
            return Ok(entry.clone());
        }
        let key = entry.bucket();
        let mut bucket = self.lock_bucket(key).await?;
        let event = Event::WaitlistCancelled { entry_id };
        let applied = self.wal_append(&event).await?;
        entry.status = WaitlistStatus::Cancelled;
        bucket.remove(entry.priority_order);
        drop(applied);
        self.unlock_bucket(key, bucket);
        self.publish(entry.restaurant_id, &event);
        Ok(entry.clone())
    }

    /// Waiting entry ids of a bucket in service order.
    pub(super) async fn waiting_in(&self, key: BucketKey) -> Result<Vec<Ulid>, EngineError> {
        let bucket = self.lock_bucket(key).await?;
        let ids: Vec<Ulid> = bucket.entries().collect();
        self.unlock_bucket(key, bucket);
        let mut waiting = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(e) = self.get_entry(&id)
                && e.lock().await.status == WaitlistStatus::Waiting
            {
                waiting.push(id);
            }
        }
        Ok(waiting)
    }

    /// Offer a freed interval to every bucket of the restaurant whose slot
    /// overlaps it, earliest bucket first and lowest priority first within
    /// each. An entry that does not fit doesn't block the ones behind it.
    pub(super) async fn promote_overlapping(
        &self,
        origin: BucketKey,
        freed: Span,
    ) -> Result<Vec<Promotion>, EngineError> {
        let slot_minutes = {
            let rs = self.restaurant(&origin.restaurant_id)?;
            rs.read().await.restaurant.slot_duration_minutes
        };
        let mut keys: Vec<BucketKey> = self
            .buckets
            .iter()
            .map(|e| *e.key())
            .filter(|k| {
                k.restaurant_id == origin.restaurant_id
                    && Span::of_slot(k.date, k.time, slot_minutes).overlaps(&freed)
            })
            .collect();
        keys.sort();
        self.promote_buckets(keys).await
    }

    /// Offer capacity to every bucket of a restaurant, e.g. after a table
    /// comes back from maintenance.
    pub(super) async fn promote_restaurant(&self, restaurant_id: Ulid) -> Result<Vec<Promotion>, EngineError> {
        let mut keys: Vec<BucketKey> = self
            .buckets
            .iter()
            .map(|e| *e.key())
            .filter(|k| k.restaurant_id == restaurant_id)
            .collect();
        keys.sort();
        self.promote_buckets(keys).await
    }

    async fn promote_buckets(&self, keys: Vec<BucketKey>) -> Result<Vec<Promotion>, EngineError> {
        let mut promoted = Vec::new();
        for key in keys {
            for entry_id in self.waiting_in(key).await? {
                match self.promote_waitlist_entry(entry_id).await {
                    Ok(p @ Promotion::Promoted { .. }) => promoted.push(p),
                    Ok(_) | Err(EngineError::WaitlistEntryClosed(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(promoted)
    }
}

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use tokio::sync::Mutex;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_table_free, validate_party_size, validate_text};
use super::{hold_table, release_table, Engine, EngineError};

/// Start of the slot-grid slot containing `at`, counting from midnight.
fn slot_containing(at: NaiveDateTime, slot_minutes: u32) -> NaiveTime {
    let minute = at.time().num_seconds_from_midnight() / 60;
    let start = minute - minute % slot_minutes.max(1);
    NaiveTime::from_num_seconds_from_midnight_opt(start * 60, 0).unwrap_or_default()
}

impl Engine {
    /// Customer booking request: confirm on the smallest free table, or
    /// waitlist under the same bucket lock so a concurrent release cannot
    /// miss the new entry. A closed date or time is an outcome, not an error.
    #[allow(clippy::too_many_arguments)]
    pub async fn request_booking(
        &self,
        id: Ulid,
        restaurant_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        party_size: u32,
        customer: Option<String>,
        notes: Option<String>,
    ) -> Result<RequestOutcome, EngineError> {
        validate_party_size(party_size)?;
        validate_text(&customer, MAX_CUSTOMER_LEN, "customer too long")?;
        validate_text(&notes, MAX_NOTES_LEN, "notes too long")?;
        let _claim = self.claim_id(id)?;

        let ctx = self.slot_context(restaurant_id, date, time).await?;
        if !ctx.open {
            return Ok(RequestOutcome::Closed);
        }
        self.ensure_slot(restaurant_id, date, time).await?;

        let key = BucketKey {
            restaurant_id,
            date,
            time,
        };
        let mut bucket = self.lock_bucket(key).await?;
        let Some(reservation) = self.reserve_in_bucket(&bucket, key, party_size, None).await? else {
            let entry = self
                .enqueue_locked(&mut bucket, id, key, party_size, customer, notes)
                .await;
            self.unlock_bucket(key, bucket);
            let entry = entry?;
            return Ok(RequestOutcome::Waitlisted {
                entry_id: entry.id,
                priority_order: entry.priority_order,
            });
        };

        let table_id = reservation.table_id();
        let booking = Booking {
            id,
            restaurant_id,
            table_id: Some(table_id),
            customer,
            notes,
            date,
            time,
            duration_minutes: reservation.span.duration() as u32,
            party_size,
            status: BookingStatus::Confirmed,
            is_walk_in: false,
            assignment_method: AssignmentMethod::Auto,
            was_on_waitlist: false,
        };
        let table_status = Some(reservation.reserved_status());
        let event = Event::BookingCreated {
            booking: booking.clone(),
            table_status,
        };
        let applied = self.wal_append(&event).await?;
        reservation.commit(&booking, table_status);
        self.bookings.insert(id, Arc::new(Mutex::new(booking)));
        drop(applied);
        self.unlock_bucket(key, bucket);

        self.publish(restaurant_id, &event);
        metrics::counter!(crate::observability::BOOKINGS_CONFIRMED_TOTAL).increment(1);
        info!(booking = %id, restaurant = %restaurant_id, %date, %time, party_size, table = %table_id, "booking confirmed");
        Ok(RequestOutcome::Confirmed {
            booking_id: id,
            table_id,
        })
    }

    /// Staff-entered request that starts `pending` with no table.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_pending_booking(
        &self,
        id: Ulid,
        restaurant_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        party_size: u32,
        customer: Option<String>,
        notes: Option<String>,
    ) -> Result<Booking, EngineError> {
        validate_party_size(party_size)?;
        validate_text(&customer, MAX_CUSTOMER_LEN, "customer too long")?;
        validate_text(&notes, MAX_NOTES_LEN, "notes too long")?;
        let _claim = self.claim_id(id)?;
        let slot_minutes = self.ensure_slot(restaurant_id, date, time).await?;

        let booking = Booking {
            id,
            restaurant_id,
            table_id: None,
            customer,
            notes,
            date,
            time,
            duration_minutes: slot_minutes,
            party_size,
            status: BookingStatus::Pending,
            is_walk_in: false,
            assignment_method: AssignmentMethod::Auto,
            was_on_waitlist: false,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
            table_status: None,
        };
        let applied = self.wal_append(&event).await?;
        self.bookings
            .insert(id, Arc::new(Mutex::new(booking.clone())));
        drop(applied);
        self.publish(restaurant_id, &event);
        Ok(booking)
    }

    /// Reject anything that is not one of the generated slots for the date.
    /// Returns the restaurant's slot duration.
    async fn ensure_slot(
        &self,
        restaurant_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<u32, EngineError> {
        let rs = self.restaurant(&restaurant_id)?;
        let guard = rs.read().await;
        let slot_minutes = guard.restaurant.slot_duration_minutes;
        if !guard.calendar.is_slot(date, time, slot_minutes) {
            return Err(EngineError::NotBookableSlot { date, time });
        }
        Ok(slot_minutes)
    }

    /// Put a pending or confirmed booking on a specific table. Moving off a
    /// previous table frees it and offers the interval to the waitlist.
    pub async fn assign_table_manually(
        &self,
        booking_id: Ulid,
        table_id: Ulid,
    ) -> Result<Booking, EngineError> {
        let shared = self.booking(&booking_id)?;
        let new_table = self.table(&table_id)?;
        let mut booking = shared.lock().await;
        if !matches!(booking.status, BookingStatus::Pending | BookingStatus::Confirmed) {
            return Err(EngineError::InvalidRequest(
                "only pending or confirmed bookings can be assigned a table",
            ));
        }
        if booking.table_id == Some(table_id) {
            return Ok(booking.clone());
        }
        let old_table = match booking.table_id {
            Some(id) => Some(self.table(&id)?),
            None => None,
        };

        let key = booking.bucket();
        let bucket = self.lock_bucket(key).await?;
        // Two tables: lock in id order so crossing reassignments can't deadlock.
        let (mut new_guard, mut old_guard) = match old_table {
            Some(old) if old_table_first(&booking, table_id) => {
                let o = old.write_owned().await;
                (new_table.write_owned().await, Some(o))
            }
            Some(old) => {
                let n = new_table.write_owned().await;
                (n, Some(old.write_owned().await))
            }
            None => (new_table.write_owned().await, None),
        };

        if new_guard.table.restaurant_id != booking.restaurant_id {
            return Err(EngineError::InvalidRequest("table belongs to another restaurant"));
        }
        let span = booking.span();
        check_table_free(&new_guard, &span, booking.party_size, None)?;

        let confirmed = booking.status == BookingStatus::Confirmed;
        let table_status = confirmed.then(|| new_guard.status_after_reserve());
        let released = old_guard.as_deref().filter(|_| confirmed).map(|ts| TableRelease {
            table_id: ts.table.id,
            status: ts.status_after_release(booking_id),
        });
        let event = Event::TableAssigned {
            booking_id,
            table_id,
            method: AssignmentMethod::Manual,
            table_status,
            released,
        };
        let applied = self.wal_append(&event).await?;

        if let Some(old) = old_guard.as_deref_mut() {
            release_table(old, booking_id, released.map(|r| r.status));
        }
        booking.table_id = Some(table_id);
        booking.assignment_method = AssignmentMethod::Manual;
        hold_table(&mut new_guard, &booking, table_status);
        drop(applied);
        let updated = booking.clone();
        let moved = old_guard.is_some();
        drop(new_guard);
        drop(old_guard);
        self.unlock_bucket(key, bucket);
        drop(booking);

        self.publish(updated.restaurant_id, &event);
        info!(booking = %booking_id, table = %table_id, "table assigned manually");
        if moved {
            self.offer_released_interval(updated.bucket(), updated.span()).await;
        }
        Ok(updated)
    }

    /// Seat a walk-in party on a table for the slot containing `at`.
    pub async fn mark_table_occupied(
        &self,
        booking_id: Ulid,
        table_id: Ulid,
        party_size: Option<u32>,
        at: NaiveDateTime,
    ) -> Result<Booking, EngineError> {
        let _claim = self.claim_id(booking_id)?;
        let ts = self.table(&table_id)?;
        let (restaurant_id, capacity) = {
            let g = ts.read().await;
            (g.table.restaurant_id, g.table.capacity)
        };
        let party_size = party_size.unwrap_or(capacity);
        validate_party_size(party_size)?;
        let slot_minutes = {
            let rs = self.restaurant(&restaurant_id)?;
            rs.read().await.restaurant.slot_duration_minutes
        };

        let key = BucketKey {
            restaurant_id,
            date: at.date(),
            time: slot_containing(at, slot_minutes),
        };
        let bucket = self.lock_bucket(key).await?;
        let mut guard = ts.write_owned().await;
        let booking = Booking {
            id: booking_id,
            restaurant_id,
            table_id: Some(table_id),
            customer: None,
            notes: None,
            date: key.date,
            time: key.time,
            duration_minutes: slot_minutes,
            party_size,
            status: BookingStatus::Seated,
            is_walk_in: true,
            assignment_method: AssignmentMethod::Manual,
            was_on_waitlist: false,
        };
        check_table_free(&guard, &booking.span(), party_size, None)?;

        let table_status = Some(guard.status_after_seat());
        let event = Event::BookingCreated {
            booking: booking.clone(),
            table_status,
        };
        let applied = self.wal_append(&event).await?;
        hold_table(&mut guard, &booking, table_status);
        self.bookings
            .insert(booking_id, Arc::new(Mutex::new(booking.clone())));
        drop(applied);
        drop(guard);
        self.unlock_bucket(key, bucket);

        self.publish(restaurant_id, &event);
        info!(booking = %booking_id, table = %table_id, party_size, time = %key.time, "walk-in seated");
        Ok(booking)
    }

    /// Staff clears a table: every seated walk-in on it completes and the
    /// table leaves maintenance. It ends `available` unless a remaining
    /// booking still holds it.
    pub async fn mark_table_available(&self, table_id: Ulid) -> Result<Table, EngineError> {
        let ts = self.table(&table_id)?;
        let walk_ins: Vec<Ulid> = ts
            .read()
            .await
            .allocations
            .iter()
            .filter(|a| a.seated && a.walk_in)
            .map(|a| a.booking_id)
            .collect();
        for id in walk_ins {
            match self.update_booking_status(id, BookingStatus::Completed).await {
                Ok(_) | Err(EngineError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let mut guard = ts.write().await;
        let was = guard.table.status;
        let status = guard.status_from_allocations();
        if was != status {
            let event = Event::TableStatusChanged { table_id, status };
            let applied = self.wal_append(&event).await?;
            guard.table.status = status;
            drop(applied);
            self.publish(guard.table.restaurant_id, &event);
        }
        let table = guard.table.clone();
        drop(guard);

        info!(table = %table_id, from = %was, "table marked available");
        if was == TableStatus::Maintenance {
            self.offer_restaurant_capacity(table.restaurant_id).await;
        }
        Ok(table)
    }

    /// Take a table out of service or put it back. Allocations stay; a
    /// table leaving maintenance shows what they imply and its capacity is
    /// offered to the waitlist.
    pub async fn set_table_maintenance(&self, table_id: Ulid, enabled: bool) -> Result<Table, EngineError> {
        let ts = self.table(&table_id)?;
        let mut guard = ts.write().await;
        let status = if enabled {
            TableStatus::Maintenance
        } else if guard.table.status == TableStatus::Maintenance {
            guard.status_from_allocations()
        } else {
            guard.table.status
        };
        if status == guard.table.status {
            return Ok(guard.table.clone());
        }
        let event = Event::TableStatusChanged { table_id, status };
        let applied = self.wal_append(&event).await?;
        guard.table.status = status;
        drop(applied);
        let table = guard.table.clone();
        drop(guard);

        self.publish(table.restaurant_id, &event);
        info!(table = %table_id, %status, "table maintenance updated");
        if !enabled {
            self.offer_restaurant_capacity(table.restaurant_id).await;
        }
        Ok(table)
    }

    async fn offer_restaurant_capacity(&self, restaurant_id: Ulid) {
        if let Err(e) = self.promote_restaurant(restaurant_id).await {
            warn!(restaurant = %restaurant_id, "waitlist promotion after table returned to service failed: {e}");
        }
    }
}

fn old_table_first(booking: &Booking, new_table: Ulid) -> bool {
    booking.table_id.is_some_and(|old| old < new_table)
}

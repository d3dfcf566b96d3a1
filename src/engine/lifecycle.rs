use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;

use super::{apply_status_change, Engine, EngineError};

/// What a booking transition does to the table it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableEffect {
    /// Table becomes `reserved` (a table must be assigned first).
    Reserve,
    /// Table becomes `occupied` (a table is required).
    Occupy,
    /// Allocation ends and the table falls back to `available`.
    Free,
    /// Allocation ends; table status is left alone.
    Detach,
}

impl TableEffect {
    pub fn releases(&self) -> bool {
        matches!(self, TableEffect::Free | TableEffect::Detach)
    }
}

/// The booking state machine. Anything not listed is an invalid transition.
pub fn check_transition(from: BookingStatus, to: BookingStatus) -> Result<TableEffect, EngineError> {
    use BookingStatus::*;
    match (from, to) {
        (Pending, Confirmed) => Ok(TableEffect::Reserve),
        (Pending, Cancelled) => Ok(TableEffect::Detach),
        (Confirmed, Seated) => Ok(TableEffect::Occupy),
        (Confirmed, NoShow) | (Confirmed, Cancelled) | (Seated, Completed) => Ok(TableEffect::Free),
        _ => Err(EngineError::InvalidTransition { from, to }),
    }
}

impl Engine {
    /// Drive a booking through one state-machine transition, applying its
    /// table side effect. Transitions that free a table offer it to the
    /// waitlist before returning.
    pub async fn update_booking_status(
        &self,
        booking_id: Ulid,
        to: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let shared = self.booking(&booking_id)?;
        let mut booking = shared.lock().await;
        let from = booking.status;
        let effect = check_transition(from, to)?;

        if effect == TableEffect::Reserve && booking.table_id.is_none() {
            self.auto_assign(&mut booking).await?;
        }
        if effect == TableEffect::Occupy && booking.table_id.is_none() {
            return Err(EngineError::InvariantViolation("cannot seat a booking without a table"));
        }

        let table = match booking.table_id {
            Some(id) => Some(self.table(&id)?),
            None => None,
        };
        let mut guard = match table {
            Some(ts) => Some(ts.write_owned().await),
            None => None,
        };

        let table_status = guard.as_deref().and_then(|ts| match effect {
            TableEffect::Reserve => Some(ts.status_after_reserve()),
            TableEffect::Occupy => Some(ts.status_after_seat()),
            TableEffect::Free => Some(ts.status_after_release(booking_id)),
            TableEffect::Detach => None,
        });

        let event = Event::BookingStatusChanged {
            booking_id,
            status: to,
            table_status,
        };
        let applied = self.wal_append(&event).await?;
        apply_status_change(&mut booking, guard.as_deref_mut(), to, table_status);
        drop(applied);
        let updated = booking.clone();
        drop(guard);
        drop(booking);

        self.publish(updated.restaurant_id, &event);
        info!(booking = %booking_id, %from, %to, table = ?updated.table_id, "booking transitioned");

        if effect.releases() && updated.table_id.is_some() {
            self.offer_released_interval(updated.bucket(), updated.span()).await;
        }
        Ok(updated)
    }

    /// Give a table to a pending booking that has none, via the reservation
    /// path. Caller holds the booking lock.
    pub(super) async fn auto_assign(&self, booking: &mut Booking) -> Result<Ulid, EngineError> {
        let key = booking.bucket();
        let bucket = self.lock_bucket(key).await?;
        let reservation = self
            .reserve_in_bucket(&bucket, key, booking.party_size, Some(booking.duration_minutes))
            .await?
            .ok_or(EngineError::NoTableAvailable)?;
        let table_id = reservation.table_id();

        let event = Event::TableAssigned {
            booking_id: booking.id,
            table_id,
            method: AssignmentMethod::Auto,
            table_status: None,
            released: None,
        };
        let applied = self.wal_append(&event).await?;
        booking.table_id = Some(table_id);
        booking.assignment_method = AssignmentMethod::Auto;
        reservation.commit(booking, None);
        drop(applied);
        self.unlock_bucket(key, bucket);

        self.publish(booking.restaurant_id, &event);
        Ok(table_id)
    }

    /// Waitlist check after an interval stops holding a table. Runs after
    /// the freeing transition has committed, so failures here are logged
    /// rather than returned.
    pub(super) async fn offer_released_interval(&self, origin: BucketKey, freed: Span) {
        match self.promote_overlapping(origin, freed).await {
            Ok(promoted) if !promoted.is_empty() => {
                info!(restaurant = %origin.restaurant_id, date = %origin.date, count = promoted.len(), "freed capacity promoted waitlist entries");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(restaurant = %origin.restaurant_id, date = %origin.date, "waitlist promotion after release failed: {e}");
            }
        }
    }
}

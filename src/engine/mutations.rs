use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{oneshot, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::calendar::{Calendar, DateOverride, WeeklyHours};
use crate::limits::*;
use crate::model::*;

use super::conflict::validate_slot_duration;
use super::{Engine, EngineError, RestaurantState, WalCommand};

fn validate_hours(opens_at: chrono::NaiveTime, closes_at: chrono::NaiveTime, is_closed: bool) -> Result<(), EngineError> {
    if !is_closed && opens_at >= closes_at {
        return Err(EngineError::InvalidRequest("opens_at must be before closes_at"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_restaurant(
        &self,
        id: Ulid,
        name: String,
        slug: String,
        slot_duration_minutes: u32,
    ) -> Result<Restaurant, EngineError> {
        if self.restaurants.len() >= MAX_RESTAURANTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many restaurants"));
        }
        if name.is_empty() || slug.is_empty() {
            return Err(EngineError::InvalidRequest("name and slug are required"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("restaurant name too long"));
        }
        if slug.len() > MAX_SLUG_LEN {
            return Err(EngineError::LimitExceeded("slug too long"));
        }
        validate_slot_duration(slot_duration_minutes)?;
        let _claim = self.claim_id(id)?;
        for rs in self.all_restaurants() {
            if rs.read().await.restaurant.slug == slug {
                return Err(EngineError::InvalidRequest("slug already in use"));
            }
        }

        let restaurant = Restaurant {
            id,
            name,
            slug,
            slot_duration_minutes,
        };
        let event = Event::RestaurantCreated {
            restaurant: restaurant.clone(),
        };
        let applied = self.wal_append(&event).await?;
        let rs = RestaurantState {
            restaurant: restaurant.clone(),
            calendar: Calendar::new(),
            tables: Vec::new(),
        };
        self.restaurants.insert(id, Arc::new(RwLock::new(rs)));
        drop(applied);
        self.publish(id, &event);
        info!(restaurant = %id, slug = %restaurant.slug, "restaurant created");
        Ok(restaurant)
    }

    /// Existing bookings keep the duration they were made with.
    pub async fn set_slot_duration(&self, restaurant_id: Ulid, minutes: u32) -> Result<(), EngineError> {
        validate_slot_duration(minutes)?;
        let rs = self.restaurant(&restaurant_id)?;
        let mut guard = rs.write().await;
        let event = Event::SlotDurationChanged {
            restaurant_id,
            slot_duration_minutes: minutes,
        };
        let applied = self.wal_append(&event).await?;
        guard.restaurant.slot_duration_minutes = minutes;
        drop(applied);
        self.publish(restaurant_id, &event);
        Ok(())
    }

    pub async fn set_weekly_hours(&self, restaurant_id: Ulid, hours: WeeklyHours) -> Result<(), EngineError> {
        if hours.weekday > 6 {
            return Err(EngineError::InvalidRequest("weekday must be 0 (Sunday) to 6 (Saturday)"));
        }
        validate_hours(hours.opens_at, hours.closes_at, hours.is_closed)?;
        let rs = self.restaurant(&restaurant_id)?;
        let mut guard = rs.write().await;
        let event = Event::WeeklyHoursSet { restaurant_id, hours };
        let applied = self.wal_append(&event).await?;
        guard.calendar.set_weekly(hours);
        drop(applied);
        self.publish(restaurant_id, &event);
        Ok(())
    }

    /// Close a date outright or give it custom hours. One override per date.
    pub async fn set_date_override(
        &self,
        restaurant_id: Ulid,
        date: NaiveDate,
        hours: DateOverride,
    ) -> Result<(), EngineError> {
        if let DateOverride::Custom {
            opens_at,
            closes_at,
            is_closed,
        } = hours
        {
            validate_hours(opens_at, closes_at, is_closed)?;
        }
        let rs = self.restaurant(&restaurant_id)?;
        let mut guard = rs.write().await;
        let event = Event::DateOverrideSet {
            restaurant_id,
            date,
            hours,
        };
        let applied = self.wal_append(&event).await?;
        guard.calendar.set_override(date, hours);
        drop(applied);
        self.publish(restaurant_id, &event);
        Ok(())
    }

    pub async fn remove_date_override(&self, restaurant_id: Ulid, date: NaiveDate) -> Result<(), EngineError> {
        let rs = self.restaurant(&restaurant_id)?;
        let mut guard = rs.write().await;
        if guard.calendar.overrides().all(|(d, _)| *d != date) {
            return Ok(());
        }
        let event = Event::DateOverrideRemoved { restaurant_id, date };
        let applied = self.wal_append(&event).await?;
        guard.calendar.remove_override(date);
        drop(applied);
        self.publish(restaurant_id, &event);
        Ok(())
    }

    pub async fn add_table(
        &self,
        id: Ulid,
        restaurant_id: Ulid,
        table_number: u32,
        capacity: u32,
    ) -> Result<Table, EngineError> {
        if table_number == 0 {
            return Err(EngineError::InvalidRequest("table number must be positive"));
        }
        if capacity == 0 {
            return Err(EngineError::InvalidRequest("capacity must be at least 1"));
        }
        if capacity > MAX_TABLE_CAPACITY {
            return Err(EngineError::LimitExceeded("table capacity too large"));
        }
        let _claim = self.claim_id(id)?;
        let rs = self.restaurant(&restaurant_id)?;
        let mut guard = rs.write().await;
        if guard.tables.len() >= MAX_TABLES_PER_RESTAURANT {
            return Err(EngineError::LimitExceeded("too many tables"));
        }
        for tid in &guard.tables {
            if let Some(ts) = self.get_table(tid)
                && ts.read().await.table.table_number == table_number
            {
                return Err(EngineError::DuplicateTableNumber(table_number));
            }
        }

        let table = Table {
            id,
            restaurant_id,
            table_number,
            capacity,
            status: TableStatus::Available,
        };
        let event = Event::TableAdded { table: table.clone() };
        let applied = self.wal_append(&event).await?;
        guard.tables.push(id);
        self.tables
            .insert(id, Arc::new(RwLock::new(TableState::new(table.clone()))));
        drop(applied);
        drop(guard);

        self.publish(restaurant_id, &event);
        info!(table = %id, restaurant = %restaurant_id, table_number, capacity, "table added");
        // New capacity may fit parties already waiting.
        if let Err(e) = self.promote_restaurant(restaurant_id).await {
            warn!(restaurant = %restaurant_id, "waitlist promotion after table added failed: {e}");
        }
        Ok(table)
    }

    /// Rewrite the WAL as the minimal event sequence that rebuilds the
    /// current state. Terminal bookings and closed waitlist entries are kept.
    ///
    /// Writers are not blocked while the snapshot is read. Instead the gate
    /// marks a point where every logged event is applied in memory, and the
    /// writer carries everything logged after that point into the new file.
    /// Replaying those events over a snapshot that already reflects some of
    /// them lands on the same state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _compacting = self.compacting.lock().await;
        {
            let _quiesced = self.commit_gate.write().await;
            let (tx, rx) = oneshot::channel();
            self.wal_tx
                .send(WalCommand::BeginCompact { response: tx })
                .await
                .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
            rx.await
                .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?;
        }

        let mut events = Vec::new();
        let mut bookings = Vec::new();

        for rs in self.all_restaurants() {
            let guard = rs.read().await;
            let restaurant_id = guard.restaurant.id;
            events.push(Event::RestaurantCreated {
                restaurant: guard.restaurant.clone(),
            });
            for hours in guard.calendar.weekly_entries() {
                events.push(Event::WeeklyHoursSet {
                    restaurant_id,
                    hours: *hours,
                });
            }
            for (date, hours) in guard.calendar.overrides() {
                events.push(Event::DateOverrideSet {
                    restaurant_id,
                    date: *date,
                    hours: *hours,
                });
            }
            for tid in &guard.tables {
                if let Some(ts) = self.get_table(tid) {
                    events.push(Event::TableAdded {
                        table: ts.read().await.table.clone(),
                    });
                }
            }
        }

        let booking_ids: Vec<Ulid> = self.bookings.iter().map(|e| *e.key()).collect();
        for id in booking_ids {
            if let Some(b) = self.get_booking(&id) {
                bookings.push(b.lock().await.clone());
            }
        }
        bookings.sort_by_key(|b| b.id);
        events.extend(bookings.into_iter().map(|booking| Event::BookingCreated {
            booking,
            table_status: None,
        }));

        let mut entries = Vec::new();
        let entry_ids: Vec<Ulid> = self.waitlist.iter().map(|e| *e.key()).collect();
        for id in entry_ids {
            if let Some(e) = self.get_entry(&id) {
                entries.push(e.lock().await.clone());
            }
        }
        entries.sort_by_key(|e| e.id);
        events.extend(entries.into_iter().map(|entry| Event::WaitlistEnqueued { entry }));

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

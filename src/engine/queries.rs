use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::calendar::ServiceHours;
use crate::model::*;

use super::{Engine, EngineError, RestaurantState, SharedRestaurant};

impl Engine {
    /// Every restaurant handle, in id order.
    pub(super) fn all_restaurants(&self) -> Vec<SharedRestaurant> {
        let mut all: Vec<(Ulid, SharedRestaurant)> = self
            .restaurants
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all.into_iter().map(|(_, rs)| rs).collect()
    }

    pub async fn list_restaurants(&self) -> Vec<Restaurant> {
        let mut out = Vec::new();
        for rs in self.all_restaurants() {
            out.push(rs.read().await.restaurant.clone());
        }
        out
    }

    /// Restaurant record, calendar and table ids.
    pub async fn restaurant_info(&self, restaurant_id: Ulid) -> Result<RestaurantState, EngineError> {
        let rs = self.restaurant(&restaurant_id)?;
        let guard = rs.read().await;
        Ok(guard.clone())
    }

    pub async fn is_open(&self, restaurant_id: Ulid, date: NaiveDate, time: NaiveTime) -> Result<bool, EngineError> {
        let rs = self.restaurant(&restaurant_id)?;
        Ok(rs.read().await.calendar.is_open(date, time))
    }

    pub async fn service_hours(&self, restaurant_id: Ulid, date: NaiveDate) -> Result<ServiceHours, EngineError> {
        let rs = self.restaurant(&restaurant_id)?;
        Ok(rs.read().await.calendar.service_hours(date))
    }

    /// Slot start times for a date; empty when closed.
    pub async fn generate_slots(&self, restaurant_id: Ulid, date: NaiveDate) -> Result<Vec<NaiveTime>, EngineError> {
        let rs = self.restaurant(&restaurant_id)?;
        let guard = rs.read().await;
        Ok(guard
            .calendar
            .generate_slots(date, guard.restaurant.slot_duration_minutes)
            .collect())
    }

    /// Tables of a restaurant ordered by table number.
    pub async fn list_tables(&self, restaurant_id: Ulid) -> Result<Vec<Table>, EngineError> {
        let ids = self.restaurant(&restaurant_id)?.read().await.tables.clone();
        let mut tables = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(ts) = self.get_table(id) {
                tables.push(ts.read().await.table.clone());
            }
        }
        tables.sort_by_key(|t| t.table_number);
        Ok(tables)
    }

    pub async fn table_info(&self, table_id: Ulid) -> Result<Table, EngineError> {
        Ok(self.table(&table_id)?.read().await.table.clone())
    }

    /// Bookings of a restaurant, optionally for one date, by date, time and id.
    pub async fn list_bookings(
        &self,
        restaurant_id: Ulid,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Booking>, EngineError> {
        self.restaurant(&restaurant_id)?;
        let handles: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for b in handles {
            let booking = b.lock().await;
            if booking.restaurant_id == restaurant_id && date.is_none_or(|d| d == booking.date) {
                out.push(booking.clone());
            }
        }
        out.sort_by_key(|b| (b.date, b.time, b.id));
        Ok(out)
    }

    pub async fn booking_info(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        Ok(self.booking(&booking_id)?.lock().await.clone())
    }

    /// Waitlist entries of a restaurant in service order per bucket.
    pub async fn list_waitlist(
        &self,
        restaurant_id: Ulid,
        date: Option<NaiveDate>,
    ) -> Result<Vec<WaitlistEntry>, EngineError> {
        self.restaurant(&restaurant_id)?;
        let handles: Vec<_> = self.waitlist.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for e in handles {
            let entry = e.lock().await;
            if entry.restaurant_id == restaurant_id && date.is_none_or(|d| d == entry.date) {
                out.push(entry.clone());
            }
        }
        out.sort_by_key(|e| (e.date, e.time, e.priority_order));
        Ok(out)
    }

    pub async fn waitlist_entry(&self, entry_id: Ulid) -> Result<WaitlistEntry, EngineError> {
        Ok(self.entry(&entry_id)?.lock().await.clone())
    }
}

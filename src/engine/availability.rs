use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::*;

use super::conflict::{is_table_free, validate_party_size};
use super::{Engine, EngineError};

// ── Availability Algorithm ────────────────────────────────────────

/// Tables that can seat `party_size` over `span`, smallest first.
///
/// A table qualifies when it seats the party, is not under maintenance and
/// holds no overlapping allocation. Ties on capacity go to the lower
/// table number, so the least seating capacity is wasted.
pub fn rank_candidates<'a>(
    tables: impl IntoIterator<Item = &'a TableState>,
    span: &Span,
    party_size: u32,
) -> Vec<Table> {
    let mut candidates: Vec<Table> = tables
        .into_iter()
        .filter(|ts| is_table_free(ts, span, party_size))
        .map(|ts| ts.table.clone())
        .collect();
    candidates.sort_by_key(|t| (t.capacity, t.table_number));
    candidates
}

/// What a reservation attempt needs from the restaurant, copied out so the
/// restaurant lock is not held while tables are inspected.
pub(super) struct SlotContext {
    pub open: bool,
    pub slot_minutes: u32,
    pub tables: Vec<Ulid>,
}

impl Engine {
    pub(super) async fn slot_context(
        &self,
        restaurant_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<SlotContext, EngineError> {
        let rs = self.restaurant(&restaurant_id)?;
        let guard = rs.read().await;
        Ok(SlotContext {
            open: guard.calendar.is_open(date, time),
            slot_minutes: guard.restaurant.slot_duration_minutes,
            tables: guard.tables.clone(),
        })
    }

    /// Read-lock every listed table and rank the free ones.
    pub(super) async fn collect_candidates(
        &self,
        table_ids: &[Ulid],
        span: &Span,
        party_size: u32,
    ) -> Vec<Table> {
        let mut states = Vec::with_capacity(table_ids.len());
        for id in table_ids {
            if let Some(ts) = self.get_table(id) {
                states.push(ts.read().await.clone());
            }
        }
        rank_candidates(&states, span, party_size)
    }

    /// Tables free for a party at `date time`, ascending by capacity then
    /// table number. Empty (not an error) when closed or nothing fits.
    pub async fn find_candidate_tables(
        &self,
        restaurant_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        party_size: u32,
    ) -> Result<Vec<Table>, EngineError> {
        validate_party_size(party_size)?;
        let ctx = self.slot_context(restaurant_id, date, time).await?;
        if !ctx.open {
            return Ok(Vec::new());
        }
        let span = Span::of_slot(date, time, ctx.slot_minutes);
        Ok(self.collect_candidates(&ctx.tables, &span, party_size).await)
    }

    /// Every slot of `date` with whether a table fits the party there.
    pub async fn get_available_slots(
        &self,
        restaurant_id: Ulid,
        date: NaiveDate,
        party_size: u32,
    ) -> Result<Vec<SlotAvailability>, EngineError> {
        validate_party_size(party_size)?;
        let rs = self.restaurant(&restaurant_id)?;
        let (slots, slot_minutes, table_ids) = {
            let guard = rs.read().await;
            let slot_minutes = guard.restaurant.slot_duration_minutes;
            (
                guard.calendar.generate_slots(date, slot_minutes),
                slot_minutes,
                guard.tables.clone(),
            )
        };

        let mut states = Vec::with_capacity(table_ids.len());
        for id in &table_ids {
            if let Some(ts) = self.get_table(id) {
                states.push(ts.read().await.clone());
            }
        }

        Ok(slots
            .map(|time| {
                let span = Span::of_slot(date, time, slot_minutes);
                SlotAvailability {
                    time,
                    available: states.iter().any(|ts| is_table_free(ts, &span, party_size)),
                }
            })
            .collect())
    }
}

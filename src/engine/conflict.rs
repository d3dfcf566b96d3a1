use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// A table can take `span` for a party of `party_size` if it seats the party,
/// is not under maintenance, and no allocation overlaps the span.
pub(crate) fn check_table_free(
    ts: &TableState,
    span: &Span,
    party_size: u32,
    ignore: Option<ulid::Ulid>,
) -> Result<(), EngineError> {
    if ts.table.status == TableStatus::Maintenance {
        return Err(EngineError::TableInMaintenance(ts.table.id));
    }
    if ts.table.capacity < party_size {
        return Err(EngineError::InsufficientCapacity {
            table_id: ts.table.id,
            capacity: ts.table.capacity,
            party_size,
        });
    }
    if let Some(a) = ts
        .overlapping(span)
        .find(|a| Some(a.booking_id) != ignore)
    {
        return Err(EngineError::Conflict {
            table_id: ts.table.id,
            booking_id: a.booking_id,
        });
    }
    Ok(())
}

pub(crate) fn is_table_free(ts: &TableState, span: &Span, party_size: u32) -> bool {
    check_table_free(ts, span, party_size, None).is_ok()
}

pub(crate) fn validate_party_size(party_size: u32) -> Result<(), EngineError> {
    if party_size == 0 {
        return Err(EngineError::InvalidRequest("party size must be at least 1"));
    }
    if party_size > MAX_PARTY_SIZE {
        return Err(EngineError::LimitExceeded("party too large"));
    }
    Ok(())
}

pub(crate) fn validate_slot_duration(minutes: u32) -> Result<(), EngineError> {
    if !(MIN_SLOT_DURATION_MINUTES..=MAX_SLOT_DURATION_MINUTES).contains(&minutes) {
        return Err(EngineError::LimitExceeded("slot duration out of range"));
    }
    Ok(())
}

pub(crate) fn validate_text(
    value: &Option<String>,
    max: usize,
    what: &'static str,
) -> Result<(), EngineError> {
    if value.as_ref().is_some_and(|v| v.len() > max) {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

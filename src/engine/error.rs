use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("table number {0} already in use")]
    DuplicateTableNumber(u32),
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("{date} {time} is not a bookable slot")]
    NotBookableSlot { date: NaiveDate, time: NaiveTime },
    #[error("table {table_id} is held by booking {booking_id}")]
    Conflict { table_id: Ulid, booking_id: Ulid },
    #[error("table {table_id} seats {capacity}, party of {party_size} does not fit")]
    InsufficientCapacity {
        table_id: Ulid,
        capacity: u32,
        party_size: u32,
    },
    #[error("table {0} is under maintenance")]
    TableInMaintenance(Ulid),
    #[error("no table available")]
    NoTableAvailable,
    #[error("waitlist entry {0} is cancelled")]
    WaitlistEntryClosed(Ulid),
    #[error("invariant violated: {0}")]
    InvariantViolation(&'static str),
    #[error("lock contention: gave up after {attempts} attempts")]
    Contention { attempts: u32 },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    /// Whether the caller may retry the whole operation unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Contention { .. })
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::calendar::{DateOverride, WeeklyHours};

/// Wall-clock minutes since the Unix epoch, in the restaurant's local time.
pub type Minute = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// The interval a booking of `duration_minutes` starting at `date time` occupies.
    pub fn of_slot(date: NaiveDate, time: NaiveTime, duration_minutes: u32) -> Self {
        let start = minute_of(date, time);
        Self::new(start, start + Minute::from(duration_minutes))
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Minute) -> bool {
        self.start <= t && t < self.end
    }
}

pub fn minute_of(date: NaiveDate, time: NaiveTime) -> Minute {
    date.and_time(time).and_utc().timestamp().div_euclid(60)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Closed string-backed enum: parsing rejects anything outside the listed set.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

text_enum!(
    /// Current occupancy of a physical table.
    TableStatus {
        Available => "available",
        Occupied => "occupied",
        Reserved => "reserved",
        Maintenance => "maintenance",
    }
);

text_enum!(
    BookingStatus {
        Pending => "pending",
        Confirmed => "confirmed",
        Seated => "seated",
        Completed => "completed",
        Cancelled => "cancelled",
        NoShow => "no_show",
    }
);

text_enum!(
    WaitlistStatus {
        Waiting => "waiting",
        Promoted => "promoted",
        Cancelled => "cancelled",
    }
);

text_enum!(
    AssignmentMethod {
        Auto => "auto",
        Manual => "manual",
    }
);

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::NoShow)
    }
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: Ulid,
    pub name: String,
    pub slug: String,
    /// Granularity of bookable start times and the length of every booking.
    pub slot_duration_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: Ulid,
    pub restaurant_id: Ulid,
    pub table_number: u32,
    pub capacity: u32,
    pub status: TableStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub restaurant_id: Ulid,
    pub table_id: Option<Ulid>,
    pub customer: Option<String>,
    pub notes: Option<String>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    /// Slot duration at creation time; later slot edits don't reshape the booking.
    pub duration_minutes: u32,
    pub party_size: u32,
    pub status: BookingStatus,
    pub is_walk_in: bool,
    pub assignment_method: AssignmentMethod,
    pub was_on_waitlist: bool,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::of_slot(self.date, self.time, self.duration_minutes)
    }

    /// Whether this booking currently holds capacity on its table.
    pub fn holds_table(&self) -> bool {
        self.table_id.is_some() && !self.status.is_terminal()
    }

    pub fn bucket(&self) -> BucketKey {
        BucketKey {
            restaurant_id: self.restaurant_id,
            date: self.date,
            time: self.time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Ulid,
    pub restaurant_id: Ulid,
    pub customer: Option<String>,
    pub notes: Option<String>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub party_size: u32,
    pub status: WaitlistStatus,
    /// Lower is served first; unique and increasing within one bucket.
    pub priority_order: u32,
    /// The booking this entry was promoted into.
    pub booking_id: Option<Ulid>,
}

impl WaitlistEntry {
    pub fn bucket(&self) -> BucketKey {
        BucketKey {
            restaurant_id: self.restaurant_id,
            date: self.date,
            time: self.time,
        }
    }
}

/// (restaurant, date, time): the unit of reservation serialization and
/// waitlist priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    pub restaurant_id: Ulid,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

/// An interval a non-terminal booking holds on a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub booking_id: Ulid,
    pub span: Span,
    pub seated: bool,
    pub walk_in: bool,
}

/// A table plus the allocations currently holding it, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct TableState {
    pub table: Table,
    pub allocations: Vec<Allocation>,
}

impl TableState {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            allocations: Vec::new(),
        }
    }

    /// Insert allocation maintaining sort order by span.start.
    /// Insert in start order, replacing any allocation of the same booking.
    pub fn insert_allocation(&mut self, allocation: Allocation) {
        self.remove_allocation(allocation.booking_id);
        let pos = self
            .allocations
            .binary_search_by_key(&allocation.span.start, |a| a.span.start)
            .unwrap_or_else(|e| e);
        self.allocations.insert(pos, allocation);
    }

    pub fn remove_allocation(&mut self, booking_id: Ulid) -> Option<Allocation> {
        let pos = self
            .allocations
            .iter()
            .position(|a| a.booking_id == booking_id)?;
        Some(self.allocations.remove(pos))
    }

    pub fn allocation_mut(&mut self, booking_id: Ulid) -> Option<&mut Allocation> {
        self.allocations
            .iter_mut()
            .find(|a| a.booking_id == booking_id)
    }

    /// Allocations whose span overlaps the query window.
    /// Uses binary search to skip allocations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Allocation> {
        let right_bound = self
            .allocations
            .partition_point(|a| a.span.start < query.end);
        self.allocations[..right_bound]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }

    /// Whether a booking other than `except` is seated at the table.
    pub fn has_seated_other_than(&self, except: Ulid) -> bool {
        self.allocations
            .iter()
            .any(|a| a.seated && a.booking_id != except)
    }

    /// Status the table falls back to once `leaving` stops holding it.
    pub fn status_after_release(&self, leaving: Ulid) -> TableStatus {
        match self.table.status {
            TableStatus::Maintenance => TableStatus::Maintenance,
            _ if self.has_seated_other_than(leaving) => TableStatus::Occupied,
            _ => TableStatus::Available,
        }
    }

    /// Status after a booking is confirmed onto the table.
    pub fn status_after_reserve(&self) -> TableStatus {
        match self.table.status {
            TableStatus::Maintenance | TableStatus::Occupied => self.table.status,
            _ => TableStatus::Reserved,
        }
    }

    /// Status implied by the current allocations alone, ignoring any
    /// maintenance flag.
    pub fn status_from_allocations(&self) -> TableStatus {
        if self.allocations.iter().any(|a| a.seated) {
            TableStatus::Occupied
        } else if self.allocations.is_empty() {
            TableStatus::Available
        } else {
            TableStatus::Reserved
        }
    }

    /// Status after a booking is seated at the table.
    pub fn status_after_seat(&self) -> TableStatus {
        match self.table.status {
            TableStatus::Maintenance => TableStatus::Maintenance,
            _ => TableStatus::Occupied,
        }
    }
}

/// Table status change carried by an event that moves a booking off a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRelease {
    pub table_id: Ulid,
    pub status: TableStatus,
}

/// The WAL record format. Each event carries every side effect it causes,
/// so replay never re-derives table statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RestaurantCreated {
        restaurant: Restaurant,
    },
    SlotDurationChanged {
        restaurant_id: Ulid,
        slot_duration_minutes: u32,
    },
    WeeklyHoursSet {
        restaurant_id: Ulid,
        hours: WeeklyHours,
    },
    DateOverrideSet {
        restaurant_id: Ulid,
        date: NaiveDate,
        hours: DateOverride,
    },
    DateOverrideRemoved {
        restaurant_id: Ulid,
        date: NaiveDate,
    },
    TableAdded {
        table: Table,
    },
    TableStatusChanged {
        table_id: Ulid,
        status: TableStatus,
    },
    BookingCreated {
        booking: Booking,
        table_status: Option<TableStatus>,
    },
    TableAssigned {
        booking_id: Ulid,
        table_id: Ulid,
        method: AssignmentMethod,
        table_status: Option<TableStatus>,
        released: Option<TableRelease>,
    },
    BookingStatusChanged {
        booking_id: Ulid,
        status: BookingStatus,
        table_status: Option<TableStatus>,
    },
    WaitlistEnqueued {
        entry: WaitlistEntry,
    },
    WaitlistPromoted {
        entry_id: Ulid,
        booking: Booking,
        table_status: Option<TableStatus>,
    },
    WaitlistCancelled {
        entry_id: Ulid,
    },
}

// ── Operation results ────────────────────────────────────────────

/// Result of a customer booking request. Neither variant is an error:
/// running out of tables and asking for a closed time are normal outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Confirmed { booking_id: Ulid, table_id: Ulid },
    Waitlisted { entry_id: Ulid, priority_order: u32 },
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    Promoted { booking_id: Ulid, table_id: Ulid },
    /// The entry had already been promoted; nothing new was created.
    AlreadyPromoted { booking_id: Ulid },
    /// No table fits yet; the entry stays waiting.
    StillWaiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAvailability {
    pub time: NaiveTime,
    pub available: bool,
}

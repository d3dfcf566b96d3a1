//! Service-hours resolution for a single restaurant.
//!
//! A date resolves in this order: a per-date override wins (a closed date
//! or custom hours), otherwise the weekly entry for that weekday applies.
//! A weekday with no entry is closed: a missing configuration row must
//! never open the book.
//!
//! Hours are one window inside a single calendar day, `opens_at <
//! closes_at`. Service that runs past midnight (18:00 to 01:00, say) cannot
//! be expressed: the engine rejects such hours when they are set, and a
//! window that opens at or after it closes resolves to closed.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use tracing::warn;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Default hours for one day of the week (0 = Sunday … 6 = Saturday).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyHours {
    pub weekday: u8,
    pub opens_at: NaiveTime,
    pub closes_at: NaiveTime,
    pub is_closed: bool,
}

/// Per-date exception to the weekly hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateOverride {
    Closed,
    Custom {
        opens_at: NaiveTime,
        closes_at: NaiveTime,
        is_closed: bool,
    },
}

/// Effective hours for one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceHours {
    Open { opens_at: NaiveTime, closes_at: NaiveTime },
    Closed(ClosedReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedReason {
    ClosedDate,
    Override,
    Weekly,
    /// No weekly entry for the weekday.
    Unconfigured,
    /// Hours that open at or after they close.
    EmptyWindow,
}

pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

fn minute_of_day(t: NaiveTime) -> u32 {
    t.num_seconds_from_midnight() / 60
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calendar {
    weekly: [Option<WeeklyHours>; 7],
    overrides: BTreeMap<NaiveDate, DateOverride>,
}

impl Calendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the weekly entry for `hours.weekday`.
    pub fn set_weekly(&mut self, hours: WeeklyHours) {
        if let Some(slot) = self.weekly.get_mut(usize::from(hours.weekday)) {
            *slot = Some(hours);
        }
    }

    pub fn weekly(&self, weekday: u8) -> Option<&WeeklyHours> {
        self.weekly.get(usize::from(weekday)).and_then(Option::as_ref)
    }

    pub fn weekly_entries(&self) -> impl Iterator<Item = &WeeklyHours> {
        self.weekly.iter().flatten()
    }

    pub fn set_override(&mut self, date: NaiveDate, hours: DateOverride) {
        self.overrides.insert(date, hours);
    }

    pub fn remove_override(&mut self, date: NaiveDate) -> Option<DateOverride> {
        self.overrides.remove(&date)
    }

    pub fn overrides(&self) -> impl Iterator<Item = (&NaiveDate, &DateOverride)> {
        self.overrides.iter()
    }

    pub fn service_hours(&self, date: NaiveDate) -> ServiceHours {
        let (opens_at, closes_at) = match self.overrides.get(&date) {
            Some(DateOverride::Closed) => return ServiceHours::Closed(ClosedReason::ClosedDate),
            Some(DateOverride::Custom { is_closed: true, .. }) => {
                return ServiceHours::Closed(ClosedReason::Override);
            }
            Some(DateOverride::Custom {
                opens_at, closes_at, ..
            }) => (*opens_at, *closes_at),
            None => match self.weekly(weekday_index(date)) {
                None => {
                    warn!(%date, weekday = weekday_index(date), "no operating hours configured for weekday; treating as closed");
                    return ServiceHours::Closed(ClosedReason::Unconfigured);
                }
                Some(h) if h.is_closed => return ServiceHours::Closed(ClosedReason::Weekly),
                Some(h) => (h.opens_at, h.closes_at),
            },
        };
        if opens_at >= closes_at {
            warn!(%date, %opens_at, %closes_at, "operating hours open at or after closing; treating as closed");
            return ServiceHours::Closed(ClosedReason::EmptyWindow);
        }
        ServiceHours::Open { opens_at, closes_at }
    }

    pub fn is_open(&self, date: NaiveDate, time: NaiveTime) -> bool {
        match self.service_hours(date) {
            ServiceHours::Open { opens_at, closes_at } => opens_at <= time && time < closes_at,
            ServiceHours::Closed(_) => false,
        }
    }

    /// Bookable start times for `date`: one per `slot_minutes` from opening,
    /// keeping only slots that end at or before closing.
    pub fn generate_slots(&self, date: NaiveDate, slot_minutes: u32) -> Slots {
        match self.service_hours(date) {
            ServiceHours::Open { opens_at, closes_at } if slot_minutes > 0 => Slots {
                next: minute_of_day(opens_at),
                close: minute_of_day(closes_at),
                step: slot_minutes,
            },
            _ => Slots::empty(),
        }
    }

    /// Whether `time` is exactly one of the generated slots for `date`.
    pub fn is_slot(&self, date: NaiveDate, time: NaiveTime, slot_minutes: u32) -> bool {
        time.second() == 0 && self.generate_slots(date, slot_minutes).any(|t| t == time)
    }
}

/// Finite, restartable (`Clone`) sequence of slot start times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slots {
    next: u32,
    close: u32,
    step: u32,
}

impl Slots {
    fn empty() -> Self {
        Self {
            next: 0,
            close: 0,
            step: 1,
        }
    }
}

impl Iterator for Slots {
    type Item = NaiveTime;

    fn next(&mut self) -> Option<NaiveTime> {
        if self.next + self.step > self.close || self.next >= MINUTES_PER_DAY {
            return None;
        }
        let t = NaiveTime::from_num_seconds_from_midnight_opt(self.next * 60, 0)?;
        self.next += self.step;
        Some(t)
    }
}

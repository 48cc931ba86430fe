// src/scheduling/time_window.rs

//! Wall-clock arithmetic for same-day schedules.
//!
//! Everything here works on minutes since midnight. There is no calendar date and
//! no timezone; a window that would cross midnight cannot be represented.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// A time of day with minute precision, `00:00` through `23:59`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeOfDayError {
    #[error("time must be HH:MM")]
    Format,
    #[error("time is outside 00:00-23:59")]
    Range,
}

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);

    pub fn from_hm(hour: u16, minute: u16) -> Result<Self, TimeOfDayError> {
        if hour > 23 || minute > 59 {
            return Err(TimeOfDayError::Range);
        }
        Ok(TimeOfDay(hour * 60 + minute))
    }

    pub fn from_minutes(minutes: u16) -> Result<Self, TimeOfDayError> {
        if minutes >= MINUTES_PER_DAY {
            return Err(TimeOfDayError::Range);
        }
        Ok(TimeOfDay(minutes))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u16 {
        self.0 / 60
    }

    pub fn minute(self) -> u16 {
        self.0 % 60
    }

    /// `None` when the result would reach or pass midnight.
    pub fn checked_add_minutes(self, minutes: u16) -> Option<TimeOfDay> {
        let total = self.0.checked_add(minutes)?;
        (total < MINUTES_PER_DAY).then_some(TimeOfDay(total))
    }

    /// Signed distance `other - self` in minutes.
    pub fn minutes_until(self, other: TimeOfDay) -> i32 {
        i32::from(other.0) - i32::from(self.0)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for TimeOfDay {
    type Err = TimeOfDayError;

    // Accepts "HH:MM" and the "HH:MM:SS" form Postgres prints for TIME columns.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(':');
        let hour = parts.next().ok_or(TimeOfDayError::Format)?;
        let minute = parts.next().ok_or(TimeOfDayError::Format)?;
        let seconds = parts.next();
        if parts.next().is_some() || hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
            return Err(TimeOfDayError::Format);
        }
        if seconds.is_some_and(|sec| sec != "00") {
            return Err(TimeOfDayError::Format);
        }
        // u16::from_str tolerates a leading '+'
        if !is_digits(hour) || !is_digits(minute) {
            return Err(TimeOfDayError::Format);
        }
        let hour: u16 = hour.parse().map_err(|_| TimeOfDayError::Format)?;
        let minute: u16 = minute.parse().map_err(|_| TimeOfDayError::Format)?;
        TimeOfDay::from_hm(hour, minute)
    }
}

fn is_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Half-open `[start, end)` window on a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl TimeWindow {
    /// `None` unless `start < end`.
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Option<Self> {
        (start < end).then_some(TimeWindow { start, end })
    }

    pub fn duration_minutes(&self) -> u16 {
        self.end.minutes() - self.start.minutes()
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }
}

/// True iff `[start_a, end_a)` and `[start_b, end_b)` share an instant.
/// Abutting windows do not overlap.
pub fn overlaps(start_a: TimeOfDay, end_a: TimeOfDay, start_b: TimeOfDay, end_b: TimeOfDay) -> bool {
    start_a < end_b && start_b < end_a
}

/// Candidate start times from `shift_start` (inclusive) to `shift_end` (exclusive)
/// every `step_minutes`. A zero step yields nothing.
pub fn generate_slots(shift_start: TimeOfDay, shift_end: TimeOfDay, step_minutes: u16) -> SlotGrid {
    SlotGrid {
        next: Some(shift_start),
        end: shift_end,
        step: step_minutes,
    }
}

#[derive(Debug, Clone)]
pub struct SlotGrid {
    next: Option<TimeOfDay>,
    end: TimeOfDay,
    step: u16,
}

impl Iterator for SlotGrid {
    type Item = TimeOfDay;

    fn next(&mut self) -> Option<TimeOfDay> {
        if self.step == 0 {
            return None;
        }
        let current = self.next.filter(|t| *t < self.end)?;
        self.next = current.checked_add_minutes(self.step);
        Some(current)
    }
}

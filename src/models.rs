use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scheduling::service::AppointmentService;
use crate::scheduling::time_window::{TimeOfDay, TimeWindow};

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub scheduler: Arc<AppointmentService>,
}

/* -------------------------
   Appointment
--------------------------*/

/// Stored as smallint:
/// 0 scheduled, 1 confirmed, 2 in_progress, 3 completed, 4 cancelled, 5 no_show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum AppointmentStatus {
    Scheduled = 0,
    Confirmed = 1,
    InProgress = 2,
    Completed = 3,
    Cancelled = 4,
    NoShow = 5,
}

impl AppointmentStatus {
    /// Statuses that occupy their machine and patient for the booked window.
    /// Completed sessions free the slot.
    pub const BLOCKING: [AppointmentStatus; 3] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::Confirmed,
        AppointmentStatus::InProgress,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    pub fn blocks_schedule(self) -> bool {
        Self::BLOCKING.contains(&self)
    }

    /// Only sessions that have not started yet may be edited or cancelled.
    pub fn is_editable(self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }

    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Scheduled, Confirmed)
                | (Confirmed, InProgress)
                | (InProgress, Completed)
                | (Scheduled | Confirmed, Cancelled)
                | (Scheduled | Confirmed, NoShow)
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "scheduled" => Some(AppointmentStatus::Scheduled),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "in_progress" => Some(AppointmentStatus::InProgress),
            "completed" => Some(AppointmentStatus::Completed),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            "no_show" => Some(AppointmentStatus::NoShow),
            _ => None,
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Appointment {
    pub appointment_id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub machine_id: Uuid,
    pub shift_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub duration_minutes: i32,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            start: self.start_time,
            end: self.end_time,
        }
    }
}

/// Raw booking request as it arrives from a form. Every field is optional so
/// that missing input is reported as a field error instead of a decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentCandidate {
    pub patient_id: Option<Uuid>,
    pub machine_id: Option<Uuid>,
    pub shift_id: Option<Uuid>,
    pub appointment_date: Option<NaiveDate>,
    pub start_time: Option<TimeOfDay>,
    pub end_time: Option<TimeOfDay>,
    pub notes: Option<String>,
}

/// A candidate that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub patient_id: Uuid,
    pub machine_id: Uuid,
    pub shift_id: Uuid,
    pub appointment_date: NaiveDate,
    pub window: TimeWindow,
    pub notes: Option<String>,
}

impl Booking {
    pub fn duration_minutes(&self) -> i32 {
        i32::from(self.window.duration_minutes())
    }
}

/// Partial update. `expected_status` guards against a concurrent transition:
/// the write only applies while the row still has that status.
#[derive(Debug, Clone)]
pub struct AppointmentPatch {
    pub expected_status: AppointmentStatus,
    pub booking: Option<Booking>,
    pub status: Option<AppointmentStatus>,
    pub notes: Option<Option<String>>,
}

impl AppointmentPatch {
    pub fn new(expected_status: AppointmentStatus) -> Self {
        Self {
            expected_status,
            booking: None,
            status: None,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentFilter {
    /// Inclusive.
    pub date_from: Option<NaiveDate>,
    /// Inclusive.
    pub date_to: Option<NaiveDate>,
    pub patient_id: Option<Uuid>,
    pub machine_id: Option<Uuid>,
    pub shift_id: Option<Uuid>,
    pub statuses: Option<Vec<AppointmentStatus>>,
}

impl AppointmentFilter {
    pub fn on_date(date: NaiveDate) -> Self {
        Self {
            date_from: Some(date),
            date_to: Some(date),
            ..Default::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[AppointmentStatus]) -> Self {
        self.statuses = Some(statuses.to_vec());
        self
    }

    pub fn matches(&self, a: &Appointment) -> bool {
        self.date_from.is_none_or(|d| a.appointment_date >= d)
            && self.date_to.is_none_or(|d| a.appointment_date <= d)
            && self.patient_id.is_none_or(|id| a.patient_id == id)
            && self.machine_id.is_none_or(|id| a.machine_id == id)
            && self.shift_id.is_none_or(|id| a.shift_id == id)
            && self
                .statuses
                .as_ref()
                .is_none_or(|set| set.contains(&a.status))
    }
}

/* -------------------------
   Reference data (read-only here)
--------------------------*/

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shift {
    pub shift_id: Uuid,
    pub clinic_id: Uuid,
    pub name: String,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub is_active: bool,
    pub weekdays: Vec<Weekday>,
}

impl Shift {
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        self.weekdays.contains(&date.weekday())
    }

    /// `None` for a shift whose end is not after its start.
    pub fn window(&self) -> Option<TimeWindow> {
        TimeWindow::new(self.start_time, self.end_time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Machine {
    pub machine_id: Uuid,
    pub clinic_id: Uuid,
    pub room_id: Option<Uuid>,
    pub label: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Patient {
    pub patient_id: Uuid,
    pub clinic_id: Uuid,
    pub display_name: String,
}

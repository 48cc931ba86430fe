// src/scheduling/validation.rs

//! Stateless rule checks on booking input and on stored appointments.
//!
//! Nothing here fails with an error type: a rejected candidate is an expected
//! outcome and comes back as a [`ValidationReport`] listing every failed rule.

use chrono::{Months, NaiveDate};
use serde::Serialize;

use crate::models::{Appointment, AppointmentCandidate, AppointmentStatus, Booking};
use crate::scheduling::time_window::TimeWindow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<FieldError>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }
}

impl ValidationReport {
    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(FieldError::new(field, message));
    }

    pub fn merge(&mut self, other: ValidationReport) {
        for e in other.errors {
            self.push(e.field, e.message);
        }
    }

    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        let mut report = Self::default();
        report.push(field, message);
        report
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

/// Numeric bounds applied to every booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingRules {
    pub slot_step_minutes: u16,
    pub default_session_minutes: u16,
    pub min_session_minutes: u16,
    pub max_session_minutes: u16,
    pub booking_horizon_months: u32,
    pub notes_max_chars: usize,
}

impl Default for SchedulingRules {
    fn default() -> Self {
        Self {
            slot_step_minutes: 30,
            default_session_minutes: 240,
            min_session_minutes: 60,
            max_session_minutes: 360,
            booking_horizon_months: 6,
            notes_max_chars: 500,
        }
    }
}

/// Checks a candidate against every booking rule. Rules are independent and all
/// failures are reported together.
pub fn validate(
    candidate: &AppointmentCandidate,
    today: NaiveDate,
    rules: &SchedulingRules,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    if candidate.patient_id.is_none() {
        report.push("patient_id", "patient is required");
    }
    if candidate.machine_id.is_none() {
        report.push("machine_id", "machine is required");
    }
    if candidate.shift_id.is_none() {
        report.push("shift_id", "shift is required");
    }
    if candidate.appointment_date.is_none() {
        report.push("appointment_date", "date is required");
    }
    if candidate.start_time.is_none() {
        report.push("start_time", "start time is required");
    }
    if candidate.end_time.is_none() {
        report.push("end_time", "end time is required");
    }

    if let Some(date) = candidate.appointment_date {
        if date < today {
            report.push("appointment_date", "date cannot be in the past");
        }
        let horizon = today.checked_add_months(Months::new(rules.booking_horizon_months));
        if horizon.is_none_or(|limit| date > limit) {
            report.push(
                "appointment_date",
                format!(
                    "date cannot be more than {} months in the future",
                    rules.booking_horizon_months
                ),
            );
        }
    }

    if let (Some(start), Some(end)) = (candidate.start_time, candidate.end_time) {
        if end <= start {
            report.push("end_time", "end time must be after start time");
        } else {
            let minutes = start.minutes_until(end);
            if minutes < i32::from(rules.min_session_minutes) {
                report.push(
                    "duration",
                    format!("session must last at least {} minutes", rules.min_session_minutes),
                );
            }
            if minutes > i32::from(rules.max_session_minutes) {
                report.push(
                    "duration",
                    format!("session cannot last more than {} minutes", rules.max_session_minutes),
                );
            }
        }
    }

    if let Some(notes) = &candidate.notes {
        if notes.chars().count() > rules.notes_max_chars {
            report.push(
                "notes",
                format!("notes cannot exceed {} characters", rules.notes_max_chars),
            );
        }
    }

    report
}

/// Runs [`validate`] and, on success, returns the typed booking.
pub fn validated_booking(
    candidate: &AppointmentCandidate,
    today: NaiveDate,
    rules: &SchedulingRules,
) -> Result<Booking, ValidationReport> {
    let report = validate(candidate, today, rules);
    if !report.valid {
        return Err(report);
    }

    let window = candidate
        .start_time
        .zip(candidate.end_time)
        .and_then(|(start, end)| TimeWindow::new(start, end));

    match (
        candidate.patient_id,
        candidate.machine_id,
        candidate.shift_id,
        candidate.appointment_date,
        window,
    ) {
        (Some(patient_id), Some(machine_id), Some(shift_id), Some(appointment_date), Some(window)) => {
            Ok(Booking {
                patient_id,
                machine_id,
                shift_id,
                appointment_date,
                window,
                notes: normalize_notes(candidate.notes.as_deref()),
            })
        }
        // unreachable once `validate` passed; report instead of panicking
        _ => Err(ValidationReport::single("appointment", "incomplete appointment")),
    }
}

fn normalize_notes(notes: Option<&str>) -> Option<String> {
    notes.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string)
}

/// Edits are only allowed before the session starts.
pub fn validate_edit(appointment: &Appointment) -> ValidationReport {
    let mut report = ValidationReport::default();
    if !appointment.status.is_editable() {
        report.push(
            "status",
            format!("a {} appointment can no longer be edited", appointment.status),
        );
    }
    report
}

pub fn validate_cancellation(appointment: &Appointment) -> ValidationReport {
    let mut report = ValidationReport::default();
    match appointment.status {
        AppointmentStatus::Scheduled | AppointmentStatus::Confirmed => {}
        AppointmentStatus::Cancelled => report.push("status", "appointment is already cancelled"),
        AppointmentStatus::InProgress => {
            report.push("status", "a session in progress cannot be cancelled")
        }
        other => report.push("status", format!("a {other} appointment cannot be cancelled")),
    }
    report
}

pub fn validate_confirmation(appointment: &Appointment) -> ValidationReport {
    validate_transition(appointment, AppointmentStatus::Confirmed)
}

/// Generic lifecycle check for moving `appointment` into `next`.
pub fn validate_transition(appointment: &Appointment, next: AppointmentStatus) -> ValidationReport {
    let mut report = ValidationReport::default();
    if !appointment.status.can_transition_to(next) {
        report.push(
            "status",
            format!("cannot change a {} appointment to {next}", appointment.status),
        );
    }
    report
}

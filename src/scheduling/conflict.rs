// src/scheduling/conflict.rs

//! Double-booking detection.
//!
//! This is the user-facing pre-check. The storage exclusion constraints remain the
//! authority: two requests can both pass here before either one writes.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::models::{Appointment, AppointmentFilter, AppointmentStatus};
use crate::scheduling::time_window::TimeWindow;
use crate::scheduling::validation::FieldError;
use crate::store::{AppointmentStore, StoreError};

/// The booking being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictProbe {
    pub patient_id: Uuid,
    pub machine_id: Uuid,
    pub window: TimeWindow,
    /// The appointment being edited; it never conflicts with itself.
    pub exclude_appointment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub patient_conflict: bool,
    pub machine_conflict: bool,
    pub conflicting_appointment_ids: Vec<Uuid>,
}

impl ConflictReport {
    pub fn has_conflict(&self) -> bool {
        self.patient_conflict || self.machine_conflict
    }

    pub fn messages(&self) -> Vec<FieldError> {
        let mut out = Vec::new();
        if self.patient_conflict {
            out.push(FieldError::new(
                "patient_id",
                "patient already has a session overlapping this time",
            ));
        }
        if self.machine_conflict {
            out.push(FieldError::new(
                "machine_id",
                "machine is already booked for this time",
            ));
        }
        out
    }
}

/// Compares `probe` against `existing`, which should all share the probe's date.
/// Only scheduled, confirmed and in-progress rows can conflict.
pub fn find_conflicts(existing: &[Appointment], probe: &ConflictProbe) -> ConflictReport {
    let mut report = ConflictReport::default();

    for a in existing {
        if !a.status.blocks_schedule() || Some(a.appointment_id) == probe.exclude_appointment_id {
            continue;
        }
        if !a.window().overlaps(&probe.window) {
            continue;
        }

        let same_patient = a.patient_id == probe.patient_id;
        let same_machine = a.machine_id == probe.machine_id;
        report.patient_conflict |= same_patient;
        report.machine_conflict |= same_machine;
        if same_patient || same_machine {
            report.conflicting_appointment_ids.push(a.appointment_id);
        }
    }

    report
}

/// Loads the clinic's blocking appointments on `date` and checks `probe` against them.
pub async fn detect_conflicts(
    store: &dyn AppointmentStore,
    clinic_id: Uuid,
    date: NaiveDate,
    probe: &ConflictProbe,
) -> Result<ConflictReport, StoreError> {
    let filter = AppointmentFilter::on_date(date).with_statuses(&AppointmentStatus::BLOCKING);
    let existing = store.list_appointments(clinic_id, &filter).await?;

    let report = find_conflicts(&existing, probe);
    debug!(
        %clinic_id,
        %date,
        checked = existing.len(),
        patient_conflict = report.patient_conflict,
        machine_conflict = report.machine_conflict,
        "conflict check"
    );
    Ok(report)
}

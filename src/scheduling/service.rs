// src/scheduling/service.rs

//! Appointment orchestration: validate, check conflicts, then write.
//!
//! Every operation is scoped to the caller's clinic. The conflict check here gives
//! the user an early, specific answer; the store's exclusion rule decides the race
//! between two requests that both passed it.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentCandidate, AppointmentFilter, AppointmentPatch, AppointmentStatus,
    Booking,
};
use crate::scheduling::conflict::{self, ConflictProbe, ConflictReport};
use crate::scheduling::error::SchedulingError;
use crate::scheduling::slots::{self, Slot, SlotError};
use crate::scheduling::validation::{
    self, SchedulingRules, ValidationReport, validate_cancellation, validate_confirmation,
    validate_edit, validate_transition,
};
use crate::store::{AppointmentStore, ConflictKind, ReferenceData, StoreError};

/// Source of "today" for date-bound rules.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// The server's local calendar date.
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// Notified after every committed write so cached schedule views can be refreshed.
pub trait ScheduleEvents: Send + Sync {
    fn appointments_changed(&self, clinic_id: Uuid, date: NaiveDate);
}

pub struct LogScheduleEvents;

impl ScheduleEvents for LogScheduleEvents {
    fn appointments_changed(&self, clinic_id: Uuid, date: NaiveDate) {
        debug!(%clinic_id, %date, "appointment list invalidated");
    }
}

/// Result of a dry-run check; nothing is written.
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub validation: ValidationReport,
    pub conflicts: ConflictReport,
}

pub struct AppointmentService {
    store: Arc<dyn AppointmentStore>,
    reference: Arc<dyn ReferenceData>,
    events: Arc<dyn ScheduleEvents>,
    clock: Arc<dyn Clock>,
    rules: SchedulingRules,
}

impl AppointmentService {
    pub fn new(store: Arc<dyn AppointmentStore>, reference: Arc<dyn ReferenceData>) -> Self {
        Self {
            store,
            reference,
            events: Arc::new(LogScheduleEvents),
            clock: Arc::new(SystemClock),
            rules: SchedulingRules::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn ScheduleEvents>) -> Self {
        self.events = events;
        self
    }

    pub fn with_rules(mut self, rules: SchedulingRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn rules(&self) -> &SchedulingRules {
        &self.rules
    }

    /* ============================================================
       Read side
       ============================================================ */

    pub fn validate(&self, candidate: &AppointmentCandidate) -> ValidationReport {
        validation::validate(candidate, self.clock.today(), &self.rules)
    }

    pub async fn detect_conflicts(
        &self,
        clinic_id: Uuid,
        date: NaiveDate,
        probe: &ConflictProbe,
    ) -> Result<ConflictReport, SchedulingError> {
        conflict::detect_conflicts(self.store.as_ref(), clinic_id, date, probe)
            .await
            .map_err(|e| self.store_failure("detect conflicts", e))
    }

    /// Runs every check `create`/`update` would run and reports both outcomes.
    /// Conflicts are only looked up once the input is valid.
    pub async fn check(
        &self,
        clinic_id: Uuid,
        candidate: &AppointmentCandidate,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<CheckOutcome, SchedulingError> {
        let booking = match validation::validated_booking(candidate, self.clock.today(), &self.rules)
        {
            Ok(b) => b,
            Err(validation) => {
                return Ok(CheckOutcome {
                    validation,
                    conflicts: ConflictReport::default(),
                });
            }
        };

        let validation = self.check_references(clinic_id, &booking).await?;
        let conflicts = if validation.valid {
            self.detect_conflicts(clinic_id, booking.appointment_date, &probe(&booking, exclude_appointment_id))
                .await?
        } else {
            ConflictReport::default()
        };
        Ok(CheckOutcome {
            validation,
            conflicts,
        })
    }

    pub async fn available_slots(
        &self,
        clinic_id: Uuid,
        date: NaiveDate,
        shift_id: Uuid,
        machine_ids: &[Uuid],
    ) -> Result<Vec<Slot>, SchedulingError> {
        slots::available_slots(
            self.store.as_ref(),
            self.reference.as_ref(),
            clinic_id,
            date,
            shift_id,
            machine_ids,
            &self.rules,
        )
        .await
        .map_err(|e| match e {
            SlotError::ShiftNotFound => SchedulingError::NotFound("shift"),
            SlotError::Store(e) => self.store_failure("list slots", e),
        })
    }

    pub async fn get(&self, clinic_id: Uuid, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        self.store
            .get_appointment(clinic_id, appointment_id)
            .await
            .map_err(|e| self.store_failure("load appointment", e))?
            .ok_or(SchedulingError::NotFound("appointment"))
    }

    pub async fn list(
        &self,
        clinic_id: Uuid,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        self.store
            .list_appointments(clinic_id, filter)
            .await
            .map_err(|e| self.store_failure("list appointments", e))
    }

    /* ============================================================
       Write side
       ============================================================ */

    pub async fn create(
        &self,
        clinic_id: Uuid,
        candidate: &AppointmentCandidate,
    ) -> Result<Appointment, SchedulingError> {
        let booking = self.prepare(clinic_id, candidate, None).await?;

        let created = match self.store.insert_appointment(clinic_id, &booking).await {
            Ok(a) => a,
            Err(StoreError::Conflict(kind)) => {
                return Err(self.lost_race(clinic_id, &booking, None, kind).await);
            }
            Err(e) => return Err(self.store_failure("create appointment", e)),
        };

        info!(
            %clinic_id,
            appointment_id = %created.appointment_id,
            machine_id = %created.machine_id,
            date = %created.appointment_date,
            "appointment scheduled"
        );
        self.events.appointments_changed(clinic_id, created.appointment_date);
        Ok(created)
    }

    pub async fn update(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        candidate: &AppointmentCandidate,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.get(clinic_id, appointment_id).await?;

        let mut report = validate_edit(&current);
        let booking = match validation::validated_booking(candidate, self.clock.today(), &self.rules) {
            Ok(b) if report.valid => b,
            Ok(_) => return Err(report.into()),
            Err(fields) => {
                report.merge(fields);
                return Err(report.into());
            }
        };
        self.ensure_bookable(clinic_id, &booking, Some(appointment_id)).await?;

        let mut patch = AppointmentPatch::new(current.status);
        patch.notes = Some(booking.notes.clone());
        patch.booking = Some(booking.clone());

        let updated = match self.store.update_appointment(clinic_id, appointment_id, &patch).await {
            Ok(Some(a)) => a,
            Ok(None) => return Err(self.changed_meanwhile(clinic_id, appointment_id).await),
            Err(StoreError::Conflict(kind)) => {
                return Err(self.lost_race(clinic_id, &booking, Some(appointment_id), kind).await);
            }
            Err(e) => return Err(self.store_failure("update appointment", e)),
        };

        info!(%clinic_id, %appointment_id, "appointment rescheduled");
        self.events.appointments_changed(clinic_id, current.appointment_date);
        if updated.appointment_date != current.appointment_date {
            self.events.appointments_changed(clinic_id, updated.appointment_date);
        }
        Ok(updated)
    }

    /// Cancels without deleting; the reason replaces the notes.
    pub async fn cancel(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        reason: &str,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.get(clinic_id, appointment_id).await?;

        let mut report = validate_cancellation(&current);
        let reason = reason.trim();
        if reason.is_empty() {
            report.push("reason", "a cancellation reason is required");
        } else if reason.chars().count() > self.rules.notes_max_chars {
            report.push(
                "reason",
                format!("reason cannot exceed {} characters", self.rules.notes_max_chars),
            );
        }
        if !report.valid {
            return Err(report.into());
        }

        let mut patch = AppointmentPatch::new(current.status);
        patch.status = Some(AppointmentStatus::Cancelled);
        patch.notes = Some(Some(reason.to_string()));
        self.apply(clinic_id, &current, &patch).await
    }

    pub async fn confirm(&self, clinic_id: Uuid, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        let current = self.get(clinic_id, appointment_id).await?;
        let report = validate_confirmation(&current);
        if !report.valid {
            return Err(report.into());
        }
        self.move_to(clinic_id, &current, AppointmentStatus::Confirmed).await
    }

    pub async fn start(&self, clinic_id: Uuid, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        self.transition(clinic_id, appointment_id, AppointmentStatus::InProgress).await
    }

    pub async fn complete(&self, clinic_id: Uuid, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        self.transition(clinic_id, appointment_id, AppointmentStatus::Completed).await
    }

    pub async fn mark_no_show(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<Appointment, SchedulingError> {
        self.transition(clinic_id, appointment_id, AppointmentStatus::NoShow).await
    }

    /* ============================================================
       Helpers
       ============================================================ */

    async fn transition(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        next: AppointmentStatus,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.get(clinic_id, appointment_id).await?;
        let report = validate_transition(&current, next);
        if !report.valid {
            return Err(report.into());
        }
        self.move_to(clinic_id, &current, next).await
    }

    async fn move_to(
        &self,
        clinic_id: Uuid,
        current: &Appointment,
        next: AppointmentStatus,
    ) -> Result<Appointment, SchedulingError> {
        let mut patch = AppointmentPatch::new(current.status);
        patch.status = Some(next);
        self.apply(clinic_id, current, &patch).await
    }

    /// Status-only writes; they never widen a booking, so a storage conflict here
    /// is reported as a fault.
    async fn apply(
        &self,
        clinic_id: Uuid,
        current: &Appointment,
        patch: &AppointmentPatch,
    ) -> Result<Appointment, SchedulingError> {
        let appointment_id = current.appointment_id;
        let updated = match self.store.update_appointment(clinic_id, appointment_id, patch).await {
            Ok(Some(a)) => a,
            Ok(None) => return Err(self.changed_meanwhile(clinic_id, appointment_id).await),
            Err(e) => return Err(self.store_failure("update appointment status", e)),
        };

        info!(
            %clinic_id,
            %appointment_id,
            from = %current.status,
            to = %updated.status,
            "appointment status changed"
        );
        self.events.appointments_changed(clinic_id, updated.appointment_date);
        Ok(updated)
    }

    async fn prepare(
        &self,
        clinic_id: Uuid,
        candidate: &AppointmentCandidate,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Booking, SchedulingError> {
        let booking = validation::validated_booking(candidate, self.clock.today(), &self.rules)?;
        self.ensure_bookable(clinic_id, &booking, exclude_appointment_id).await?;
        Ok(booking)
    }

    async fn ensure_bookable(
        &self,
        clinic_id: Uuid,
        booking: &Booking,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<(), SchedulingError> {
        let report = self.check_references(clinic_id, booking).await?;
        if !report.valid {
            return Err(report.into());
        }

        let conflicts = self
            .detect_conflicts(
                clinic_id,
                booking.appointment_date,
                &probe(booking, exclude_appointment_id),
            )
            .await?;
        if conflicts.has_conflict() {
            warn!(
                %clinic_id,
                machine_id = %booking.machine_id,
                patient_id = %booking.patient_id,
                date = %booking.appointment_date,
                start = %booking.window.start,
                end = %booking.window.end,
                "booking rejected: overlaps existing appointment"
            );
            return Err(SchedulingError::Conflict(conflicts));
        }
        Ok(())
    }

    /// Patient must exist; machine and shift must exist and be in service on the date.
    async fn check_references(
        &self,
        clinic_id: Uuid,
        booking: &Booking,
    ) -> Result<ValidationReport, SchedulingError> {
        let mut report = ValidationReport::default();

        let patient = self
            .reference
            .get_patient(clinic_id, booking.patient_id)
            .await
            .map_err(|e| self.store_failure("load patient", e))?;
        if patient.is_none() {
            report.push("patient_id", "patient not found");
        }

        let machine = self
            .reference
            .get_machine(clinic_id, booking.machine_id)
            .await
            .map_err(|e| self.store_failure("load machine", e))?;
        match machine {
            None => report.push("machine_id", "machine not found"),
            Some(m) if !m.is_active => report.push("machine_id", "machine is out of service"),
            Some(_) => {}
        }

        let shift = self
            .reference
            .get_shift(clinic_id, booking.shift_id)
            .await
            .map_err(|e| self.store_failure("load shift", e))?;
        match shift {
            None => report.push("shift_id", "shift not found"),
            Some(s) if !s.is_active => report.push("shift_id", "shift is not active"),
            Some(s) if !s.applies_on(booking.appointment_date) => {
                report.push("shift_id", format!("{} does not run on this weekday", s.name))
            }
            Some(_) => {}
        }

        Ok(report)
    }

    /// The store rejected a write that passed the pre-check: another request
    /// booked an overlapping window in between.
    async fn lost_race(
        &self,
        clinic_id: Uuid,
        booking: &Booking,
        exclude_appointment_id: Option<Uuid>,
        kind: ConflictKind,
    ) -> SchedulingError {
        warn!(
            %clinic_id,
            machine_id = %booking.machine_id,
            patient_id = %booking.patient_id,
            date = %booking.appointment_date,
            ?kind,
            "concurrent booking won the slot"
        );

        let mut report = conflict::detect_conflicts(
            self.store.as_ref(),
            clinic_id,
            booking.appointment_date,
            &probe(booking, exclude_appointment_id),
        )
        .await
        .unwrap_or_default();
        match kind {
            ConflictKind::Machine => report.machine_conflict = true,
            ConflictKind::Patient => report.patient_conflict = true,
            ConflictKind::Unknown if !report.has_conflict() => report.machine_conflict = true,
            ConflictKind::Unknown => {}
        }
        SchedulingError::Conflict(report)
    }

    async fn changed_meanwhile(&self, clinic_id: Uuid, appointment_id: Uuid) -> SchedulingError {
        match self.get(clinic_id, appointment_id).await {
            Ok(now) => SchedulingError::Validation(ValidationReport::single(
                "status",
                format!("appointment was changed to {} meanwhile; reload and retry", now.status),
            )),
            Err(e) => e,
        }
    }

    fn store_failure(&self, op: &'static str, e: StoreError) -> SchedulingError {
        error!(op, error = %e, "scheduling persistence failure");
        SchedulingError::Persistence(e)
    }
}

fn probe(booking: &Booking, exclude_appointment_id: Option<Uuid>) -> ConflictProbe {
    ConflictProbe {
        patient_id: booking.patient_id,
        machine_id: booking.machine_id,
        window: booking.window,
        exclude_appointment_id,
    }
}

// src/store/memory.rs

//! In-process adapters. The appointment store enforces the same overlap
//! exclusion as the Postgres constraints, under one lock, so it can stand in for
//! the database in tests and local tooling.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{AppointmentStore, ConflictKind, ReferenceData, StoreError};
use crate::models::{
    Appointment, AppointmentFilter, AppointmentPatch, AppointmentStatus, Booking, Machine,
    Patient, Shift,
};
use crate::scheduling::conflict::{find_conflicts, ConflictProbe};

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    m.lock()
        .map_err(|_| StoreError::Database("store lock poisoned".into()))
}

#[derive(Default)]
pub struct MemoryAppointmentStore {
    rows: Mutex<Vec<Appointment>>,
}

impl MemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts a row in place as-is, bypassing the exclusion check.
    pub fn seed(&self, appointment: Appointment) -> Result<(), StoreError> {
        lock(&self.rows)?.push(appointment);
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<Appointment> {
        self.rows.lock().map(|rows| rows.clone()).unwrap_or_default()
    }
}

fn exclusion_check(
    rows: &[Appointment],
    clinic_id: Uuid,
    booking: &Booking,
    exclude: Option<Uuid>,
) -> Result<(), StoreError> {
    let same_day: Vec<Appointment> = rows
        .iter()
        .filter(|a| a.clinic_id == clinic_id && a.appointment_date == booking.appointment_date)
        .cloned()
        .collect();
    let report = find_conflicts(
        &same_day,
        &ConflictProbe {
            patient_id: booking.patient_id,
            machine_id: booking.machine_id,
            window: booking.window,
            exclude_appointment_id: exclude,
        },
    );
    if report.machine_conflict {
        return Err(StoreError::Conflict(ConflictKind::Machine));
    }
    if report.patient_conflict {
        return Err(StoreError::Conflict(ConflictKind::Patient));
    }
    Ok(())
}

#[async_trait]
impl AppointmentStore for MemoryAppointmentStore {
    async fn list_appointments(
        &self,
        clinic_id: Uuid,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, StoreError> {
        let rows = lock(&self.rows)?;
        let mut out: Vec<Appointment> = rows
            .iter()
            .filter(|a| a.clinic_id == clinic_id && filter.matches(a))
            .cloned()
            .collect();
        out.sort_by_key(|a| (a.appointment_date, a.start_time));
        Ok(out)
    }

    async fn get_appointment(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, StoreError> {
        let rows = lock(&self.rows)?;
        Ok(rows
            .iter()
            .find(|a| a.clinic_id == clinic_id && a.appointment_id == appointment_id)
            .cloned())
    }

    async fn insert_appointment(
        &self,
        clinic_id: Uuid,
        booking: &Booking,
    ) -> Result<Appointment, StoreError> {
        let mut rows = lock(&self.rows)?;
        exclusion_check(&rows, clinic_id, booking, None)?;

        let now = Utc::now();
        let appointment = Appointment {
            appointment_id: Uuid::new_v4(),
            clinic_id,
            patient_id: booking.patient_id,
            machine_id: booking.machine_id,
            shift_id: booking.shift_id,
            appointment_date: booking.appointment_date,
            start_time: booking.window.start,
            end_time: booking.window.end,
            duration_minutes: booking.duration_minutes(),
            status: AppointmentStatus::Scheduled,
            notes: booking.notes.clone(),
            created_at: now,
            updated_at: now,
        };
        rows.push(appointment.clone());
        Ok(appointment)
    }

    async fn update_appointment(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        patch: &AppointmentPatch,
    ) -> Result<Option<Appointment>, StoreError> {
        let mut rows = lock(&self.rows)?;
        let Some(idx) = rows.iter().position(|a| {
            a.clinic_id == clinic_id
                && a.appointment_id == appointment_id
                && a.status == patch.expected_status
        }) else {
            return Ok(None);
        };

        let mut next = rows[idx].clone();
        if let Some(b) = &patch.booking {
            next.patient_id = b.patient_id;
            next.machine_id = b.machine_id;
            next.shift_id = b.shift_id;
            next.appointment_date = b.appointment_date;
            next.start_time = b.window.start;
            next.end_time = b.window.end;
            next.duration_minutes = b.duration_minutes();
        }
        if let Some(status) = patch.status {
            next.status = status;
        }
        if let Some(notes) = &patch.notes {
            next.notes = notes.clone();
        }
        next.updated_at = Utc::now();

        if next.status.blocks_schedule() {
            let as_booking = Booking {
                patient_id: next.patient_id,
                machine_id: next.machine_id,
                shift_id: next.shift_id,
                appointment_date: next.appointment_date,
                window: next.window(),
                notes: None,
            };
            exclusion_check(&rows, clinic_id, &as_booking, Some(appointment_id))?;
        }

        rows[idx] = next.clone();
        Ok(Some(next))
    }
}

#[derive(Default)]
pub struct MemoryReferenceData {
    shifts: Mutex<Vec<Shift>>,
    machines: Mutex<Vec<Machine>>,
    patients: Mutex<Vec<Patient>>,
}

impl MemoryReferenceData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_shift(&self, shift: Shift) -> Result<(), StoreError> {
        lock(&self.shifts)?.push(shift);
        Ok(())
    }

    pub fn add_machine(&self, machine: Machine) -> Result<(), StoreError> {
        lock(&self.machines)?.push(machine);
        Ok(())
    }

    pub fn add_patient(&self, patient: Patient) -> Result<(), StoreError> {
        lock(&self.patients)?.push(patient);
        Ok(())
    }
}

#[async_trait]
impl ReferenceData for MemoryReferenceData {
    async fn get_shift(&self, clinic_id: Uuid, shift_id: Uuid) -> Result<Option<Shift>, StoreError> {
        let shifts = lock(&self.shifts)?;
        Ok(shifts
            .iter()
            .find(|s| s.clinic_id == clinic_id && s.shift_id == shift_id)
            .cloned())
    }

    async fn get_machine(
        &self,
        clinic_id: Uuid,
        machine_id: Uuid,
    ) -> Result<Option<Machine>, StoreError> {
        let machines = lock(&self.machines)?;
        Ok(machines
            .iter()
            .find(|m| m.clinic_id == clinic_id && m.machine_id == machine_id)
            .cloned())
    }

    async fn list_machines(&self, clinic_id: Uuid) -> Result<Vec<Machine>, StoreError> {
        let machines = lock(&self.machines)?;
        Ok(machines
            .iter()
            .filter(|m| m.clinic_id == clinic_id)
            .cloned()
            .collect())
    }

    async fn get_patient(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Option<Patient>, StoreError> {
        let patients = lock(&self.patients)?;
        Ok(patients
            .iter()
            .find(|p| p.clinic_id == clinic_id && p.patient_id == patient_id)
            .cloned())
    }
}

// src/store/mod.rs

//! Persistence ports consumed by the scheduling core.
//!
//! Every call is scoped by `clinic_id`; implementations must never return rows
//! belonging to another clinic.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentFilter, AppointmentPatch, Booking, Machine, Patient, Shift,
};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryAppointmentStore, MemoryReferenceData};
pub use postgres::PgScheduleStore;

/// Which storage-level exclusion rule rejected a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Machine,
    Patient,
    Unknown,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("booking overlaps an existing appointment ({0:?})")]
    Conflict(ConflictKind),

    #[error("db error: {0}")]
    Database(String),
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn list_appointments(
        &self,
        clinic_id: Uuid,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn get_appointment(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, StoreError>;

    /// Inserts with status `scheduled`. Must reject, atomically with the write,
    /// any overlap with a blocking appointment on the same machine or for the
    /// same patient (`StoreError::Conflict`).
    async fn insert_appointment(
        &self,
        clinic_id: Uuid,
        booking: &Booking,
    ) -> Result<Appointment, StoreError>;

    /// Applies `patch` only while the row still has `patch.expected_status`.
    /// `Ok(None)` when the row is missing or its status moved on.
    async fn update_appointment(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        patch: &AppointmentPatch,
    ) -> Result<Option<Appointment>, StoreError>;
}

/// Shift, machine and patient records owned by other parts of the system.
#[async_trait]
pub trait ReferenceData: Send + Sync {
    async fn get_shift(&self, clinic_id: Uuid, shift_id: Uuid) -> Result<Option<Shift>, StoreError>;

    async fn get_machine(
        &self,
        clinic_id: Uuid,
        machine_id: Uuid,
    ) -> Result<Option<Machine>, StoreError>;

    async fn list_machines(&self, clinic_id: Uuid) -> Result<Vec<Machine>, StoreError>;

    async fn get_patient(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Option<Patient>, StoreError>;
}

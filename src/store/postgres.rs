// src/store/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc, Weekday};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::{AppointmentStore, ConflictKind, ReferenceData, StoreError};
use crate::models::{
    Appointment, AppointmentFilter, AppointmentPatch, AppointmentStatus, Booking, Machine,
    Patient, Shift,
};
use crate::scheduling::time_window::TimeOfDay;

const MACHINE_OVERLAP_CONSTRAINT: &str = "appointment_machine_no_overlap";
const PATIENT_OVERLAP_CONSTRAINT: &str = "appointment_patient_no_overlap";

const APPOINTMENT_COLUMNS: &str = r#"
    appointment_id,
    clinic_id,
    patient_id,
    machine_id,
    shift_id,
    appointment_date,
    start_minute,
    end_minute,
    duration_minutes,
    status,
    notes,
    created_at,
    updated_at
"#;

#[derive(Clone)]
pub struct PgScheduleStore {
    pool: PgPool,
}

impl PgScheduleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
struct AppointmentRow {
    appointment_id: Uuid,
    clinic_id: Uuid,
    patient_id: Uuid,
    machine_id: Uuid,
    shift_id: Uuid,
    appointment_date: NaiveDate,
    start_minute: i32,
    end_minute: i32,
    duration_minutes: i32,
    status: AppointmentStatus,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = StoreError;

    fn try_from(r: AppointmentRow) -> Result<Self, Self::Error> {
        Ok(Appointment {
            appointment_id: r.appointment_id,
            clinic_id: r.clinic_id,
            patient_id: r.patient_id,
            machine_id: r.machine_id,
            shift_id: r.shift_id,
            appointment_date: r.appointment_date,
            start_time: time_column(r.start_minute)?,
            end_time: time_column(r.end_minute)?,
            duration_minutes: r.duration_minutes,
            status: r.status,
            notes: r.notes,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ShiftRow {
    shift_id: Uuid,
    clinic_id: Uuid,
    name: String,
    start_minute: i32,
    end_minute: i32,
    is_active: bool,
    weekdays: Vec<i16>,
}

impl TryFrom<ShiftRow> for Shift {
    type Error = StoreError;

    fn try_from(r: ShiftRow) -> Result<Self, Self::Error> {
        Ok(Shift {
            shift_id: r.shift_id,
            clinic_id: r.clinic_id,
            name: r.name,
            start_time: time_column(r.start_minute)?,
            end_time: time_column(r.end_minute)?,
            is_active: r.is_active,
            weekdays: r.weekdays.into_iter().filter_map(iso_weekday).collect(),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MachineRow {
    machine_id: Uuid,
    clinic_id: Uuid,
    room_id: Option<Uuid>,
    label: String,
    is_active: bool,
}

impl From<MachineRow> for Machine {
    fn from(r: MachineRow) -> Self {
        Machine {
            machine_id: r.machine_id,
            clinic_id: r.clinic_id,
            room_id: r.room_id,
            label: r.label,
            is_active: r.is_active,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PatientRow {
    patient_id: Uuid,
    clinic_id: Uuid,
    display_name: String,
}

/* -------------------------
   Helpers
--------------------------*/

fn time_column(minutes: i32) -> Result<TimeOfDay, StoreError> {
    u16::try_from(minutes)
        .ok()
        .and_then(|m| TimeOfDay::from_minutes(m).ok())
        .ok_or_else(|| StoreError::Database(format!("row decode error: bad minute value {minutes}")))
}

fn iso_weekday(n: i16) -> Option<Weekday> {
    match n {
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        7 => Some(Weekday::Sun),
        _ => None,
    }
}

/// Exclusion (23P01) and unique (23505) violations are booking races; everything
/// else is opaque.
fn db_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if matches!(db.code().as_deref(), Some("23P01") | Some("23505")) {
            let kind = match db.constraint() {
                Some(MACHINE_OVERLAP_CONSTRAINT) => ConflictKind::Machine,
                Some(PATIENT_OVERLAP_CONSTRAINT) => ConflictKind::Patient,
                _ => ConflictKind::Unknown,
            };
            return StoreError::Conflict(kind);
        }
    }
    StoreError::Database(e.to_string())
}

fn status_codes(statuses: &Option<Vec<AppointmentStatus>>) -> Option<Vec<i16>> {
    statuses
        .as_ref()
        .map(|set| set.iter().map(|s| *s as i16).collect())
}

fn minute(t: TimeOfDay) -> i32 {
    i32::from(t.minutes())
}

/* -------------------------
   Appointments
--------------------------*/

#[async_trait]
impl AppointmentStore for PgScheduleStore {
    async fn list_appointments(
        &self,
        clinic_id: Uuid,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, StoreError> {
        debug!(%clinic_id, ?filter, "listing appointments");

        let sql = format!(
            r#"
            SELECT {APPOINTMENT_COLUMNS}
            FROM appointment
            WHERE clinic_id = $1
              AND ($2::date IS NULL OR appointment_date >= $2)
              AND ($3::date IS NULL OR appointment_date <= $3)
              AND ($4::uuid IS NULL OR patient_id = $4)
              AND ($5::uuid IS NULL OR machine_id = $5)
              AND ($6::uuid IS NULL OR shift_id = $6)
              AND ($7::smallint[] IS NULL OR status = ANY($7))
            ORDER BY appointment_date ASC, start_minute ASC
            "#
        );

        let rows: Vec<AppointmentRow> = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(clinic_id)
            .bind(filter.date_from)
            .bind(filter.date_to)
            .bind(filter.patient_id)
            .bind(filter.machine_id)
            .bind(filter.shift_id)
            .bind(status_codes(&filter.statuses))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.into_iter().map(Appointment::try_from).collect()
    }

    async fn get_appointment(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, StoreError> {
        let sql = format!(
            r#"
            SELECT {APPOINTMENT_COLUMNS}
            FROM appointment
            WHERE clinic_id = $1
              AND appointment_id = $2
            "#
        );

        sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(clinic_id)
            .bind(appointment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .map(Appointment::try_from)
            .transpose()
    }

    async fn insert_appointment(
        &self,
        clinic_id: Uuid,
        booking: &Booking,
    ) -> Result<Appointment, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO appointment (
              clinic_id,
              patient_id,
              machine_id,
              shift_id,
              appointment_date,
              start_minute,
              end_minute,
              duration_minutes,
              status,
              notes
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8, 0, $9)
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(clinic_id)
            .bind(booking.patient_id)
            .bind(booking.machine_id)
            .bind(booking.shift_id)
            .bind(booking.appointment_date)
            .bind(minute(booking.window.start))
            .bind(minute(booking.window.end))
            .bind(booking.duration_minutes())
            .bind(booking.notes.as_deref())
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        Appointment::try_from(row)
    }

    async fn update_appointment(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        patch: &AppointmentPatch,
    ) -> Result<Option<Appointment>, StoreError> {
        // COALESCE keeps columns the patch leaves untouched; notes use an explicit
        // flag so they can be cleared.
        let sql = format!(
            r#"
            UPDATE appointment
            SET
              patient_id       = COALESCE($4, patient_id),
              machine_id       = COALESCE($5, machine_id),
              shift_id         = COALESCE($6, shift_id),
              appointment_date = COALESCE($7, appointment_date),
              start_minute     = COALESCE($8, start_minute),
              end_minute       = COALESCE($9, end_minute),
              duration_minutes = COALESCE($10, duration_minutes),
              status           = COALESCE($11, status),
              notes            = CASE WHEN $12 THEN $13 ELSE notes END,
              updated_at       = now()
            WHERE clinic_id = $1
              AND appointment_id = $2
              AND status = $3
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        );

        let b = patch.booking.as_ref();
        let row = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(clinic_id)
            .bind(appointment_id)
            .bind(patch.expected_status)
            .bind(b.map(|b| b.patient_id))
            .bind(b.map(|b| b.machine_id))
            .bind(b.map(|b| b.shift_id))
            .bind(b.map(|b| b.appointment_date))
            .bind(b.map(|b| minute(b.window.start)))
            .bind(b.map(|b| minute(b.window.end)))
            .bind(b.map(Booking::duration_minutes))
            .bind(patch.status)
            .bind(patch.notes.is_some())
            .bind(patch.notes.clone().flatten())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(Appointment::try_from).transpose()
    }
}

/* -------------------------
   Reference data
--------------------------*/

#[async_trait]
impl ReferenceData for PgScheduleStore {
    async fn get_shift(&self, clinic_id: Uuid, shift_id: Uuid) -> Result<Option<Shift>, StoreError> {
        sqlx::query_as::<_, ShiftRow>(
            r#"
            SELECT shift_id, clinic_id, name, start_minute, end_minute, is_active, weekdays
            FROM shift
            WHERE clinic_id = $1
              AND shift_id = $2
            "#,
        )
        .bind(clinic_id)
        .bind(shift_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(Shift::try_from)
        .transpose()
    }

    async fn get_machine(
        &self,
        clinic_id: Uuid,
        machine_id: Uuid,
    ) -> Result<Option<Machine>, StoreError> {
        let row = sqlx::query_as::<_, MachineRow>(
            r#"
            SELECT machine_id, clinic_id, room_id, label, is_active
            FROM machine
            WHERE clinic_id = $1
              AND machine_id = $2
            "#,
        )
        .bind(clinic_id)
        .bind(machine_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(Machine::from))
    }

    async fn list_machines(&self, clinic_id: Uuid) -> Result<Vec<Machine>, StoreError> {
        let rows: Vec<MachineRow> = sqlx::query_as::<_, MachineRow>(
            r#"
            SELECT machine_id, clinic_id, room_id, label, is_active
            FROM machine
            WHERE clinic_id = $1
            ORDER BY label ASC
            "#,
        )
        .bind(clinic_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(Machine::from).collect())
    }

    async fn get_patient(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Option<Patient>, StoreError> {
        let row = sqlx::query_as::<_, PatientRow>(
            r#"
            SELECT patient_id, clinic_id, first_name || ' ' || last_name AS display_name
            FROM patient
            WHERE clinic_id = $1
              AND patient_id = $2
            "#,
        )
        .bind(clinic_id)
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(|r| Patient {
            patient_id: r.patient_id,
            clinic_id: r.clinic_id,
            display_name: r.display_name,
        }))
    }
}

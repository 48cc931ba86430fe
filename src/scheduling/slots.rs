// src/scheduling/slots.rs

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::models::{Appointment, AppointmentFilter, AppointmentStatus, Machine, Shift};
use crate::scheduling::time_window::{generate_slots, overlaps, TimeOfDay, TimeWindow};
use crate::scheduling::validation::SchedulingRules;
use crate::store::{AppointmentStore, ReferenceData, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub machine_id: Uuid,
}

/// Bookable sessions per machine inside `shift`, skipping any start whose
/// `session_minutes` window collides with a blocking booking on that machine.
/// Starts whose session would run past midnight are dropped. The iterator borrows
/// its inputs and holds no other state, so calling again replays the same slots.
pub fn open_slots<'a>(
    shift: TimeWindow,
    machine_ids: &'a [Uuid],
    bookings: &'a [Appointment],
    step_minutes: u16,
    session_minutes: u16,
) -> impl Iterator<Item = Slot> + 'a {
    machine_ids.iter().flat_map(move |&machine_id| {
        generate_slots(shift.start, shift.end, step_minutes).filter_map(move |start| {
            let end = start.checked_add_minutes(session_minutes)?;
            let taken = bookings.iter().any(|b| {
                b.machine_id == machine_id
                    && b.status.blocks_schedule()
                    && overlaps(start, end, b.start_time, b.end_time)
            });
            (!taken).then_some(Slot {
                start_time: start,
                end_time: end,
                machine_id,
            })
        })
    })
}

/// What the slot lookup could not resolve.
#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    #[error("shift not found")]
    ShiftNotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Recomputes available slots for `date` from current bookings.
///
/// An empty `machine_ids` means every active machine of the clinic. Inactive or
/// unknown machines are skipped; an inactive shift, or one that does not run on
/// the date's weekday, yields no slots.
pub async fn available_slots(
    store: &dyn AppointmentStore,
    reference: &dyn ReferenceData,
    clinic_id: Uuid,
    date: NaiveDate,
    shift_id: Uuid,
    machine_ids: &[Uuid],
    rules: &SchedulingRules,
) -> Result<Vec<Slot>, SlotError> {
    let shift = reference
        .get_shift(clinic_id, shift_id)
        .await?
        .ok_or(SlotError::ShiftNotFound)?;

    let Some(window) = bookable_window(&shift, date) else {
        debug!(%clinic_id, %shift_id, %date, "shift not bookable on date");
        return Ok(vec![]);
    };

    let machines = reference.list_machines(clinic_id).await?;
    let machines = active_machines(&machines, machine_ids);
    if machines.is_empty() {
        return Ok(vec![]);
    }

    let filter = AppointmentFilter::on_date(date).with_statuses(&AppointmentStatus::BLOCKING);
    let bookings = store.list_appointments(clinic_id, &filter).await?;

    Ok(open_slots(
        window,
        &machines,
        &bookings,
        rules.slot_step_minutes,
        rules.default_session_minutes,
    )
    .collect())
}

fn bookable_window(shift: &Shift, date: NaiveDate) -> Option<TimeWindow> {
    if !shift.is_active || !shift.applies_on(date) {
        return None;
    }
    shift.window()
}

/// Keeps the requested order; duplicates are dropped.
fn active_machines(machines: &[Machine], requested: &[Uuid]) -> Vec<Uuid> {
    let active: Vec<Uuid> = machines
        .iter()
        .filter(|m| m.is_active)
        .map(|m| m.machine_id)
        .collect();
    if requested.is_empty() {
        return active;
    }
    let mut seen = HashSet::new();
    requested
        .iter()
        .copied()
        .filter(|id| active.contains(id) && seen.insert(*id))
        .collect()
}

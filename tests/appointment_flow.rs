use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc, Weekday};
use uuid::Uuid;

use hdcms_scheduler::models::{
    Appointment, AppointmentCandidate, AppointmentFilter, AppointmentPatch, AppointmentStatus,
    Booking, Machine, Patient, Shift,
};
use hdcms_scheduler::scheduling::{
    AppointmentService, ConflictProbe, FixedClock, ScheduleEvents, SchedulingError, TimeOfDay,
    TimeWindow,
};
use hdcms_scheduler::store::{
    AppointmentStore, MemoryAppointmentStore, MemoryReferenceData, StoreError,
};

fn t(s: &str) -> TimeOfDay {
    s.parse().unwrap()
}

fn today() -> NaiveDate {
    // a Monday
    NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
}

#[derive(Default)]
struct RecordingEvents {
    seen: Mutex<Vec<(Uuid, NaiveDate)>>,
}

impl ScheduleEvents for RecordingEvents {
    fn appointments_changed(&self, clinic_id: Uuid, date: NaiveDate) {
        self.seen.lock().unwrap().push((clinic_id, date));
    }
}

struct Clinic {
    id: Uuid,
    shift: Uuid,
    sunday_shift: Uuid,
    m1: Uuid,
    m2: Uuid,
    retired_machine: Uuid,
    p1: Uuid,
    p2: Uuid,
}

fn seed_clinic(reference: &MemoryReferenceData) -> Clinic {
    let c = Clinic {
        id: Uuid::new_v4(),
        shift: Uuid::new_v4(),
        sunday_shift: Uuid::new_v4(),
        m1: Uuid::new_v4(),
        m2: Uuid::new_v4(),
        retired_machine: Uuid::new_v4(),
        p1: Uuid::new_v4(),
        p2: Uuid::new_v4(),
    };

    reference.add_shift(Shift {
        shift_id: c.shift,
        clinic_id: c.id,
        name: "Day".into(),
        start_time: t("06:00"),
        end_time: t("18:00"),
        is_active: true,
        weekdays: vec![
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
        ],
    })
    .unwrap();
    reference.add_shift(Shift {
        shift_id: c.sunday_shift,
        clinic_id: c.id,
        name: "Sunday".into(),
        start_time: t("08:00"),
        end_time: t("14:00"),
        is_active: true,
        weekdays: vec![Weekday::Sun],
    })
    .unwrap();
    for (id, active) in [(c.m1, true), (c.m2, true), (c.retired_machine, false)] {
        reference.add_machine(Machine {
            machine_id: id,
            clinic_id: c.id,
            room_id: None,
            label: format!("HD-{id}"),
            is_active: active,
        })
        .unwrap();
    }
    for (id, name) in [(c.p1, "P1"), (c.p2, "P2")] {
        reference.add_patient(Patient {
            patient_id: id,
            clinic_id: c.id,
            display_name: name.into(),
        })
        .unwrap();
    }
    c
}

struct Harness {
    service: AppointmentService,
    store: Arc<MemoryAppointmentStore>,
    events: Arc<RecordingEvents>,
    clinic: Clinic,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryAppointmentStore::new());
    let reference = Arc::new(MemoryReferenceData::new());
    let clinic = seed_clinic(&reference);
    let events = Arc::new(RecordingEvents::default());
    let service = AppointmentService::new(store.clone(), reference)
        .with_clock(Arc::new(FixedClock(today())))
        .with_events(events.clone());
    Harness {
        service,
        store,
        events,
        clinic,
    }
}

fn candidate(c: &Clinic, patient: Uuid, machine: Uuid, start: &str, end: &str) -> AppointmentCandidate {
    AppointmentCandidate {
        patient_id: Some(patient),
        machine_id: Some(machine),
        shift_id: Some(c.shift),
        appointment_date: Some(today()),
        start_time: Some(t(start)),
        end_time: Some(t(end)),
        notes: None,
    }
}

fn stored(c: &Clinic, patient: Uuid, machine: Uuid, status: AppointmentStatus) -> Appointment {
    Appointment {
        appointment_id: Uuid::new_v4(),
        clinic_id: c.id,
        patient_id: patient,
        machine_id: machine,
        shift_id: c.shift,
        appointment_date: today(),
        start_time: t("08:00"),
        end_time: t("12:00"),
        duration_minutes: 240,
        status,
        notes: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn book_conflict_cancel_rebook() {
    let h = harness();
    let c = &h.clinic;

    let first = h
        .service
        .create(c.id, &candidate(c, c.p1, c.m1, "08:00", "12:00"))
        .await
        .unwrap();
    assert_eq!(first.status, AppointmentStatus::Scheduled);
    assert_eq!(first.duration_minutes, 240);

    let second = candidate(c, c.p2, c.m1, "11:00", "15:00");
    match h.service.create(c.id, &second).await {
        Err(SchedulingError::Conflict(report)) => {
            assert!(report.machine_conflict);
            assert!(!report.patient_conflict);
            assert_eq!(report.conflicting_appointment_ids, vec![first.appointment_id]);
        }
        other => panic!("expected machine conflict, got {other:?}"),
    }

    let cancelled = h
        .service
        .cancel(c.id, first.appointment_id, "patient request")
        .await
        .unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.notes.as_deref(), Some("patient request"));

    let rebooked = h.service.create(c.id, &second).await.unwrap();
    assert_eq!(rebooked.status, AppointmentStatus::Scheduled);

    // cancellation keeps the row
    assert_eq!(h.store.snapshot().len(), 2);
    assert_eq!(h.events.seen.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn same_patient_on_another_machine_is_a_patient_conflict() {
    let h = harness();
    let c = &h.clinic;
    h.service
        .create(c.id, &candidate(c, c.p1, c.m1, "08:00", "12:00"))
        .await
        .unwrap();

    let err = h
        .service
        .create(c.id, &candidate(c, c.p1, c.m2, "10:00", "14:00"))
        .await
        .unwrap_err();
    match err {
        SchedulingError::Conflict(report) => {
            assert!(report.patient_conflict);
            assert!(!report.machine_conflict);
        }
        other => panic!("expected patient conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn rescheduling_does_not_conflict_with_itself() {
    let h = harness();
    let c = &h.clinic;
    let x = h
        .service
        .create(c.id, &candidate(c, c.p1, c.m1, "08:00", "12:00"))
        .await
        .unwrap();

    let moved = h
        .service
        .update(c.id, x.appointment_id, &candidate(c, c.p1, c.m1, "09:00", "13:00"))
        .await
        .unwrap();
    assert_eq!(moved.start_time, t("09:00"));
    assert_eq!(moved.duration_minutes, 240);

    let probe = ConflictProbe {
        patient_id: c.p1,
        machine_id: c.m1,
        window: TimeWindow::new(t("09:00"), t("13:00")).unwrap(),
        exclude_appointment_id: Some(x.appointment_id),
    };
    let report = h.service.detect_conflicts(c.id, today(), &probe).await.unwrap();
    assert!(!report.has_conflict());
}

#[tokio::test]
async fn update_into_another_booking_is_rejected() {
    let h = harness();
    let c = &h.clinic;
    h.service
        .create(c.id, &candidate(c, c.p1, c.m1, "08:00", "12:00"))
        .await
        .unwrap();
    let other = h
        .service
        .create(c.id, &candidate(c, c.p2, c.m2, "08:00", "12:00"))
        .await
        .unwrap();

    let err = h
        .service
        .update(c.id, other.appointment_id, &candidate(c, c.p2, c.m1, "10:00", "14:00"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::Conflict(ref r) if r.machine_conflict));
}

#[tokio::test]
async fn cancelled_and_completed_sessions_do_not_block() {
    let h = harness();
    let c = &h.clinic;
    h.store.seed(stored(c, c.p1, c.m1, AppointmentStatus::Cancelled)).unwrap();
    h.store.seed(stored(c, c.p2, c.m1, AppointmentStatus::Completed)).unwrap();

    let booked = h
        .service
        .create(c.id, &candidate(c, c.p1, c.m1, "08:00", "12:00"))
        .await
        .unwrap();
    assert_eq!(booked.status, AppointmentStatus::Scheduled);
}

#[tokio::test]
async fn invalid_input_is_rejected_before_any_write() {
    let h = harness();
    let c = &h.clinic;

    let mut bad = candidate(c, c.p1, c.m1, "08:00", "08:59");
    bad.appointment_date = Some(today().pred_opt().unwrap());
    match h.service.create(c.id, &bad).await {
        Err(SchedulingError::Validation(report)) => {
            assert!(report.has_field("duration"));
            assert!(report.has_field("appointment_date"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(h.store.snapshot().is_empty());
    assert!(h.events.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn retired_machine_and_off_day_shift_are_rejected() {
    let h = harness();
    let c = &h.clinic;

    let err = h
        .service
        .create(c.id, &candidate(c, c.p1, c.retired_machine, "08:00", "12:00"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::Validation(ref r) if r.has_field("machine_id")));

    let mut off_day = candidate(c, c.p1, c.m1, "08:00", "12:00");
    off_day.shift_id = Some(c.sunday_shift);
    let err = h.service.create(c.id, &off_day).await.unwrap_err();
    assert!(matches!(err, SchedulingError::Validation(ref r) if r.has_field("shift_id")));

    let unknown_patient = candidate(c, Uuid::new_v4(), c.m1, "08:00", "12:00");
    let err = h.service.create(c.id, &unknown_patient).await.unwrap_err();
    assert!(matches!(err, SchedulingError::Validation(ref r) if r.has_field("patient_id")));
}

#[tokio::test]
async fn lifecycle_transitions() {
    let h = harness();
    let c = &h.clinic;
    let a = h
        .service
        .create(c.id, &candidate(c, c.p1, c.m1, "08:00", "12:00"))
        .await
        .unwrap();
    let id = a.appointment_id;

    let err = h.service.cancel(c.id, id, "   ").await.unwrap_err();
    assert!(matches!(err, SchedulingError::Validation(ref r) if r.has_field("reason")));

    assert_eq!(
        h.service.confirm(c.id, id).await.unwrap().status,
        AppointmentStatus::Confirmed
    );
    assert_eq!(
        h.service.start(c.id, id).await.unwrap().status,
        AppointmentStatus::InProgress
    );

    // live sessions cannot be confirmed, edited or cancelled
    assert!(matches!(
        h.service.confirm(c.id, id).await,
        Err(SchedulingError::Validation(_))
    ));
    assert!(matches!(
        h.service
            .update(c.id, id, &candidate(c, c.p1, c.m1, "09:00", "13:00"))
            .await,
        Err(SchedulingError::Validation(ref r)) if r.has_field("status")
    ));
    assert!(matches!(
        h.service.cancel(c.id, id, "late").await,
        Err(SchedulingError::Validation(_))
    ));

    assert_eq!(
        h.service.complete(c.id, id).await.unwrap().status,
        AppointmentStatus::Completed
    );
    let err = h.service.cancel(c.id, id, "too late").await.unwrap_err();
    assert!(matches!(err, SchedulingError::Validation(ref r) if r.has_field("status")));
}

#[tokio::test]
async fn no_show_frees_the_slot() {
    let h = harness();
    let c = &h.clinic;
    let a = h
        .service
        .create(c.id, &candidate(c, c.p1, c.m1, "08:00", "12:00"))
        .await
        .unwrap();
    h.service.mark_no_show(c.id, a.appointment_id).await.unwrap();
    assert!(matches!(
        h.service.cancel(c.id, a.appointment_id, "x").await,
        Err(SchedulingError::Validation(_))
    ));

    h.service
        .create(c.id, &candidate(c, c.p2, c.m1, "08:00", "12:00"))
        .await
        .unwrap();
}

#[tokio::test]
async fn missing_appointment_is_not_found() {
    let h = harness();
    let err = h
        .service
        .confirm(h.clinic.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::NotFound("appointment")));
}

#[tokio::test]
async fn other_clinics_are_invisible() {
    let h = harness();
    let c = &h.clinic;
    let mut foreign = stored(c, c.p1, c.m1, AppointmentStatus::Scheduled);
    foreign.clinic_id = Uuid::new_v4();
    h.store.seed(foreign.clone()).unwrap();

    assert!(matches!(
        h.service.get(c.id, foreign.appointment_id).await,
        Err(SchedulingError::NotFound(_))
    ));
    let listed = h
        .service
        .list(c.id, &AppointmentFilter::on_date(today()))
        .await
        .unwrap();
    assert!(listed.is_empty());
    h.service
        .create(c.id, &candidate(c, c.p1, c.m1, "08:00", "12:00"))
        .await
        .unwrap();
}

#[tokio::test]
async fn slots_reflect_bookings_and_are_stable() {
    let h = harness();
    let c = &h.clinic;

    let before = h
        .service
        .available_slots(c.id, today(), c.shift, &[c.m1])
        .await
        .unwrap();
    let again = h
        .service
        .available_slots(c.id, today(), c.shift, &[c.m1])
        .await
        .unwrap();
    assert_eq!(before, again);
    // 06:00..17:30 every 30 minutes
    assert_eq!(before.len(), 24);
    assert!(before.iter().all(|s| s.machine_id == c.m1));

    h.service
        .create(c.id, &candidate(c, c.p1, c.m1, "10:00", "14:00"))
        .await
        .unwrap();
    let after = h
        .service
        .available_slots(c.id, today(), c.shift, &[c.m1])
        .await
        .unwrap();
    assert!(after.len() < before.len());
    assert!(after.iter().all(|s| s.end_time <= t("10:00") || s.start_time >= t("14:00")));

    // default: every active machine, retired one excluded
    let all = h
        .service
        .available_slots(c.id, today(), c.shift, &[])
        .await
        .unwrap();
    assert!(all.iter().any(|s| s.machine_id == c.m2));
    assert!(all.iter().all(|s| s.machine_id != c.retired_machine));

    let sunday_on_monday = h
        .service
        .available_slots(c.id, today(), c.sunday_shift, &[])
        .await
        .unwrap();
    assert!(sunday_on_monday.is_empty());

    assert!(matches!(
        h.service
            .available_slots(c.id, today(), Uuid::new_v4(), &[])
            .await,
        Err(SchedulingError::NotFound("shift"))
    ));
}

#[tokio::test]
async fn check_reports_without_writing() {
    let h = harness();
    let c = &h.clinic;
    h.service
        .create(c.id, &candidate(c, c.p1, c.m1, "08:00", "12:00"))
        .await
        .unwrap();

    let outcome = h
        .service
        .check(c.id, &candidate(c, c.p1, c.m1, "09:00", "13:00"), None)
        .await
        .unwrap();
    assert!(outcome.validation.valid);
    assert!(outcome.conflicts.patient_conflict && outcome.conflicts.machine_conflict);

    let outcome = h
        .service
        .check(c.id, &AppointmentCandidate::default(), None)
        .await
        .unwrap();
    assert!(!outcome.validation.valid);
    assert!(!outcome.conflicts.has_conflict());
    assert_eq!(h.store.snapshot().len(), 1);
}

/* ------------------------------------------------------------
   Storage-level guard
------------------------------------------------------------ */

/// Reads see an empty day, as a request that read before a competing write would.
struct StaleReads {
    inner: MemoryAppointmentStore,
}

#[async_trait]
impl AppointmentStore for StaleReads {
    async fn list_appointments(
        &self,
        _clinic_id: Uuid,
        _filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, StoreError> {
        Ok(vec![])
    }

    async fn get_appointment(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, StoreError> {
        self.inner.get_appointment(clinic_id, appointment_id).await
    }

    async fn insert_appointment(
        &self,
        clinic_id: Uuid,
        booking: &Booking,
    ) -> Result<Appointment, StoreError> {
        self.inner.insert_appointment(clinic_id, booking).await
    }

    async fn update_appointment(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        patch: &AppointmentPatch,
    ) -> Result<Option<Appointment>, StoreError> {
        self.inner
            .update_appointment(clinic_id, appointment_id, patch)
            .await
    }
}

#[tokio::test]
async fn write_time_overlap_becomes_a_conflict() {
    let reference = Arc::new(MemoryReferenceData::new());
    let c = seed_clinic(&reference);
    let store = Arc::new(StaleReads {
        inner: MemoryAppointmentStore::new(),
    });
    store.inner.seed(stored(&c, c.p1, c.m1, AppointmentStatus::Scheduled)).unwrap();

    let service = AppointmentService::new(store.clone(), reference)
        .with_clock(Arc::new(FixedClock(today())));
    let err = service
        .create(c.id, &candidate(&c, c.p2, c.m1, "11:00", "15:00"))
        .await
        .unwrap_err();
    match err {
        SchedulingError::Conflict(report) => {
            assert!(report.machine_conflict);
            assert!(!report.patient_conflict);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(store.inner.snapshot().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_for_one_slot_admit_exactly_one() {
    let h = Arc::new(harness());
    let mut tasks = Vec::new();
    for patient in [h.clinic.p1, h.clinic.p2] {
        for _ in 0..4 {
            let h = h.clone();
            tasks.push(tokio::spawn(async move {
                let c = &h.clinic;
                h.service
                    .create(c.id, &candidate(c, patient, c.m1, "08:00", "12:00"))
                    .await
            }));
        }
    }

    let mut booked = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => booked += 1,
            Err(SchedulingError::Conflict(_)) => {}
            Err(other) => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(booked, 1);
}

/* ------------------------------------------------------------
   Infrastructure faults
------------------------------------------------------------ */

struct BrokenWrites {
    inner: MemoryAppointmentStore,
}

#[async_trait]
impl AppointmentStore for BrokenWrites {
    async fn list_appointments(
        &self,
        clinic_id: Uuid,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, StoreError> {
        self.inner.list_appointments(clinic_id, filter).await
    }

    async fn get_appointment(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, StoreError> {
        self.inner.get_appointment(clinic_id, appointment_id).await
    }

    async fn insert_appointment(
        &self,
        _clinic_id: Uuid,
        _booking: &Booking,
    ) -> Result<Appointment, StoreError> {
        Err(StoreError::Database("connection reset by peer".into()))
    }

    async fn update_appointment(
        &self,
        _clinic_id: Uuid,
        _appointment_id: Uuid,
        _patch: &AppointmentPatch,
    ) -> Result<Option<Appointment>, StoreError> {
        Err(StoreError::Database("connection reset by peer".into()))
    }
}

#[tokio::test]
async fn storage_faults_surface_as_persistence_errors() {
    let reference = Arc::new(MemoryReferenceData::new());
    let c = seed_clinic(&reference);
    let service = AppointmentService::new(
        Arc::new(BrokenWrites {
            inner: MemoryAppointmentStore::new(),
        }),
        reference,
    )
    .with_clock(Arc::new(FixedClock(today())));

    let err = service
        .create(c.id, &candidate(&c, c.p1, c.m1, "08:00", "12:00"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::Persistence(StoreError::Database(_))));
    assert_eq!(err.to_string(), "could not save, try again");
}

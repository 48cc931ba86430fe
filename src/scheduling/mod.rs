//! Dialysis session scheduling: validation, double-booking detection, slot
//! generation and the orchestrating service.

pub mod conflict;
pub mod error;
pub mod service;
pub mod slots;
pub mod time_window;
pub mod validation;

pub use conflict::{ConflictProbe, ConflictReport, detect_conflicts, find_conflicts};
pub use error::SchedulingError;
pub use service::{AppointmentService, CheckOutcome, Clock, FixedClock, ScheduleEvents, SystemClock};
pub use slots::{Slot, available_slots, open_slots};
pub use time_window::{TimeOfDay, TimeWindow, generate_slots, overlaps};
pub use validation::{
    FieldError, SchedulingRules, ValidationReport, validate, validate_cancellation,
    validate_confirmation, validate_edit,
};

use crate::scheduling::conflict::ConflictReport;
use crate::scheduling::validation::ValidationReport;
use crate::store::StoreError;

/// Outcome of a rejected scheduling operation.
///
/// `Validation` and `Conflict` are expected, user-correctable results.
/// `Persistence` is an infrastructure fault; its cause is logged, not shown.
#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("validation failed")]
    Validation(ValidationReport),

    #[error("schedule conflict")]
    Conflict(ConflictReport),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("could not save, try again")]
    Persistence(#[source] StoreError),
}

impl From<ValidationReport> for SchedulingError {
    fn from(report: ValidationReport) -> Self {
        SchedulingError::Validation(report)
    }
}

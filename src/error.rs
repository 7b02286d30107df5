use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invalid date range: {0}")]
    InvalidRange(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("overlaps an active {kind} from {start_date} to {end_date}")]
    Overlap {
        kind: String,
        start_date: chrono::NaiveDate,
        end_date: chrono::NaiveDate,
    },

    #[error("slot conflict: {0}")]
    SlotConflict(String),

    #[error("barber unavailable: {0}")]
    BarberUnavailable(String),

    #[error("data access error: {0}")]
    DataAccess(#[from] sqlx::Error),
}

impl ScheduleError {
    /// Lost races surface as `SlotConflict` so callers can rebuild the grid
    /// and retry; everything else is terminal for the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScheduleError::SlotConflict(_))
    }
}

/// Maps the two SQLite shapes a lost booking race takes, a busy writer
/// (lock upgrade denied) or a unique index violation on the slot/position,
/// onto `SlotConflict`. Anything else stays a `DataAccess` failure.
pub fn conflict_or_data(err: sqlx::Error, what: &str) -> ScheduleError {
    if let sqlx::Error::Database(db) = &err {
        let code = db.code().unwrap_or_default();
        if db.is_unique_violation() || code == "5" || code == "261" || code == "517" {
            return ScheduleError::SlotConflict(what.to_string());
        }
    }
    ScheduleError::DataAccess(err)
}

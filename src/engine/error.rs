use std::fmt;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::BookingStatus;

/// An id that did not resolve to a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    Suite(Ulid),
    Pet(Ulid),
    Booking(Ulid),
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Suite(id) => write!(f, "suite {id}"),
            Reference::Pet(id) => write!(f, "pet {id}"),
            Reference::Booking(id) => write!(f, "booking {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    InvalidDateRange {
        start: NaiveDate,
        end: NaiveDate,
    },
    UnknownReference(Reference),
    SuiteConflict {
        suite_id: Ulid,
        conflicting: Vec<Ulid>,
    },
    /// The suite's booking set could not be locked in time, or the booking
    /// moved underneath the request. Retry the whole proposal.
    Busy {
        suite_id: Ulid,
    },
    StoreFailure(String),
    DuplicateLabel(String),
    SuiteInUse(Ulid),
    StatusChangeRejected {
        from: BookingStatus,
        to: BookingStatus,
    },
    LimitExceeded(&'static str),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Busy { .. })
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidDateRange { .. } => "invalid_date_range",
            EngineError::UnknownReference(_) => "unknown_reference",
            EngineError::SuiteConflict { .. } => "suite_conflict",
            EngineError::Busy { .. } => "busy",
            EngineError::StoreFailure(_) => "store_failure",
            EngineError::DuplicateLabel(_) => "duplicate_label",
            EngineError::SuiteInUse(_) => "suite_in_use",
            EngineError::StatusChangeRejected { .. } => "status_change_rejected",
            EngineError::LimitExceeded(_) => "limit_exceeded",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidDateRange { start, end } => {
                write!(f, "end date {end} is before start date {start}")
            }
            EngineError::UnknownReference(r) => write!(f, "unknown {r}"),
            EngineError::SuiteConflict {
                suite_id,
                conflicting,
            } => {
                write!(f, "suite {suite_id} already booked by: ")?;
                for (i, id) in conflicting.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{id}")?;
                }
                Ok(())
            }
            EngineError::Busy { suite_id } => {
                write!(f, "suite {suite_id} is busy, retry later")
            }
            EngineError::StoreFailure(e) => write!(f, "store failure: {e}"),
            EngineError::DuplicateLabel(label) => {
                write!(f, "suite label already in use: {label}")
            }
            EngineError::SuiteInUse(id) => {
                write!(f, "cannot delete suite {id}: bookings reference it")
            }
            EngineError::StatusChangeRejected { from, to } => {
                write!(f, "status change {from} -> {to} not allowed")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

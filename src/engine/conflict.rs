use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Server-side timestamp source. Never hands out a value earlier than one it
/// already returned, even if the wall clock steps backwards. Microsecond precision.
pub(crate) struct Clock {
    last_micros: AtomicI64,
}

impl Clock {
    pub(crate) fn new() -> Self {
        Self {
            last_micros: AtomicI64::new(i64::MIN),
        }
    }

    /// Never go below a timestamp recovered from the log.
    pub(crate) fn observe(&self, at: DateTime<Utc>) {
        self.last_micros.fetch_max(at.timestamp_micros(), Ordering::SeqCst);
    }

    pub(crate) fn stamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let micros = now.timestamp_micros();
        let prev = self.last_micros.fetch_max(micros, Ordering::SeqCst);
        DateTime::from_timestamp_micros(prev.max(micros)).unwrap_or(now)
    }
}

/// Field-level checks, no store access.
pub(crate) fn validate_input(input: &BookingInput) -> Result<Stay, EngineError> {
    use crate::limits::*;
    let stay = Stay::new(input.start_date, input.end_date)?;
    if stay.days() > MAX_STAY_DAYS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    if input.notes.len() > MAX_NOTES_LEN {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(stay)
}

pub(crate) fn validate_window(window: &Stay) -> Result<(), EngineError> {
    if window.days() > crate::limits::MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

/// Active bookings on this suite that overlap `candidate`, minus `exclude`.
pub fn find_conflicts<'a>(
    ss: &'a SuiteState,
    candidate: &Stay,
    exclude: Option<Ulid>,
) -> impl Iterator<Item = &'a Booking> + use<'a> {
    ss.overlapping(candidate)
        .filter(move |b| b.is_active() && Some(b.id) != exclude)
}

pub fn has_conflict(ss: &SuiteState, candidate: &Stay, exclude: Option<Ulid>) -> bool {
    find_conflicts(ss, candidate, exclude).next().is_some()
}

pub(crate) fn check_no_conflict(
    ss: &SuiteState,
    candidate: &Stay,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let conflicting: Vec<Ulid> = find_conflicts(ss, candidate, exclude).map(|b| b.id).collect();
    if conflicting.is_empty() {
        return Ok(());
    }
    Err(EngineError::SuiteConflict {
        suite_id: ss.id(),
        conflicting,
    })
}

use std::fmt;
use std::str::FromStr;

use crate::model::BookingStatus;

/// Which status changes an update may make.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusPolicy {
    /// Any status may follow any other, so staff can revert an accidental check-in.
    #[default]
    Permissive,
    /// Booked → CheckedIn → CheckedOut only; skipping ahead is allowed, going back is not.
    Forward,
}

impl FromStr for StatusPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "permissive" => Ok(StatusPolicy::Permissive),
            "forward" => Ok(StatusPolicy::Forward),
            other => Err(format!("unknown status policy: {other}")),
        }
    }
}

impl fmt::Display for StatusPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusPolicy::Permissive => f.write_str("permissive"),
            StatusPolicy::Forward => f.write_str("forward"),
        }
    }
}

fn rank(status: BookingStatus) -> u8 {
    match status {
        BookingStatus::Booked => 0,
        BookingStatus::CheckedIn => 1,
        BookingStatus::CheckedOut => 2,
    }
}

pub fn is_status_change_allowed(policy: StatusPolicy, from: BookingStatus, to: BookingStatus) -> bool {
    match policy {
        StatusPolicy::Permissive => true,
        StatusPolicy::Forward => rank(to) >= rank(from),
    }
}

/// How a status change moves a booking relative to the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEffect {
    /// Checked-out booking reopened: it starts holding the suite again.
    Joins,
    /// Checked out: the suite is released regardless of remaining dates.
    Leaves,
    StaysActive,
    StaysInactive,
}

impl TransitionEffect {
    /// Whether the booking holds the suite once the change commits,
    /// which is when the conflict query has to run.
    pub fn needs_conflict_check(self) -> bool {
        matches!(self, TransitionEffect::Joins | TransitionEffect::StaysActive)
    }
}

pub fn transition_effect(from: BookingStatus, to: BookingStatus) -> TransitionEffect {
    match (from.is_active(), to.is_active()) {
        (false, true) => TransitionEffect::Joins,
        (true, false) => TransitionEffect::Leaves,
        (true, true) => TransitionEffect::StaysActive,
        (false, false) => TransitionEffect::StaysInactive,
    }
}

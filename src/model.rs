use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

/// Closed calendar-date range `[start, end]`. Both bounds are nights in the suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Stay {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, EngineError> {
        if start > end {
            return Err(EngineError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Single-day stay.
    pub fn day(date: NaiveDate) -> Self {
        Self { start: date, end: date }
    }

    /// Inclusive day count; a single-day stay is 1.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Touching endpoints overlap: a checkout and a check-in on the same date collide.
    pub fn overlaps(&self, other: &Stay) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for Stay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    #[default]
    Booked,
    CheckedIn,
    CheckedOut,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 3] = [
        BookingStatus::Booked,
        BookingStatus::CheckedIn,
        BookingStatus::CheckedOut,
    ];

    /// Active bookings hold the suite; checked-out stays are history.
    pub fn is_active(self) -> bool {
        !matches!(self, BookingStatus::CheckedOut)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Booked => "booked",
            BookingStatus::CheckedIn => "checked-in",
            BookingStatus::CheckedOut => "checked-out",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booked" => Ok(BookingStatus::Booked),
            "checked-in" => Ok(BookingStatus::CheckedIn),
            "checked-out" => Ok(BookingStatus::CheckedOut),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suite {
    pub id: Ulid,
    pub label: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pet {
    pub id: Ulid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub suite_id: Ulid,
    pub pet_id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: BookingStatus,
    pub bathed: bool,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn stay(&self) -> Stay {
        Stay {
            start: self.start_date,
            end: self.end_date,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Everything a caller supplies when creating or replacing a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingInput {
    pub suite_id: Ulid,
    pub pet_id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub status: BookingStatus,
    #[serde(default)]
    pub bathed: bool,
    #[serde(default)]
    pub notes: String,
}

impl BookingInput {
    pub fn new(suite_id: Ulid, pet_id: Ulid, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            suite_id,
            pet_id,
            start_date,
            end_date,
            status: BookingStatus::Booked,
            bathed: false,
            notes: String::new(),
        }
    }

    pub fn with_status(mut self, status: BookingStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_bathed(mut self, bathed: bool) -> Self {
        self.bathed = bathed;
        self
    }
}

impl From<&Booking> for BookingInput {
    fn from(b: &Booking) -> Self {
        Self {
            suite_id: b.suite_id,
            pet_id: b.pet_id,
            start_date: b.start_date,
            end_date: b.end_date,
            status: b.status,
            bathed: b.bathed,
            notes: b.notes.clone(),
        }
    }
}

/// Partial update: unset fields keep the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingPatch {
    pub suite_id: Option<Ulid>,
    pub pet_id: Option<Ulid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub status: Option<BookingStatus>,
    pub bathed: Option<bool>,
    pub notes: Option<String>,
}

impl BookingPatch {
    pub fn apply_to(self, current: &Booking) -> BookingInput {
        BookingInput {
            suite_id: self.suite_id.unwrap_or(current.suite_id),
            pet_id: self.pet_id.unwrap_or(current.pet_id),
            start_date: self.start_date.unwrap_or(current.start_date),
            end_date: self.end_date.unwrap_or(current.end_date),
            status: self.status.unwrap_or(current.status),
            bathed: self.bathed.unwrap_or(current.bathed),
            notes: self.notes.unwrap_or_else(|| current.notes.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SuiteState {
    pub suite: Suite,
    /// Set under the write lock when the suite is removed, so a proposal that
    /// resolved the suite before deletion cannot commit into it.
    pub deleted: bool,
    /// All bookings for this suite, checked-out ones included, sorted by `start_date`.
    pub bookings: Vec<Booking>,
}

impl SuiteState {
    pub fn new(suite: Suite) -> Self {
        Self {
            suite,
            deleted: false,
            bookings: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.suite.id
    }

    /// Insert booking maintaining sort order by start date.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.start_date, |b| b.start_date)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings of any status whose stay overlaps the query.
    /// Binary search skips everything starting after `query.end`.
    pub fn overlapping(&self, query: &Stay) -> impl Iterator<Item = &Booking> + use<'_> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.start_date <= query.end);
        let start = query.start;
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.end_date >= start)
    }
}

/// WAL record format. Booking events carry the full record so replay
/// reproduces timestamps exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SuiteCreated {
        suite: Suite,
    },
    SuiteNotesUpdated {
        id: Ulid,
        notes: String,
        at: DateTime<Utc>,
    },
    SuiteDeleted {
        id: Ulid,
    },
    PetRegistered {
        pet: Pet,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingUpdated {
        booking: Booking,
        previous_suite_id: Ulid,
    },
    BookingDeleted {
        id: Ulid,
        suite_id: Ulid,
    },
}

pub const MAX_SUITES: usize = 10_000;
pub const MAX_PETS: usize = 1_000_000;
pub const MAX_BOOKINGS_PER_SUITE: usize = 50_000;

pub const MAX_LABEL_LEN: usize = 32;
pub const MAX_PET_NAME_LEN: usize = 128;
pub const MAX_NOTES_LEN: usize = 4_096;

/// Longest single stay, inclusive day count.
pub const MAX_STAY_DAYS: i64 = 366;

/// Widest window accepted by calendar and free-date queries.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3 * 366;

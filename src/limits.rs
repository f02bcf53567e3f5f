//! Hard bounds on input sizes and per-property state.

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 64;

pub const MAX_USERS_PER_TENANT: usize = 1_000_000;
pub const MAX_ROOM_TYPES_PER_TENANT: usize = 1_000;
pub const MAX_ROOMS_PER_TENANT: usize = 10_000;
pub const MAX_BOOKINGS_PER_TENANT: usize = 5_000_000;
pub const MAX_IMAGES_PER_TENANT: usize = 100_000;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_ROOM_NUMBER_LEN: usize = 20;
pub const MAX_PHONE_LEN: usize = 20;
pub const MAX_PATH_LEN: usize = 1_024;
pub const MAX_COMMENT_LEN: usize = 4_000;

/// Per-field occupant bounds, independent of any room type's maxima.
pub const MIN_ADULTS: u32 = 1;
pub const MAX_ADULTS: u32 = 10;
pub const MAX_CHILDREN: u32 = 10;

/// Largest price or total accepted; every stored amount fits a signed 8-byte column.
pub const MAX_PRICE: u64 = i64::MAX as u64;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

pub const MAX_STAY_NIGHTS: i64 = 365;
/// Dates outside `[MIN_VALID_YEAR, MAX_VALID_YEAR]` are rejected as malformed.
pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2200;

/// Hours of notice required to cancel a confirmed booking.
pub const CANCELLATION_NOTICE_HOURS: i64 = 24;

use crate::model::{HOUR_MS, Ms};

pub const MAX_FACILITIES: usize = 1_000;
pub const MAX_BOOKINGS_PER_FACILITY: usize = 100_000;
pub const MAX_FEATURES: usize = 50;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PHONE_LEN: usize = 40;
pub const MAX_TEXT_LEN: usize = 4_000;
pub const MAX_SETTING_LEN: usize = 1_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single booking may not run longer than a week.
pub const MAX_SPAN_DURATION_MS: Ms = 7 * 24 * HOUR_MS;

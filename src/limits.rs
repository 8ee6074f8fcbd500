use crate::model::{Ms, HOUR_MS};

pub const MIN_RESERVATION_MINUTES: i64 = 30;
pub const MAX_RESERVATION_MINUTES: i64 = 24 * 60;

pub const MAX_PLATE_LEN: usize = 16;
pub const MAX_NOTES_LEN: usize = 1000;
pub const MAX_REASON_LEN: usize = 500;
pub const MAX_REQUESTER_ID_LEN: usize = 256;

/// Widest window accepted by availability queries (31 days).
pub const MAX_QUERY_WINDOW_MS: Ms = 31 * 24 * HOUR_MS;

/// Duration ladder for pricing options, in minutes.
pub const PRICING_LADDER_MINUTES: [i64; 5] = [60, 120, 240, 480, 1440];

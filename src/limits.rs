use crate::model::Ms;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_PHONE_LEN: usize = 64;
pub const MAX_CONTACT_LEN: usize = 512;
pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_SEARCH_TERM_LEN: usize = 256;

pub const MAX_CLIENTS_PER_TENANT: usize = 100_000;
pub const MAX_PHOTOGRAPHERS_PER_TENANT: usize = 10_000;
pub const MAX_STUDIOS_PER_TENANT: usize = 10_000;
pub const MAX_SESSIONS_PER_TENANT: usize = 1_000_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

pub const MAX_UPCOMING_HOURS: u32 = 24 * 366;
pub const MAX_PERIOD_DAYS: i64 = 366 * 10;

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 128;

// Hard limits. Everything user-controlled is bounded here.

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MIN_SUPPORTED_YEAR: i32 = 2000;
pub const MAX_SUPPORTED_YEAR: i32 = 2100;

/// Longest run accepted by `initialize_range` and calendar queries.
pub const MAX_RANGE_DAYS: usize = 366;

pub const MAX_PER_SLOT_LIMIT: u32 = 1000;
pub const MAX_TEXT_FIELD_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_PRICE: i64 = 100_000_000;

/// Booking records (all statuses) kept per (day, slot) ledger.
pub const MAX_BOOKINGS_PER_SLOT: usize = 10_000;

pub const DEFAULT_RECENT_LIMIT: usize = 50;
pub const MAX_RECENT_LIMIT: usize = 1000;

/// Attempts to find an unused booking number before giving up.
pub const MAX_NUMBER_ATTEMPTS: usize = 5;

/// WAL failures are retried this many times before surfacing.
pub const MAX_TRANSIENT_RETRIES: u32 = 3;
pub const RETRY_BASE_DELAY_MS: u64 = 25;

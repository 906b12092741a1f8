// Hard bounds on request sizes and per-tenant state.

pub const MAX_ID_LEN: usize = 128;
pub const MAX_USER_NAME_LEN: usize = 256;

/// Reservations stored under one (listing, date) ledger.
pub const MAX_RESERVATIONS_PER_DAY: usize = 10_000;
pub const MAX_LISTINGS_PER_TENANT: usize = 100_000;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;
pub const MY_BOOKINGS_LIMIT: usize = 25;

pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 128;

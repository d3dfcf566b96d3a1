//! Hard input limits. Anything beyond these is rejected with
//! `EngineError::LimitExceeded` before it reaches the WAL.

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_RESTAURANTS_PER_TENANT: usize = 256;
pub const MAX_TABLES_PER_RESTAURANT: usize = 512;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_SLUG_LEN: usize = 128;
pub const MAX_CUSTOMER_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 2048;

pub const MAX_PARTY_SIZE: u32 = 100;
pub const MAX_TABLE_CAPACITY: u32 = 100;

pub const MIN_SLOT_DURATION_MINUTES: u32 = 5;
pub const MAX_SLOT_DURATION_MINUTES: u32 = 240;

pub const MAX_WAITLIST_PER_BUCKET: usize = 1000;

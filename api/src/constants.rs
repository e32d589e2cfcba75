//! Library constants

/// Context key the request's transaction slot is bound under
pub const TRX_KEY: &str = "trx";

/// Lowest response status treated as a failed request (rolls back)
pub const ROLLBACK_STATUS_FLOOR: u16 = 400;

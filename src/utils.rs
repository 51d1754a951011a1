/// Utility functions for rounding, addressing and formatting
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// Round a value to the given number of decimal places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Derive a controller node address from a device serial number
///
/// Addresses are lowercase with `-` replaced by `_`, e.g.
/// `AR-00001234` -> `ar_00001234`.
pub fn serial_to_address(serial_number: &str) -> String {
    serial_number.replace('-', "_").to_lowercase()
}

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    dt.format(format_description!(
        "[day].[month].[year] - [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| dt.to_string())
}

/// Convert a packet epoch into a timestamp at the given offset
///
/// Out-of-range epochs fall back to the Unix epoch.
pub fn epoch_to_offset(epoch: i64, offset: UtcOffset) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(epoch)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        .to_offset(offset)
}

/// Local UTC offset of the host, UTC when it cannot be determined
pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

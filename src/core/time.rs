//! Event timestamps.
//!
//! Wall-clock timestamps are advisory metadata on events; append order is
//! the only ordering the core trusts.

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

/// ISO-8601 UTC with microsecond precision and a trailing `Z`,
/// e.g. `2026-08-02T09:15:42.123456Z`.
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z");

/// Render the current UTC instant in event-timestamp form.
pub fn timestamp_now() -> String {
    format_timestamp(OffsetDateTime::now_utc())
}

pub fn format_timestamp(at: OffsetDateTime) -> String {
    at.format(TIMESTAMP_FORMAT)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00.000000Z"))
}

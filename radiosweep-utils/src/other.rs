//! Module containing some utility functions that didn't fit anywhere else.

use time::{format_description, OffsetDateTime};

/// Produces a timestamp `String` of the current time in YYYY-MM-DD_HH-mm-SS format.
///
/// Falls back to UTC if the local offset cannot be determined (e.g., in multi-threaded
/// processes on some platforms).
pub fn get_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    format_description::parse("[year]-[month]-[day]_[hour]-[minute]-[second]")
        .ok()
        .and_then(|format| now.format(&format).ok())
        .unwrap_or_else(|| now.unix_timestamp().to_string())
}

/// Extract the trailing number of a name such as `node12`, `eventsql3.db` or `node4.pcap.gz`.
///
/// Everything from the first `.` onwards is ignored.
pub fn trailing_number(name: impl AsRef<str>) -> Option<u32> {
    let stem = name.as_ref().split('.').next().unwrap_or_default();
    let digits = stem.len() - stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    stem[stem.len() - digits..].parse().ok()
}

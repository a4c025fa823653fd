use time::OffsetDateTime;

/// Current wall-clock time in unix milliseconds, the unit used by runtime timestamps.
#[must_use]
pub fn now_millis() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}

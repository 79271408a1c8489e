use chrono::Utc;

/// Current wall-clock time as unix milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// ISO 8601 timestamp for HTTP responses and journal events.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Compact local-independent stamp used in archive filenames.
pub fn archive_stamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

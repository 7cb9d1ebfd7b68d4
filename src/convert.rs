use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// 100-nanosecond intervals between 0001-01-01 and the Unix epoch.
const TICKS_BETWEEN_0001_AND_EPOCH: i64 = 621_355_968_000_000_000;

pub(crate) fn time_to_string(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn millis_to_string(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(time) => time_to_string(time),
        None => String::new(),
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Expressed as the number of 100-nanosecond intervals elapsed since 12:00 midnight, January 1,
/// 0001, which is how the collector expects date properties.
pub(crate) fn time_to_ticks(time: DateTime<Utc>) -> i64 {
    let micros = time.timestamp_micros();
    TICKS_BETWEEN_0001_AND_EPOCH.saturating_add(micros.saturating_mul(10))
}

use chrono::{DateTime, Duration, Utc};

/// Interval between photos published by the server, in seconds
pub const BUCKET_SECONDS: i64 = 600;

/// Floor a timestamp to the server's 10-minute photo grid
pub fn round_time(time: DateTime<Utc>) -> DateTime<Utc> {
    round_time_to(time, BUCKET_SECONDS)
}

/// Floor a timestamp to an arbitrary bucket size in seconds,
/// zeroing sub-second precision
pub fn round_time_to(time: DateTime<Utc>, bucket_seconds: i64) -> DateTime<Utc> {
    let excess = time.timestamp().rem_euclid(bucket_seconds);
    let subsec = i64::from(time.timestamp_subsec_nanos());
    time - Duration::seconds(excess) - Duration::nanoseconds(subsec)
}

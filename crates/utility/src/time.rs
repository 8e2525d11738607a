use chrono::{Local, Timelike, Utc};

/// Current UTC time as epoch milliseconds.
pub fn epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Local hour of day (0..=23), used by the time-of-day traffic baselines.
pub fn local_hour() -> u32 {
    Local::now().hour()
}

/// 5-minute time bucket as a base-36 string. Stable within a bucket, so two
/// requests landing in the same window share cache keys.
pub fn time_bucket_base36(now_ms: i64, bucket_ms: i64) -> String {
    let mut n = (now_ms / bucket_ms).max(0) as u64;
    if n == 0 {
        return "0".to_owned();
    }
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

//! Julian-day / ISO-8601 conversion for D and E cards. Timestamps are
//! carried as julian-day doubles, the same representation the database
//! uses for `event.mtime`.

use super::{Error, Result};

/// Seconds per day, as f64.
const SECS_PER_DAY: f64 = 86400.0;

/// Julian day number of the proleptic-Gregorian civil date, at noon UTC.
fn jdn(year: i64, month: i64, day: i64) -> i64 {
    let a = (14 - month) / 12;
    let y = year + 4800 - a;
    let m = month + 12 * a - 3;
    day + (153 * m + 2) / 5 + 365 * y + y / 4 - y / 100 + y / 400 - 32045
}

/// Parse `YYYY-MM-DDTHH:MM:SS[.SSS]` (a space also accepted as the date /
/// time separator) into a julian-day double.
pub fn iso8601_to_julian(s: &str) -> Result<f64> {
    let bad = || Error::Malformed(format!("malformed timestamp: {s:?}"));
    let bytes = s.as_bytes();
    if bytes.len() < 19 || (bytes[10] != b'T' && bytes[10] != b' ') {
        return Err(bad());
    }
    let digits = |range: std::ops::Range<usize>| -> Result<i64> {
        let part = s.get(range).ok_or_else(bad)?;
        part.parse::<i64>().map_err(|_| bad())
    };
    if bytes[4] != b'-' || bytes[7] != b'-' || bytes[13] != b':' || bytes[16] != b':' {
        return Err(bad());
    }
    let year = digits(0..4)?;
    let month = digits(5..7)?;
    let day = digits(8..10)?;
    let hour = digits(11..13)?;
    let minute = digits(14..16)?;
    let sec: f64 = s
        .get(17..)
        .and_then(|v| v.parse::<f64>().ok())
        .ok_or_else(bad)?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) || hour > 23 || minute > 59 || sec >= 61.0 {
        return Err(bad());
    }
    let days = jdn(year, month, day) as f64;
    let frac = (hour as f64 * 3600.0 + minute as f64 * 60.0 + sec) / SECS_PER_DAY;
    Ok(days - 0.5 + frac)
}

/// Render a julian-day double as `YYYY-MM-DDTHH:MM:SS.SSS` (millisecond
/// precision, the canonical card form).
pub fn julian_to_iso8601(julian: f64) -> String {
    // Shift to the civil day boundary and split off the time-of-day.
    let mut z = (julian + 0.5).floor() as i64;
    let frac = julian + 0.5 - z as f64;
    // Round to milliseconds first so 23:59:59.9999 does not render as a
    // 24th hour.
    let mut ms = (frac * SECS_PER_DAY * 1000.0).round() as i64;
    if ms >= 86_400_000 {
        ms -= 86_400_000;
        z += 1;
    }

    // Richards' algorithm for Gregorian civil date from JDN.
    let a = z + 32044;
    let b = (4 * a + 3) / 146097;
    let c = a - 146097 * b / 4;
    let d = (4 * c + 3) / 1461;
    let e = c - 1461 * d / 4;
    let m = (5 * e + 2) / 153;
    let day = e - (153 * m + 2) / 5 + 1;
    let month = m + 3 - 12 * (m / 10);
    let year = 100 * b + d - 4800 + m / 10;

    let millis = ms % 1000;
    let secs = (ms / 1000) % 60;
    let mins = (ms / 60_000) % 60;
    let hours = ms / 3_600_000;
    format!("{year:04}-{month:02}-{day:02}T{hours:02}:{mins:02}:{secs:02}.{millis:03}")
}

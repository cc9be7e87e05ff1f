//! ISO-8601 text for Date values
//!
//! Years 0000 through 9999 use the plain RFC 3339 form. Every other year in
//! the Date range uses the expanded `±YYYYYY` form, so any integral time value
//! up to ±8.64e15 ms survives the trip.

use chrono::{DateTime, Datelike, SecondsFormat, Utc};

/// Largest time value a Date can hold, in milliseconds from the epoch
pub const MAX_TIME_MS: f64 = 8.64e15;

const MS_PER_DAY: i64 = 86_400_000;

/// Text for a time value; invalid dates become the empty string
pub fn to_iso(ms: f64) -> String {
    if !ms.is_finite() || ms.abs() > MAX_TIME_MS {
        return String::new();
    }
    let ms = ms.trunc() as i64;
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) if (0..=9999).contains(&dt.year()) => {
            dt.to_rfc3339_opts(SecondsFormat::Millis, true)
        }
        _ => expanded_iso(ms),
    }
}

/// Time value for text written by [`to_iso`] or any RFC 3339 timestamp
pub fn parse_iso(text: &str) -> Option<f64> {
    if text.starts_with(['+', '-']) {
        return parse_expanded(text);
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.timestamp_millis() as f64)
}

fn expanded_iso(ms: i64) -> String {
    let (year, month, day) = civil_from_days(ms.div_euclid(MS_PER_DAY));
    let time = ms.rem_euclid(MS_PER_DAY);
    let sign = if year < 0 { '-' } else { '+' };
    format!(
        "{sign}{:06}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
        year.unsigned_abs(),
        time / 3_600_000,
        time / 60_000 % 60,
        time / 1000 % 60,
        time % 1000
    )
}

/// `±YYYYYY-MM-DDTHH:MM:SS.sssZ`
fn parse_expanded(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    if bytes.len() != 27 || !text.is_ascii() {
        return None;
    }
    let separators = [(7, b'-'), (10, b'-'), (13, b'T'), (16, b':'), (19, b':'), (22, b'.'), (26, b'Z')];
    if separators.iter().any(|&(at, byte)| bytes[at] != byte) {
        return None;
    }
    let field = |range: std::ops::Range<usize>| -> Option<i64> {
        let digits = &text[range];
        digits
            .bytes()
            .all(|b| b.is_ascii_digit())
            .then(|| digits.parse().ok())
            .flatten()
    };

    let magnitude = field(1..7)?;
    let year = if bytes[0] == b'-' { -magnitude } else { magnitude };
    let (month, day) = (field(8..10)?, field(11..13)?);
    let (hour, minute, second, milli) = (field(14..16)?, field(17..19)?, field(20..22)?, field(23..26)?);
    if hour > 23 || minute > 59 || second > 59 || !(1..=12).contains(&month) {
        return None;
    }
    let days = days_from_civil(year, month, day);
    if civil_from_days(days) != (year, month as u32, day as u32) {
        return None;
    }

    let ms = days * MS_PER_DAY + ((hour * 60 + minute) * 60 + second) * 1000 + milli;
    Some(ms as f64)
}

/// Days since 1970-01-01 in the proleptic Gregorian calendar
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = year.div_euclid(400);
    let year_of_era = year - era * 400;
    let shifted_month = (month + 9) % 12;
    let day_of_year = (153 * shifted_month + 2) / 5 + day - 1;
    let day_of_era = year_of_era * 365 + year_of_era / 4 - year_of_era / 100 + day_of_year;
    era * 146_097 + day_of_era - 719_468
}

fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let days = days + 719_468;
    let era = days.div_euclid(146_097);
    let day_of_era = days - era * 146_097;
    let year_of_era =
        (day_of_era - day_of_era / 1460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    let shifted_month = (5 * day_of_year + 2) / 153;
    let day = day_of_year - (153 * shifted_month + 2) / 5 + 1;
    let month = if shifted_month < 10 {
        shifted_month + 3
    } else {
        shifted_month - 9
    };
    let year = year_of_era + era * 400 + i64::from(month <= 2);
    (year, month as u32, day as u32)
}

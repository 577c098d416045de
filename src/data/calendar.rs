//! Trading-calendar helpers.
//!
//! Sessions are approximated as NYSE weekdays; exchange holidays surface
//! as (tolerated) cache gaps rather than being enumerated here. The
//! execution window and close deadline are computed in US Eastern time
//! expressed as a fixed offset supplied by config.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};

/// Regular session close, 16:00 Eastern.
const CLOSE_HOUR_ET: u32 = 16;

pub fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Next weekday strictly after `date`.
pub fn next_session(date: NaiveDate) -> NaiveDate {
    let mut d = date + Duration::days(1);
    while !is_weekday(d) {
        d += Duration::days(1);
    }
    d
}

/// Most recent weekday strictly before `date`.
pub fn previous_session(date: NaiveDate) -> NaiveDate {
    let mut d = date - Duration::days(1);
    while !is_weekday(d) {
        d -= Duration::days(1);
    }
    d
}

/// The 16:00 ET close of the session on `date`, as a UTC instant.
/// `utc_offset_hours` is the ET-to-UTC offset (5 in winter, 4 in DST).
pub fn session_close_utc(date: NaiveDate, utc_offset_hours: i64) -> DateTime<Utc> {
    let close_local = date.and_time(NaiveTime::from_hms_opt(CLOSE_HOUR_ET, 0, 0).unwrap());
    Utc.from_utc_datetime(&(close_local + Duration::hours(utc_offset_hours)))
}

/// Order deadline: session close minus the safety buffer.
pub fn order_deadline(
    date: NaiveDate,
    utc_offset_hours: i64,
    buffer_seconds: i64,
) -> DateTime<Utc> {
    session_close_utc(date, utc_offset_hours) - Duration::seconds(buffer_seconds)
}

/// True when `now` falls inside the pre-close execution window
/// `[close - start_minutes, close - end_minutes]`.
pub fn within_execution_window(
    now: DateTime<Utc>,
    date: NaiveDate,
    utc_offset_hours: i64,
    start_minutes_before_close: i64,
    end_minutes_before_close: i64,
) -> bool {
    if !is_weekday(date) {
        return false;
    }
    let close = session_close_utc(date, utc_offset_hours);
    let start = close - Duration::minutes(start_minutes_before_close);
    let end = close - Duration::minutes(end_minutes_before_close);
    now >= start && now <= end
}

/// Intersection of session dates across histories, sorted ascending.
pub fn common_sessions(date_sets: &[Vec<NaiveDate>]) -> Vec<NaiveDate> {
    let Some((first, rest)) = date_sets.split_first() else {
        return Vec::new();
    };
    let mut common: Vec<NaiveDate> = first.clone();
    for dates in rest {
        let set: std::collections::BTreeSet<NaiveDate> = dates.iter().copied().collect();
        common.retain(|d| set.contains(d));
    }
    common.sort_unstable();
    common
}

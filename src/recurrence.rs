use chrono::{DateTime, Datelike, Duration, Local, LocalResult, NaiveDateTime, NaiveTime, TimeZone};

use crate::models::WeekdaySet;

// Safety bound on the day-by-day walk: a weekly alarm is at most 7 days out.
const MAX_DAY_STEPS: u32 = 8;

/// Weekday index of a wall-clock datetime, 0 = Sunday through 6 = Saturday.
pub fn weekday_index(wall: NaiveDateTime) -> u8 {
    wall.weekday().num_days_from_sunday() as u8
}

/// Next wall-clock instant for a time-of-day and weekday set, strictly after
/// `now`.
///
/// The candidate starts at today's date at `at`. With an empty set the alarm
/// is a one-off: today if still ahead, otherwise tomorrow. With a non-empty
/// set the candidate walks forward one day at a time until it lands on a
/// selected weekday in the future, bounded at eight steps.
pub fn next_occurrence(at: NaiveTime, days: &WeekdaySet, now: NaiveDateTime) -> NaiveDateTime {
    let mut candidate = now.date().and_time(at);

    if days.is_empty() {
        if candidate <= now {
            candidate += Duration::days(1);
        }
        return candidate;
    }

    let mut steps = 0;
    while steps < MAX_DAY_STEPS {
        if candidate > now && days.contains(weekday_index(candidate)) {
            break;
        }
        candidate += Duration::days(1);
        steps += 1;
    }
    candidate
}

/// Maps a wall-clock datetime onto the local timeline.
///
/// An ambiguous wall time (clocks rolled back) takes the earlier mapping; a
/// nonexistent one (clocks sprang forward) slides ahead until it exists.
pub fn local_instant(wall: NaiveDateTime) -> DateTime<Local> {
    let mut wall = wall;
    for _ in 0..MAX_DAY_STEPS {
        match Local.from_local_datetime(&wall) {
            LocalResult::Single(instant) => return instant,
            LocalResult::Ambiguous(earliest, _) => return earliest,
            LocalResult::None => wall += Duration::minutes(30),
        }
    }
    // No real zone has a gap this wide; fall back to reading the wall time
    // as UTC rather than failing the arm.
    DateTime::from_naive_utc_and_offset(wall, chrono::Utc).with_timezone(&Local)
}

/// Epoch milliseconds of a wall-clock datetime in the local zone.
pub fn epoch_ms(wall: NaiveDateTime) -> i64 {
    local_instant(wall).timestamp_millis()
}

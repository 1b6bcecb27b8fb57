//! Working-hour strings and interval arithmetic.

use chrono::{Duration, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// One continuous block of working time within a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkInterval {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl WorkInterval {
    /// Whether `[start, end)` fits entirely inside this block.
    pub fn contains(&self, start: NaiveTime, end: NaiveTime) -> bool {
        start >= self.start && end <= self.end
    }
}

/// Parse `"09:00-13:00,15:00-19:00"` into ordered intervals.
///
/// Parts that are not `HH:MM-HH:MM`, or whose end is not after the start, are skipped.
pub fn parse_hours(hours: &str) -> Vec<WorkInterval> {
    let mut intervals: Vec<WorkInterval> = hours
        .split(',')
        .filter_map(|part| {
            let (start, end) = part.trim().split_once('-')?;
            let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").ok()?;
            let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?;
            (end > start).then_some(WorkInterval { start, end })
        })
        .collect();
    intervals.sort();
    intervals
}

/// Whether `[start, end)` collides with an appointment `[busy_start, busy_end)`
/// followed by `buffer_minutes` of rest.
pub fn overlaps_with_buffer(
    start: NaiveDateTime,
    end: NaiveDateTime,
    busy_start: NaiveDateTime,
    busy_end: NaiveDateTime,
    buffer_minutes: u32,
) -> bool {
    start < busy_end + Duration::minutes(buffer_minutes as i64) && end > busy_start
}

/// Whether an appointment lies inside a single working interval of its day.
pub fn within_working_hours(intervals: &[WorkInterval], start: NaiveDateTime, end: NaiveDateTime) -> bool {
    if start.date() != end.date() {
        return false;
    }
    intervals
        .iter()
        .any(|interval| interval.contains(start.time(), end.time()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn dt(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2031, 3, 3).unwrap().and_time(t(h, m))
    }

    #[test]
    fn test_parse_split_shift() {
        let intervals = parse_hours("15:00-19:00, 09:00-13:00");
        assert_eq!(
            intervals,
            vec![
                WorkInterval { start: t(9, 0), end: t(13, 0) },
                WorkInterval { start: t(15, 0), end: t(19, 0) },
            ]
        );
    }

    #[test]
    fn test_parse_skips_malformed() {
        assert_eq!(parse_hours("9-13,abc,08:00-12:00").len(), 1);
        assert!(parse_hours("").is_empty());
        assert!(parse_hours("NO_LABORABLE").is_empty());
        // Reversed range
        assert!(parse_hours("13:00-09:00").is_empty());
    }

    #[test]
    fn test_buffer_blocks_following_slot() {
        // Appointment 09:00-09:30, buffer until 09:45
        let busy = (dt(9, 0), dt(9, 30));
        assert!(overlaps_with_buffer(dt(9, 30), dt(10, 0), busy.0, busy.1, 15));
        assert!(!overlaps_with_buffer(dt(9, 45), dt(10, 15), busy.0, busy.1, 15));
        // Ending exactly when the other starts is fine
        assert!(!overlaps_with_buffer(dt(8, 30), dt(9, 0), busy.0, busy.1, 15));
        assert!(overlaps_with_buffer(dt(8, 45), dt(9, 15), busy.0, busy.1, 15));
    }

    #[test]
    fn test_within_working_hours() {
        let intervals = parse_hours("09:00-13:00,15:00-19:00");
        assert!(within_working_hours(&intervals, dt(9, 0), dt(9, 30)));
        assert!(within_working_hours(&intervals, dt(12, 30), dt(13, 0)));
        // Spanning the lunch break
        assert!(!within_working_hours(&intervals, dt(12, 45), dt(15, 15)));
        assert!(!within_working_hours(&intervals, dt(8, 30), dt(9, 30)));
        assert!(!within_working_hours(&intervals, dt(23, 45), dt(23, 45) + Duration::minutes(30)));
    }
}

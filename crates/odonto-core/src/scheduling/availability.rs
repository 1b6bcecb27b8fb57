//! Slot generation for a dentist's day.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use super::hours::{overlaps_with_buffer, parse_hours, WorkInterval};
use crate::config::SchedulingConfig;
use crate::models::{ScheduleException, WeeklySchedule};

pub const DAY_OFF_REASON: &str = "Día no laborable";
pub const NO_REGULAR_HOURS_REASON: &str = "Sin horario regular configurado para este día";

/// Which hours apply on a given date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayHours {
    /// Not working; carries the reason shown to the user
    Off(String),
    Working {
        hours: String,
        /// Hours come from a date exception rather than the weekly template
        from_exception: bool,
        exception_reason: Option<String>,
    },
}

/// Resolve a date against the weekly template and an optional exception.
///
/// An exception always wins over the template.
pub fn resolve_day(schedule: &WeeklySchedule, exception: Option<&ScheduleException>, date: NaiveDate) -> DayHours {
    if let Some(exception) = exception {
        if exception.is_day_off() {
            let reason = exception
                .reason
                .clone()
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| DAY_OFF_REASON.to_string());
            return DayHours::Off(reason);
        }
        return DayHours::Working {
            hours: exception.hours.clone(),
            from_exception: true,
            exception_reason: exception.reason.clone(),
        };
    }

    match schedule.hours_for(date.weekday()) {
        Some(hours) => DayHours::Working {
            hours: hours.to_string(),
            from_exception: false,
            exception_reason: None,
        },
        None => DayHours::Off(NO_REGULAR_HOURS_REASON.to_string()),
    }
}

/// A candidate start on the booking grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: NaiveTime,
    /// Start of the next grid slot
    pub end: NaiveTime,
    pub available: bool,
}

/// Availability of one dentist on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub dentist_id: String,
    pub dentist_name: String,
    pub duration_minutes: u32,
    pub available: bool,
    /// Why the day is unavailable
    pub reason: Option<String>,
    pub is_exception: bool,
    pub exception_reason: Option<String>,
    pub slots: Vec<Slot>,
}

impl DayAvailability {
    pub fn free_slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|s| s.available)
    }
}

/// Lay out grid slots over each interval and mark those where an appointment of
/// `duration_minutes` fits without touching a busy period (plus buffer).
///
/// A slot is offered while `slot + grid <= interval end`.
pub fn generate_slots(
    date: NaiveDate,
    intervals: &[WorkInterval],
    duration_minutes: u32,
    grid: SchedulingConfig,
    busy: &[(NaiveDateTime, NaiveDateTime)],
) -> Vec<Slot> {
    let step = Duration::minutes(grid.slot_minutes.max(1) as i64);
    let duration = Duration::minutes(duration_minutes as i64);
    let mut slots = Vec::new();

    for interval in intervals {
        let interval_end = date.and_time(interval.end);
        let mut current = date.and_time(interval.start);

        while current + step <= interval_end {
            let appointment_end = current + duration;
            let fits = appointment_end <= interval_end;
            let free = fits
                && !busy.iter().any(|(busy_start, busy_end)| {
                    overlaps_with_buffer(
                        current,
                        appointment_end,
                        *busy_start,
                        *busy_end,
                        grid.buffer_minutes,
                    )
                });

            slots.push(Slot {
                start: current.time(),
                end: (current + step).time(),
                available: free,
            });
            current += step;
        }
    }

    slots
}

/// Working intervals for a day, empty when the day is off.
pub fn day_intervals(day: &DayHours) -> Vec<WorkInterval> {
    match day {
        DayHours::Off(_) => Vec::new(),
        DayHours::Working { hours, .. } => parse_hours(hours),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use proptest::prelude::*;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2031, 3, 3).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        monday().and_hms_opt(h, m, 0).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_exception_wins() {
        let mut schedule = WeeklySchedule::new();
        schedule.set(Weekday::Mon, "09:00-13:00");

        let off = ScheduleException::day_off("d".into(), monday(), None);
        assert_eq!(
            resolve_day(&schedule, Some(&off), monday()),
            DayHours::Off(DAY_OFF_REASON.to_string())
        );

        let mut partial = ScheduleException::new("d".into(), monday(), "10:00-11:00".into());
        partial.reason = Some("Congreso".into());
        match resolve_day(&schedule, Some(&partial), monday()) {
            DayHours::Working { hours, from_exception, exception_reason } => {
                assert_eq!(hours, "10:00-11:00");
                assert!(from_exception);
                assert_eq!(exception_reason.as_deref(), Some("Congreso"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_day_off_reason_kept() {
        let off = ScheduleException::day_off("d".into(), monday(), Some("Vacaciones".into()));
        assert_eq!(
            resolve_day(&WeeklySchedule::new(), Some(&off), monday()),
            DayHours::Off("Vacaciones".into())
        );
    }

    #[test]
    fn test_missing_template_day() {
        let schedule = WeeklySchedule::new();
        assert_eq!(
            resolve_day(&schedule, None, monday()),
            DayHours::Off(NO_REGULAR_HOURS_REASON.to_string())
        );
    }

    #[test]
    fn test_slots_over_split_shift() {
        let intervals = parse_hours("09:00-10:00,15:00-16:00");
        let slots = generate_slots(monday(), &intervals, 30, SchedulingConfig::default(), &[]);

        let starts: Vec<NaiveTime> = slots.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![t(9, 0), t(9, 30), t(15, 0), t(15, 30)]);
        assert!(slots.iter().all(|s| s.available));
    }

    #[test]
    fn test_long_procedure_does_not_overrun_interval() {
        let intervals = parse_hours("09:00-10:00");
        let slots = generate_slots(monday(), &intervals, 60, SchedulingConfig::default(), &[]);

        assert_eq!(slots.len(), 2);
        assert!(slots[0].available);
        assert!(!slots[1].available);
    }

    #[test]
    fn test_busy_with_buffer() {
        let intervals = parse_hours("09:00-11:00");
        let busy = [(at(9, 30), at(10, 0))];
        let slots = generate_slots(monday(), &intervals, 30, SchedulingConfig::default(), &busy);

        let free: Vec<NaiveTime> = slots.iter().filter(|s| s.available).map(|s| s.start).collect();
        // 09:00 ends as the appointment starts; 10:00 falls inside the buffer
        assert_eq!(free, vec![t(9, 0), t(10, 30)]);
    }

    #[test]
    fn test_custom_grid() {
        let intervals = parse_hours("09:00-10:00");
        let grid = SchedulingConfig {
            slot_minutes: 20,
            buffer_minutes: 0,
        };
        let busy = [(at(9, 0), at(9, 20))];
        let slots = generate_slots(monday(), &intervals, 20, grid, &busy);

        assert_eq!(slots.len(), 3);
        assert!(!slots[0].available);
        assert!(slots[1].available);
    }

    proptest! {
        #[test]
        fn prop_available_slots_fit_and_never_conflict(
            start_hour in 6u32..12,
            length_slots in 1u32..12,
            duration in prop::sample::select(vec![15u32, 30, 45, 60, 90]),
            busy_offsets in prop::collection::vec((0u32..600, 15u32..120), 0..5),
        ) {
            let grid = SchedulingConfig::default();
            let start = t(start_hour, 0);
            let end = start + Duration::minutes((length_slots * grid.slot_minutes) as i64);
            let intervals = vec![WorkInterval { start, end }];

            let day_start = monday().and_hms_opt(0, 0, 0).unwrap();
            let busy: Vec<(NaiveDateTime, NaiveDateTime)> = busy_offsets
                .iter()
                .map(|(offset, len)| {
                    let s = day_start + Duration::minutes((start_hour * 60 + *offset) as i64);
                    (s, s + Duration::minutes(*len as i64))
                })
                .collect();

            let slots = generate_slots(monday(), &intervals, duration, grid, &busy);
            prop_assert_eq!(slots.len() as u32, length_slots);

            for slot in &slots {
                prop_assert!(slot.end <= end);
                let minutes_from_start = (slot.start - start).num_minutes();
                prop_assert_eq!(minutes_from_start % grid.slot_minutes as i64, 0);

                if slot.available {
                    let s = monday().and_time(slot.start);
                    let e = s + Duration::minutes(duration as i64);
                    prop_assert!(e <= monday().and_time(end));
                    for (bs, be) in &busy {
                        prop_assert!(!overlaps_with_buffer(s, e, *bs, *be, grid.buffer_minutes));
                    }
                }
            }
        }
    }
}

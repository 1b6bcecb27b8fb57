//! Dentist working hours.

use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

/// Marker stored in an exception's hours for a day off.
pub const NO_WORKING_DAY: &str = "NO_LABORABLE";

/// Regular hours per weekday, e.g. `"09:00-13:00,15:00-19:00"`.
///
/// Indexed Monday = 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WeeklySchedule {
    days: [Option<String>; 7],
}

impl WeeklySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hours for a weekday, `None` when unset or blank.
    pub fn hours_for(&self, day: Weekday) -> Option<&str> {
        self.days[day.num_days_from_monday() as usize]
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
    }

    pub fn set(&mut self, day: Weekday, hours: impl Into<String>) {
        self.days[day.num_days_from_monday() as usize] = Some(hours.into());
    }

    pub fn clear(&mut self, day: Weekday) {
        self.days[day.num_days_from_monday() as usize] = None;
    }

    /// Configured days in weekday order.
    pub fn iter(&self) -> impl Iterator<Item = (Weekday, &str)> + '_ {
        let mut day = Weekday::Mon;
        (0..7).filter_map(move |_| {
            let current = day;
            day = day.succ();
            self.hours_for(current).map(|h| (current, h))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// Date-specific override of a dentist's hours.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleException {
    pub id: String,
    pub user_id: String,
    pub date: NaiveDate,
    /// Interval list or [`NO_WORKING_DAY`]
    pub hours: String,
    pub reason: Option<String>,
}

impl ScheduleException {
    pub fn new(user_id: String, date: NaiveDate, hours: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            date,
            hours,
            reason: None,
        }
    }

    pub fn day_off(user_id: String, date: NaiveDate, reason: Option<String>) -> Self {
        let mut exception = Self::new(user_id, date, NO_WORKING_DAY.to_string());
        exception.reason = reason;
        exception
    }

    pub fn is_day_off(&self) -> bool {
        self.hours.trim().eq_ignore_ascii_case(NO_WORKING_DAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weekly_schedule() {
        let mut schedule = WeeklySchedule::new();
        assert!(schedule.is_empty());

        schedule.set(Weekday::Mon, "09:00-13:00,15:00-19:00");
        schedule.set(Weekday::Sat, "09:00-12:00");
        schedule.set(Weekday::Wed, "   ");

        assert_eq!(schedule.hours_for(Weekday::Mon), Some("09:00-13:00,15:00-19:00"));
        assert_eq!(schedule.hours_for(Weekday::Wed), None);
        assert_eq!(schedule.hours_for(Weekday::Sun), None);

        let days: Vec<Weekday> = schedule.iter().map(|(d, _)| d).collect();
        assert_eq!(days, vec![Weekday::Mon, Weekday::Sat]);

        schedule.clear(Weekday::Sat);
        assert_eq!(schedule.iter().count(), 1);
    }

    #[test]
    fn test_schedule_json_shape() {
        let mut schedule = WeeklySchedule::new();
        schedule.set(Weekday::Tue, "08:00-12:00");
        let json = serde_json::to_string(&schedule).unwrap();
        let back: WeeklySchedule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schedule);
    }

    #[test]
    fn test_day_off() {
        let date = NaiveDate::from_ymd_opt(2031, 5, 1).unwrap();
        let off = ScheduleException::day_off("u1".into(), date, None);
        assert!(off.is_day_off());

        let partial = ScheduleException::new("u1".into(), date, "09:00-11:00".into());
        assert!(!partial.is_day_off());
    }
}

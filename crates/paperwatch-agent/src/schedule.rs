//! Recurring-run timing.

use std::time::Duration;

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};

#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    /// Every day at a wall-clock time.
    Daily { at: NaiveTime },
    /// On the listed weekdays at a wall-clock time.
    Weekly { days: Vec<Weekday>, at: NaiveTime },
    /// Fixed gap between runs.
    Interval { every: Duration },
}

impl Schedule {
    /// First fire time strictly after `now`.
    pub fn next_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        match self {
            Schedule::Daily { at } => {
                let today = now.date().and_time(*at);
                if today > now {
                    today
                } else {
                    today + chrono::Duration::days(1)
                }
            }
            Schedule::Weekly { days, at } => (0..=7)
                .map(|offset| (now.date() + chrono::Duration::days(offset)).and_time(*at))
                .find(|t| *t > now && days.contains(&t.weekday()))
                // Unreachable with a non-empty day list; fall back to a week out.
                .unwrap_or_else(|| now + chrono::Duration::days(7)),
            Schedule::Interval { every } => {
                now + chrono::Duration::from_std(*every).unwrap_or_else(|_| chrono::Duration::days(1))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Schedule::Daily { at } => format!("daily at {}", at.format("%H:%M")),
            Schedule::Weekly { days, at } => {
                let days: Vec<String> = days.iter().map(|d| d.to_string()).collect();
                format!("weekly on {} at {}", days.join(","), at.format("%H:%M"))
            }
            Schedule::Interval { every } => format!("every {} min", every.as_secs() / 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap()
    }

    fn nine() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_later_today() {
        let s = Schedule::Daily { at: nine() };
        assert_eq!(s.next_after(at(2024, 1, 3, 8, 30)), at(2024, 1, 3, 9, 0));
    }

    #[test]
    fn test_daily_rolls_to_tomorrow() {
        let s = Schedule::Daily { at: nine() };
        assert_eq!(s.next_after(at(2024, 1, 3, 9, 0)), at(2024, 1, 4, 9, 0));
        assert_eq!(s.next_after(at(2024, 12, 31, 23, 0)), at(2025, 1, 1, 9, 0));
    }

    #[test]
    fn test_weekly_picks_next_listed_day() {
        // 2024-01-03 is a Wednesday.
        let s = Schedule::Weekly { days: vec![Weekday::Mon, Weekday::Fri], at: nine() };
        assert_eq!(s.next_after(at(2024, 1, 3, 12, 0)), at(2024, 1, 5, 9, 0));
        assert_eq!(s.next_after(at(2024, 1, 5, 10, 0)), at(2024, 1, 8, 9, 0));
    }

    #[test]
    fn test_weekly_same_day_before_time() {
        let s = Schedule::Weekly { days: vec![Weekday::Wed], at: nine() };
        assert_eq!(s.next_after(at(2024, 1, 3, 8, 0)), at(2024, 1, 3, 9, 0));
        assert_eq!(s.next_after(at(2024, 1, 3, 9, 30)), at(2024, 1, 10, 9, 0));
    }

    #[test]
    fn test_interval() {
        let s = Schedule::Interval { every: Duration::from_secs(90 * 60) };
        assert_eq!(s.next_after(at(2024, 1, 3, 23, 0)), at(2024, 1, 4, 0, 30));
        assert_eq!(s.describe(), "every 90 min");
    }
}

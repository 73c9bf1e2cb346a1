//! Epidemiological week calendar
//!
//! Weeks run Sunday to Saturday. Week 1 of a year is the week that contains
//! 4 January, so it may start as early as 29 December of the previous year.
//! A year has 52 or 53 weeks depending on where week 1 of the next year
//! begins.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EpiWeekError {
    #[error("year {0} is outside the supported calendar range")]
    InvalidYear(i32),

    #[error("epidemiological week {week} is out of range for {year} (1..={max})")]
    WeekOutOfRange { year: i32, week: u32, max: u32 },
}

/// An (epidemiological year, week) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EpiWeek {
    pub year: i32,
    pub week: u32,
}

impl EpiWeek {
    pub fn new(year: i32, week: u32) -> Result<Self, EpiWeekError> {
        let max = weeks_in_year(year)?;
        if week == 0 || week > max {
            return Err(EpiWeekError::WeekOutOfRange { year, week, max });
        }
        Ok(Self { year, week })
    }

    /// The Sunday this week starts on.
    pub fn start_date(&self) -> Result<NaiveDate, EpiWeekError> {
        week_start(self.year, self.week)
    }

    /// The epidemiological week containing `date`.
    pub fn containing(date: NaiveDate) -> Result<Self, EpiWeekError> {
        let year = date.year();
        let next_start = first_week_start(year + 1)?;
        if date >= next_start {
            return Ok(Self {
                year: year + 1,
                week: weeks_between(next_start, date) + 1,
            });
        }

        let start = first_week_start(year)?;
        if date < start {
            let prev_start = first_week_start(year - 1)?;
            return Ok(Self {
                year: year - 1,
                week: weeks_between(prev_start, date) + 1,
            });
        }

        Ok(Self {
            year,
            week: weeks_between(start, date) + 1,
        })
    }
}

impl fmt::Display for EpiWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-W{:02}", self.year, self.week)
    }
}

/// Sunday on or before 4 January of `year`.
pub fn first_week_start(year: i32) -> Result<NaiveDate, EpiWeekError> {
    let jan4 = NaiveDate::from_ymd_opt(year, 1, 4).ok_or(EpiWeekError::InvalidYear(year))?;
    let back = i64::from(jan4.weekday().num_days_from_sunday());
    Ok(jan4 - Duration::days(back))
}

pub fn weeks_in_year(year: i32) -> Result<u32, EpiWeekError> {
    let start = first_week_start(year)?;
    let next = first_week_start(year + 1)?;
    Ok(weeks_between(start, next))
}

/// Start date of `(year, week)`; the week must exist in that year.
pub fn week_start(year: i32, week: u32) -> Result<NaiveDate, EpiWeekError> {
    let max = weeks_in_year(year)?;
    if week == 0 || week > max {
        return Err(EpiWeekError::WeekOutOfRange { year, week, max });
    }
    Ok(first_week_start(year)? + Duration::weeks(i64::from(week - 1)))
}

fn weeks_between(from: NaiveDate, to: NaiveDate) -> u32 {
    ((to - from).num_days() / 7) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use rstest::rstest;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[rstest]
    #[case(2023, d(2023, 1, 1))]
    #[case(2024, d(2023, 12, 31))]
    #[case(2025, d(2024, 12, 29))]
    #[case(2021, d(2021, 1, 3))]
    fn test_first_week_start(#[case] year: i32, #[case] expected: NaiveDate) {
        let start = first_week_start(year).unwrap();
        assert_eq!(start, expected);
        assert_eq!(start.weekday(), Weekday::Sun);
    }

    #[rstest]
    #[case(2020, 53)]
    #[case(2021, 52)]
    #[case(2023, 52)]
    #[case(2024, 52)]
    fn test_weeks_in_year(#[case] year: i32, #[case] weeks: u32) {
        assert_eq!(weeks_in_year(year).unwrap(), weeks);
    }

    #[test]
    fn test_week_start_offsets_by_whole_weeks() {
        assert_eq!(week_start(2024, 1).unwrap(), d(2023, 12, 31));
        assert_eq!(week_start(2024, 2).unwrap(), d(2024, 1, 7));
        assert_eq!(week_start(2024, 52).unwrap(), d(2024, 12, 22));
    }

    #[test]
    fn test_week_out_of_range_is_rejected() {
        assert!(matches!(
            week_start(2024, 53),
            Err(EpiWeekError::WeekOutOfRange { max: 52, .. })
        ));
        assert!(week_start(2024, 0).is_err());
        assert!(week_start(2020, 53).is_ok());
    }

    #[test]
    fn test_containing_handles_year_boundaries() {
        // 31 Dec 2023 opens week 1 of 2024.
        assert_eq!(
            EpiWeek::containing(d(2023, 12, 31)).unwrap(),
            EpiWeek { year: 2024, week: 1 }
        );
        // 2 Jan 2021 still belongs to the last week of 2020.
        assert_eq!(
            EpiWeek::containing(d(2021, 1, 2)).unwrap(),
            EpiWeek { year: 2020, week: 53 }
        );
        assert_eq!(
            EpiWeek::containing(d(2024, 6, 15)).unwrap(),
            EpiWeek { year: 2024, week: 24 }
        );
    }

    #[test]
    fn test_containing_inverts_week_start() {
        for year in 2018..=2026 {
            for week in 1..=weeks_in_year(year).unwrap() {
                let start = week_start(year, week).unwrap();
                let epi = EpiWeek::containing(start + Duration::days(3)).unwrap();
                assert_eq!(epi, EpiWeek { year, week });
            }
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(EpiWeek::new(2024, 5).unwrap().to_string(), "2024-W05");
    }
}

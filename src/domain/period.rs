//! Year-month periods.
//!
//! The canonical text form is `YYYY-MM`. Historical rows also carry a compact `YYYYMM`
//! form; both parse to the same `YearMonth`.

use crate::domain::Day;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid period {0:?}, expected YYYY-MM or YYYYMM")]
pub struct PeriodParseError(pub String);

/// A calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodParseError> {
        if !(1..=12).contains(&month) || !(1000..=9999).contains(&year) {
            return Err(PeriodParseError(format!("{year}-{month}")));
        }
        Ok(YearMonth { year, month })
    }

    pub fn of(day: Day) -> Self {
        let date = day.date();
        YearMonth {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// `YYYY-MM`
    pub fn canonical(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    /// `YYYYMM`
    pub fn compact(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            YearMonth {
                year: self.year - 1,
                month: 12,
            }
        } else {
            YearMonth {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// First and last day of the month, inclusive.
    pub fn bounds(&self) -> (Day, Day) {
        let first = Day::from_ymd(self.year, self.month, 1);
        let next = if self.month == 12 {
            Day::from_ymd(self.year + 1, 1, 1)
        } else {
            Day::from_ymd(self.year, self.month + 1, 1)
        };
        match (first, next) {
            (Some(first), Some(next)) => (first, next.pred()),
            _ => unreachable!("month validated on construction"),
        }
    }
}

impl FromStr for YearMonth {
    type Err = PeriodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = || PeriodParseError(s.to_string());
        let (year, month) = match s.len() {
            7 if s.as_bytes()[4] == b'-' => (&s[..4], &s[5..]),
            6 => (&s[..4], &s[4..]),
            _ => return Err(err()),
        };
        if !year.chars().chain(month.chars()).all(|c| c.is_ascii_digit()) {
            return Err(err());
        }
        let year: i32 = year.parse().map_err(|_| err())?;
        let month: u32 = month.parse().map_err(|_| err())?;
        YearMonth::new(year, month).map_err(|_| err())
    }
}

impl TryFrom<String> for YearMonth {
    type Error = PeriodParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<YearMonth> for String {
    fn from(value: YearMonth) -> Self {
        value.canonical()
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

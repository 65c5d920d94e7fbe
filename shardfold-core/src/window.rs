//! Time-window keys derived from shard filenames.
//!
//! A shard's file stem names the period it covers: `YYYY-MM-DD` for a day,
//! `YYYY-MM` for a month, `YYYY` for a year. Parsing never fails loudly; a stem
//! that is not a calendar-valid label is `Unparseable` and the caller skips it.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Granularity of a window key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Day,
    Month,
    Year,
}

/// Canonical period label used to group shards.
///
/// Ordering is chronological within a granularity, which is the order the
/// orchestrator walks windows in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WindowKey {
    Day(NaiveDate),
    Month { year: i32, month: u32 },
    Year(i32),
}

/// Result of parsing a filename stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyParse {
    Parsed(WindowKey),
    Unparseable,
}

impl KeyParse {
    pub fn parsed(self) -> Option<WindowKey> {
        match self {
            KeyParse::Parsed(key) => Some(key),
            KeyParse::Unparseable => None,
        }
    }
}

impl WindowKey {
    /// Parse a canonical label (`YYYY-MM-DD`, `YYYY-MM`, or `YYYY`).
    pub fn parse(label: &str) -> KeyParse {
        let parts: Vec<&str> = label.split('-').collect();
        let parsed = match parts.as_slice() {
            [y] => parse_year(y).map(WindowKey::Year),
            [y, m] => parse_year(y)
                .zip(parse_month(m))
                .map(|(year, month)| WindowKey::Month { year, month }),
            [y, m, d] => parse_year(y)
                .zip(parse_month(m))
                .zip(parse_two_digits(d))
                .and_then(|((year, month), day)| NaiveDate::from_ymd_opt(year, month, day))
                .map(WindowKey::Day),
            _ => None,
        };
        match parsed {
            Some(key) => KeyParse::Parsed(key),
            None => KeyParse::Unparseable,
        }
    }

    /// Parse the file stem of a shard path.
    pub fn from_path(path: &Path) -> KeyParse {
        match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => Self::parse(stem),
            None => KeyParse::Unparseable,
        }
    }

    pub fn month(year: i32, month: u32) -> Option<Self> {
        (1..=12)
            .contains(&month)
            .then_some(WindowKey::Month { year, month })
    }

    pub fn granularity(&self) -> Granularity {
        match self {
            WindowKey::Day(_) => Granularity::Day,
            WindowKey::Month { .. } => Granularity::Month,
            WindowKey::Year(_) => Granularity::Year,
        }
    }

    pub fn year(&self) -> i32 {
        match self {
            WindowKey::Day(date) => date.year(),
            WindowKey::Month { year, .. } => *year,
            WindowKey::Year(year) => *year,
        }
    }

    /// The enclosing window one granularity up: day → month → year.
    /// A year has no parent.
    pub fn parent(&self) -> Option<WindowKey> {
        match self {
            WindowKey::Day(date) => Some(WindowKey::Month {
                year: date.year(),
                month: date.month(),
            }),
            WindowKey::Month { year, .. } => Some(WindowKey::Year(*year)),
            WindowKey::Year(_) => None,
        }
    }

    /// First calendar day of the window.
    pub fn first_day(&self) -> Option<NaiveDate> {
        match self {
            WindowKey::Day(date) => Some(*date),
            WindowKey::Month { year, month } => NaiveDate::from_ymd_opt(*year, *month, 1),
            WindowKey::Year(year) => NaiveDate::from_ymd_opt(*year, 1, 1),
        }
    }

    /// First calendar day after the window ends.
    pub fn next_start(&self) -> Option<NaiveDate> {
        match self {
            WindowKey::Day(date) => date.succ_opt(),
            WindowKey::Month { year, month } if *month == 12 => {
                NaiveDate::from_ymd_opt(year + 1, 1, 1)
            }
            WindowKey::Month { year, month } => NaiveDate::from_ymd_opt(*year, month + 1, 1),
            WindowKey::Year(year) => NaiveDate::from_ymd_opt(year + 1, 1, 1),
        }
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowKey::Day(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            WindowKey::Month { year, month } => write!(f, "{year:04}-{month:02}"),
            WindowKey::Year(year) => write!(f, "{year:04}"),
        }
    }
}

fn parse_year(s: &str) -> Option<i32> {
    if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_month(s: &str) -> Option<u32> {
    parse_two_digits(s).filter(|m| (1..=12).contains(m))
}

fn parse_two_digits(s: &str) -> Option<u32> {
    if s.len() != 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

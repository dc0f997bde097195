// Calendar-quarter seasons and the time windows used by the ledger queries.

use super::leveling_models::WindowMode;
use super::leveling_store::LevelingError;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::fmt;

/// Half-open `[start, end)` interval. `None` means unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn new(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self, LevelingError> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(LevelingError::InvalidArgument(format!(
                    "window starts at {start} but ends at {end}"
                )));
            }
        }
        Ok(Self { start, end })
    }

    pub fn unbounded() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    /// The window a mode aggregates over at `now`.
    pub fn for_mode(mode: WindowMode, now: DateTime<Utc>) -> Self {
        match mode {
            WindowMode::Seasonal => Season::containing(now).window(),
            WindowMode::Lifetime => Self::unbounded(),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at < end)
    }

    /// Bounds as epoch milliseconds, saturating for the unbounded sides.
    pub fn millis_bounds(&self) -> (i64, i64) {
        (
            self.start.map_or(i64::MIN, |s| s.timestamp_millis()),
            self.end.map_or(i64::MAX, |e| e.timestamp_millis()),
        )
    }
}

/// A calendar quarter. `quarter` is zero-indexed: 0 = Jan–Mar … 3 = Oct–Dec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Season {
    pub year: i32,
    pub quarter: u32,
}

impl Season {
    pub fn containing(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            quarter: (at.month() - 1) / 3,
        }
    }

    pub fn next(&self) -> Self {
        if self.quarter == 3 {
            Self {
                year: self.year + 1,
                quarter: 0,
            }
        } else {
            Self {
                year: self.year,
                quarter: self.quarter + 1,
            }
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(self.year, self.quarter * 3 + 1, 1)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .unwrap_or_default()
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            start: Some(self.start()),
            end: Some(self.next().start()),
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Q{}", self.year, self.quarter + 1)
    }
}

// Rolling window: the single piece of mutable control state.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WindowError;

/// Inclusive date range `[start_date, end_date]`. Always `start_date <= end_date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingWindow {
    start_date: NaiveDate,
    end_date: NaiveDate,
}

impl RollingWindow {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Result<Self, WindowError> {
        if start_date > end_date {
            return Err(WindowError::Inverted {
                start: start_date.to_string(),
                end: end_date.to_string(),
            });
        }
        Ok(Self {
            start_date,
            end_date,
        })
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    /// `end - start` in days; a 7-day window has width 6.
    pub fn width_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }

    /// Both bounds moved forward by `stride_days`. Width is unchanged.
    pub fn shifted(&self, stride_days: u32) -> Result<Self, WindowError> {
        let days = Days::new(u64::from(stride_days));
        let overflow = || WindowError::Overflow { stride_days };
        let start_date = self.start_date.checked_add_days(days).ok_or_else(overflow)?;
        let end_date = self.end_date.checked_add_days(days).ok_or_else(overflow)?;
        Ok(Self {
            start_date,
            end_date,
        })
    }

    /// Bounds truncated to the first of their month, for partition pruning.
    /// Always covers every timestamp in [`Self::timestamp_bounds`].
    pub fn month_bounds(&self) -> (NaiveDate, NaiveDate) {
        (month_start(self.start_date), month_start(self.end_date))
    }

    /// Half-open UTC range `[start 00:00, end + 1 day 00:00)`.
    pub fn timestamp_bounds(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), WindowError> {
        let after_end = self
            .end_date
            .checked_add_days(Days::new(1))
            .ok_or_else(|| WindowError::UnboundedEnd {
                end: self.end_date.to_string(),
            })?;
        Ok((midnight_utc(self.start_date), midnight_utc(after_end)))
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        let day = ts.date_naive();
        day >= self.start_date && day <= self.end_date
    }
}

impl std::fmt::Display for RollingWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start_date, self.end_date)
    }
}

pub fn month_start(d: NaiveDate) -> NaiveDate {
    d.checked_sub_days(Days::new(u64::from(d.day0()))).unwrap_or(d)
}

fn midnight_utc(d: NaiveDate) -> DateTime<Utc> {
    d.and_time(NaiveTime::MIN).and_utc()
}

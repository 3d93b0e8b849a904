//! Incremental sync window math.
//!
//! Day buckets are computed in a fixed civil time zone (UTC-03:00, the
//! reporting zone of the accounts this engine serves) so that date keys
//! are stable regardless of the server's locale.

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use thiserror::Error;

/// Offset of the reporting zone from UTC, in seconds (UTC-03:00).
pub const REPORTING_TZ_OFFSET_SECS: i32 = -3 * 3600;

/// The fixed civil zone used for all day-bucket formatting.
pub fn reporting_tz() -> FixedOffset {
    FixedOffset::east_opt(REPORTING_TZ_OFFSET_SECS).expect("offset is in range")
}

/// Kept for callers that only need the zone name in messages.
pub const REPORTING_TZ: &str = "UTC-03:00";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("sync window requires a positive day count, got {0}")]
    NonPositiveDays(i64),
}

/// A `[since, until]` range in the reporting zone, plus the day count it
/// was derived from so the preceding comparison period can be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub since: DateTime<FixedOffset>,
    pub until: DateTime<FixedOffset>,
    days: i64,
}

impl SyncWindow {
    /// Trailing window for entity listings: `since` is midnight `days`
    /// days before `now`'s civil day, `until` is the end of `now`'s day.
    pub fn trailing(days: i64, now: DateTime<Utc>) -> Result<Self, WindowError> {
        if days <= 0 {
            return Err(WindowError::NonPositiveDays(days));
        }
        let midnight = civil_midnight(now);
        Ok(Self {
            since: midnight - Duration::days(days),
            until: midnight + Duration::days(1) - Duration::milliseconds(1),
            days,
        })
    }

    /// Window for metric ingestion: ends at yesterday's end of day so a
    /// partially elapsed day is never ingested, and spans exactly `days`
    /// complete days.
    pub fn metrics(days: i64, now: DateTime<Utc>) -> Result<Self, WindowError> {
        if days <= 0 {
            return Err(WindowError::NonPositiveDays(days));
        }
        let midnight = civil_midnight(now);
        Ok(Self {
            since: midnight - Duration::days(days),
            until: midnight - Duration::milliseconds(1),
            days,
        })
    }

    /// The immediately preceding period of equal length, for comparison
    /// reports: `prev_until = since - 1ms`, `prev_since = prev_until - days`.
    pub fn previous_period(&self) -> SyncWindow {
        let until = self.since - Duration::milliseconds(1);
        SyncWindow {
            since: until - Duration::days(self.days),
            until,
            days: self.days,
        }
    }

    pub fn days(&self) -> i64 {
        self.days
    }

    /// Unix timestamp of the window start, for `updated_time` filters.
    pub fn since_unix(&self) -> i64 {
        self.since.timestamp()
    }

    /// Day key of the window start (`YYYY-MM-DD` in the reporting zone).
    pub fn since_day_key(&self) -> String {
        self.since.format("%Y-%m-%d").to_string()
    }

    /// Day key of the window end (`YYYY-MM-DD` in the reporting zone).
    pub fn until_day_key(&self) -> String {
        self.until.format("%Y-%m-%d").to_string()
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        let local = instant.with_timezone(&reporting_tz());
        self.since <= local && local <= self.until
    }
}

fn civil_midnight(now: DateTime<Utc>) -> DateTime<FixedOffset> {
    let tz = reporting_tz();
    let local = now.with_timezone(&tz);
    tz.from_local_datetime(
        &local
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is a valid time"),
    )
    .single()
    .expect("fixed offsets have no gaps")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2024-03-10T15:00:00Z".parse().expect("valid timestamp")
    }

    #[test]
    fn trailing_window_uses_reporting_zone_day_bounds() {
        let window = SyncWindow::trailing(7, now()).expect("window");
        assert_eq!(window.since.to_rfc3339(), "2024-03-03T00:00:00-03:00");
        assert_eq!(window.until.to_rfc3339(), "2024-03-10T23:59:59.999-03:00");
        assert_eq!(window.since_day_key(), "2024-03-03");
        assert_eq!(window.until_day_key(), "2024-03-10");
    }

    #[test]
    fn metrics_window_ends_yesterday() {
        let window = SyncWindow::metrics(7, now()).expect("window");
        assert_eq!(window.since.to_rfc3339(), "2024-03-03T00:00:00-03:00");
        assert_eq!(window.until.to_rfc3339(), "2024-03-09T23:59:59.999-03:00");
    }

    #[test]
    fn previous_period_is_symmetric_and_adjacent() {
        let window = SyncWindow::trailing(7, now()).expect("window");
        let prev = window.previous_period();
        assert_eq!(prev.until, window.since - Duration::milliseconds(1));
        assert_eq!(prev.since, prev.until - Duration::days(7));
    }

    #[test]
    fn non_positive_days_are_rejected() {
        assert_eq!(
            SyncWindow::trailing(0, now()),
            Err(WindowError::NonPositiveDays(0))
        );
        assert_eq!(
            SyncWindow::metrics(-3, now()),
            Err(WindowError::NonPositiveDays(-3))
        );
    }

    #[test]
    fn day_key_is_stable_across_utc_day_boundary() {
        // 01:00 UTC is still the previous civil day in UTC-03:00.
        let late: DateTime<Utc> = "2024-03-11T01:00:00Z".parse().expect("ts");
        let window = SyncWindow::trailing(1, late).expect("window");
        assert_eq!(window.until_day_key(), "2024-03-10");
    }
}

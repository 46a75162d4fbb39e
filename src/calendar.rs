//! Wall-clock view of stored timestamps.
//!
//! Sessions are stored as unix milliseconds. Month and date bucketing, and
//! textual timestamps on the SQL surface, use the studio's fixed UTC offset.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc,
};

use crate::model::Ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    offset: FixedOffset,
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl Calendar {
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    /// `None` when the offset is outside ±24h.
    pub fn with_offset_minutes(minutes: i32) -> Option<Self> {
        let offset = FixedOffset::east_opt(minutes.checked_mul(60)?)?;
        Some(Self { offset })
    }

    pub fn offset_minutes(&self) -> i32 {
        self.offset.local_minus_utc() / 60
    }

    fn local(&self, at: Ms) -> Option<DateTime<FixedOffset>> {
        DateTime::from_timestamp_millis(at).map(|utc| utc.with_timezone(&self.offset))
    }

    /// Local wall-clock time to unix ms.
    pub fn to_ms(&self, local: NaiveDateTime) -> Option<Ms> {
        self.offset
            .from_local_datetime(&local)
            .single()
            .map(|dt| dt.timestamp_millis())
    }

    /// Unix ms of local midnight starting `date`.
    pub fn start_of_day(&self, date: NaiveDate) -> Option<Ms> {
        self.to_ms(date.and_hms_opt(0, 0, 0)?)
    }

    pub fn date_of(&self, at: Ms) -> Option<NaiveDate> {
        self.local(at).map(|dt| dt.date_naive())
    }

    pub fn year_month_of(&self, at: Ms) -> Option<(i32, u32)> {
        self.local(at).map(|dt| (dt.year(), dt.month()))
    }

    /// Half-open `[first instant of month, first instant of next month)`.
    pub fn month_range(&self, year: i32, month: u32) -> Option<(Ms, Ms)> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)?
        };
        Some((self.start_of_day(first)?, self.start_of_day(next)?))
    }

    /// Half-open range covering the inclusive dates `[start, end]`.
    pub fn date_range(&self, start: NaiveDate, end: NaiveDate) -> Option<(Ms, Ms)> {
        let after_end = end.checked_add_signed(Duration::days(1))?;
        Some((self.start_of_day(start)?, self.start_of_day(after_end)?))
    }

    /// `YYYY-MM-DD HH:MM` in studio local time.
    pub fn format(&self, at: Ms) -> String {
        match self.local(at) {
            Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
            None => at.to_string(),
        }
    }
}

/// Accepts `YYYY-MM-DD HH:MM[:SS]`, with `T` or space as separator.
pub fn parse_local_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const JUNE_1_2025_10H_UTC: Ms = 1_748_772_000_000;

    #[test]
    fn parse_and_convert_utc() {
        let cal = Calendar::utc();
        let local = parse_local_datetime("2025-06-01 10:00").unwrap();
        assert_eq!(cal.to_ms(local), Some(JUNE_1_2025_10H_UTC));
        let local = parse_local_datetime("2025-06-01T10:00:00").unwrap();
        assert_eq!(cal.to_ms(local), Some(JUNE_1_2025_10H_UTC));
        assert_eq!(cal.format(JUNE_1_2025_10H_UTC), "2025-06-01 10:00");
    }

    #[test]
    fn offset_shifts_wall_clock() {
        // UTC+7
        let cal = Calendar::with_offset_minutes(7 * 60).unwrap();
        assert_eq!(cal.offset_minutes(), 420);
        assert_eq!(cal.format(JUNE_1_2025_10H_UTC), "2025-06-01 17:00");
        let local = parse_local_datetime("2025-06-01 17:00").unwrap();
        assert_eq!(cal.to_ms(local), Some(JUNE_1_2025_10H_UTC));
    }

    #[test]
    fn month_bucketing_follows_offset() {
        // 2025-06-30T20:00Z is already July 1st in UTC+7.
        let at = Calendar::utc()
            .to_ms(parse_local_datetime("2025-06-30 20:00").unwrap())
            .unwrap();
        assert_eq!(Calendar::utc().year_month_of(at), Some((2025, 6)));
        let jakarta = Calendar::with_offset_minutes(420).unwrap();
        assert_eq!(jakarta.year_month_of(at), Some((2025, 7)));
    }

    #[test]
    fn month_range_wraps_december() {
        let cal = Calendar::utc();
        let (start, end) = cal.month_range(2025, 12).unwrap();
        assert_eq!(cal.date_of(start), parse_date("2025-12-01"));
        assert_eq!(cal.date_of(end), parse_date("2026-01-01"));
        assert!(cal.month_range(2025, 13).is_none());
        assert!(cal.month_range(2025, 0).is_none());
    }

    #[test]
    fn date_range_is_inclusive_of_end_day() {
        let cal = Calendar::utc();
        let (start, end) = cal
            .date_range(parse_date("2025-06-01").unwrap(), parse_date("2025-06-01").unwrap())
            .unwrap();
        assert_eq!(end - start, 24 * 3_600_000);
    }

    #[test]
    fn invalid_inputs() {
        assert!(parse_local_datetime("June 1st").is_none());
        assert!(parse_date("2025-02-30").is_none());
        assert!(Calendar::with_offset_minutes(25 * 60).is_none());
    }
}

//! Bucket boundary arithmetic.
//!
//! [`Calendar`] turns a unix timestamp into the start of the bucket that
//! contains it, walks bucket starts backwards for window reads, and renders
//! bucket starts as human-readable labels.
//!
//! Minute and hour boundaries are plain truncations of unix time. Day
//! boundaries are midnight in the calendar's time zone, so stepping back one
//! day means "midnight of the previous calendar date", not "minus 86 400
//! seconds". Where a DST transition removes midnight, the day starts at the
//! first valid local instant after it; where midnight occurs twice, the earlier
//! one wins.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, FixedOffset, LocalResult, NaiveDate, TimeDelta, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::{ArgumentError, MinimError, Result};
use crate::granularity::Granularity;

/// Time zone used for day boundaries and labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Calendar {
    /// The process-local time zone.
    #[default]
    Local,
    /// Coordinated universal time.
    Utc,
    /// A fixed offset east of UTC, in seconds.
    Fixed {
        /// Offset east of UTC in seconds (negative for west).
        offset_secs: i32,
    },
}

impl Calendar {
    /// Returns the start of the `granularity` bucket containing `at`.
    ///
    /// # Errors
    ///
    /// [`ArgumentError::TimestampOutOfRange`] if `at` cannot be represented as
    /// a calendar date, [`ArgumentError::InvalidCalendar`] if a fixed offset is
    /// out of range.
    pub fn bucket_start(self, granularity: Granularity, at: i64) -> Result<i64> {
        let start = match granularity.fixed_width_secs() {
            Some(width) => at.checked_sub(at.rem_euclid(width)),
            None => match self {
                Self::Local => day_start(&chrono::Local, at),
                Self::Utc => day_start(&chrono::Utc, at),
                Self::Fixed { offset_secs } => day_start(&fixed_offset(offset_secs)?, at),
            },
        };
        start.ok_or_else(|| out_of_range(at))
    }

    /// Returns the bucket start `steps` buckets before `bucket_start`.
    ///
    /// `bucket_start` must already be aligned (see [`Calendar::bucket_start`]).
    /// Day steps move by calendar dates.
    ///
    /// # Errors
    ///
    /// [`ArgumentError::TimestampOutOfRange`] if the result is not
    /// representable.
    pub fn step_back(self, granularity: Granularity, bucket_start: i64, steps: usize) -> Result<i64> {
        let step = match granularity.fixed_width_secs() {
            Some(width) => i64::try_from(steps)
                .ok()
                .and_then(|n| n.checked_mul(width))
                .and_then(|delta| bucket_start.checked_sub(delta)),
            None => {
                let days = u64::try_from(steps).map_err(|_| out_of_range(bucket_start))?;
                match self {
                    Self::Local => days_back(&chrono::Local, bucket_start, days),
                    Self::Utc => days_back(&chrono::Utc, bucket_start, days),
                    Self::Fixed { offset_secs } => {
                        days_back(&fixed_offset(offset_secs)?, bucket_start, days)
                    }
                }
            }
        };
        step.ok_or_else(|| out_of_range(bucket_start))
    }

    /// Renders `bucket_start` in this calendar using the granularity's label
    /// format (`2024-03-01 14:05:00`, `2024-03-01 14:00:00`, `2024-03-01`).
    ///
    /// # Errors
    ///
    /// [`ArgumentError::TimestampOutOfRange`] if `bucket_start` is not
    /// representable.
    pub fn label(self, granularity: Granularity, bucket_start: i64) -> Result<String> {
        let format = granularity.label_format();
        let label = match self {
            Self::Local => format_in(&chrono::Local, bucket_start, format),
            Self::Utc => format_in(&chrono::Utc, bucket_start, format),
            Self::Fixed { offset_secs } => format_in(&fixed_offset(offset_secs)?, bucket_start, format),
        };
        label.ok_or_else(|| out_of_range(bucket_start))
    }
}

impl fmt::Display for Calendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Local => f.write_str("local"),
            Self::Utc => f.write_str("utc"),
            Self::Fixed { offset_secs } => {
                let sign = if offset_secs < 0 { '-' } else { '+' };
                let abs = offset_secs.unsigned_abs();
                write!(f, "{sign}{:02}:{:02}", abs / 3600, (abs % 3600) / 60)?;
                if abs % 60 != 0 {
                    write!(f, ":{:02}", abs % 60)?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for Calendar {
    type Err = MinimError;

    /// Parses `local`, `utc`, or an offset such as `+05:30`, `-0800`, `+09`,
    /// `+05:30:15`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "local" => return Ok(Self::Local),
            "utc" | "z" => return Ok(Self::Utc),
            _ => {}
        }

        let offset_secs = parse_offset(trimmed).ok_or_else(|| ArgumentError::InvalidCalendar {
            value: s.to_string(),
            reason: "expected 'local', 'utc' or an offset like +05:30".to_string(),
        })?;
        fixed_offset(offset_secs)?;
        Ok(Self::Fixed { offset_secs })
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn out_of_range(timestamp: i64) -> MinimError {
    ArgumentError::TimestampOutOfRange { timestamp }.into()
}

fn fixed_offset(offset_secs: i32) -> Result<FixedOffset> {
    FixedOffset::east_opt(offset_secs).ok_or_else(|| {
        ArgumentError::InvalidCalendar {
            value: offset_secs.to_string(),
            reason: "offset must be strictly within ±24h".to_string(),
        }
        .into()
    })
}

fn parse_offset(s: &str) -> Option<i32> {
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let fields: Vec<&str> = if rest.contains(':') {
        rest.split(':').collect()
    } else if rest.len() == 4 && rest.is_ascii() {
        let (hours, minutes) = rest.split_at(2);
        vec![hours, minutes]
    } else {
        vec![rest]
    };
    let (hours, minutes, seconds) = match fields.as_slice() {
        [h] => (*h, "0", "0"),
        [h, m] => (*h, *m, "0"),
        [h, m, sec] => (*h, *m, *sec),
        _ => return None,
    };
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    let seconds: i32 = seconds.parse().ok()?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) || !(0..=59).contains(&seconds) {
        return None;
    }
    Some(sign * (hours * 3600 + minutes * 60 + seconds))
}

fn day_start<Tz: TimeZone>(tz: &Tz, at: i64) -> Option<i64> {
    let date = DateTime::from_timestamp(at, 0)?.with_timezone(tz).date_naive();
    local_midnight(tz, date)
}

fn days_back<Tz: TimeZone>(tz: &Tz, day_start: i64, days: u64) -> Option<i64> {
    let date = DateTime::from_timestamp(day_start, 0)?
        .with_timezone(tz)
        .date_naive()
        .checked_sub_days(Days::new(days))?;
    local_midnight(tz, date)
}

fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Option<i64> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => Some(dt.timestamp()),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.timestamp()),
        // Midnight fell into a DST gap; the day starts at the first local
        // quarter hour that exists.
        LocalResult::None => (1..=16).find_map(|quarter| {
            let later = midnight.checked_add_signed(TimeDelta::minutes(15 * quarter))?;
            tz.from_local_datetime(&later).earliest().map(|dt| dt.timestamp())
        }),
    }
}

fn format_in<Tz: TimeZone>(tz: &Tz, at: i64, format: &str) -> Option<String>
where
    Tz::Offset: fmt::Display,
{
    let local = DateTime::from_timestamp(at, 0)?.with_timezone(tz);
    Some(local.format(format).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2023-11-14 22:13:20 UTC
    const T: i64 = 1_700_000_000;

    #[test]
    fn test_minute_and_hour_truncate_unix_time() {
        let cal = Calendar::Utc;
        assert_eq!(cal.bucket_start(Granularity::Minute, T).unwrap(), 1_699_999_980);
        assert_eq!(cal.bucket_start(Granularity::Hour, T).unwrap(), 1_699_999_200);
        // Already aligned values are fixed points.
        assert_eq!(cal.bucket_start(Granularity::Minute, 1_699_999_980).unwrap(), 1_699_999_980);
    }

    #[test]
    fn test_negative_timestamps_truncate_downwards() {
        let cal = Calendar::Utc;
        assert_eq!(cal.bucket_start(Granularity::Minute, -1).unwrap(), -60);
        assert_eq!(cal.bucket_start(Granularity::Hour, -3601).unwrap(), -7200);
    }

    #[test]
    fn test_day_start_utc() {
        let cal = Calendar::Utc;
        // 2023-11-14 00:00:00 UTC
        assert_eq!(cal.bucket_start(Granularity::Day, T).unwrap(), 1_699_920_000);
    }

    #[test]
    fn test_day_start_fixed_offset() {
        // At +05:30 the instant is 2023-11-15 03:43:20, so the day began at
        // 2023-11-15 00:00 +05:30 = 2023-11-14 18:30 UTC.
        let cal = Calendar::Fixed { offset_secs: 19_800 };
        assert_eq!(cal.bucket_start(Granularity::Day, T).unwrap(), 1_699_986_600);
    }

    #[test]
    fn test_step_back() {
        let cal = Calendar::Utc;
        assert_eq!(cal.step_back(Granularity::Minute, 1_699_999_980, 2).unwrap(), 1_699_999_860);
        assert_eq!(cal.step_back(Granularity::Hour, 1_699_999_200, 1).unwrap(), 1_699_995_600);
        assert_eq!(cal.step_back(Granularity::Day, 1_699_920_000, 3).unwrap(), 1_699_660_800);
        assert_eq!(cal.step_back(Granularity::Day, 1_699_920_000, 0).unwrap(), 1_699_920_000);
    }

    #[test]
    fn test_step_back_across_month_boundary() {
        let cal = Calendar::Utc;
        // 2024-03-01 00:00 UTC, one day back is 2024-02-29 (leap year).
        let march_first = 1_709_251_200;
        assert_eq!(cal.step_back(Granularity::Day, march_first, 1).unwrap(), 1_709_164_800);
        assert_eq!(cal.label(Granularity::Day, 1_709_164_800).unwrap(), "2024-02-29");
    }

    #[test]
    fn test_overflow_is_out_of_range() {
        let cal = Calendar::Utc;
        assert!(cal.bucket_start(Granularity::Minute, i64::MIN).is_err());
        assert!(cal.step_back(Granularity::Hour, i64::MIN + 10, 1).is_err());
        assert!(cal.bucket_start(Granularity::Day, i64::MAX).is_err());
    }

    #[test]
    fn test_labels() {
        let cal = Calendar::Utc;
        assert_eq!(cal.label(Granularity::Minute, 1_699_999_980).unwrap(), "2023-11-14 22:13:00");
        assert_eq!(cal.label(Granularity::Hour, 1_699_999_200).unwrap(), "2023-11-14 22:00:00");
        assert_eq!(cal.label(Granularity::Day, 1_699_920_000).unwrap(), "2023-11-14");

        let ist = Calendar::Fixed { offset_secs: 19_800 };
        assert_eq!(ist.label(Granularity::Day, 1_699_986_600).unwrap(), "2023-11-15");
    }

    #[test]
    fn test_parse_calendar() {
        assert_eq!("local".parse::<Calendar>().unwrap(), Calendar::Local);
        assert_eq!("UTC".parse::<Calendar>().unwrap(), Calendar::Utc);
        assert_eq!(
            "+05:30".parse::<Calendar>().unwrap(),
            Calendar::Fixed { offset_secs: 19_800 }
        );
        assert_eq!(
            "-0800".parse::<Calendar>().unwrap(),
            Calendar::Fixed { offset_secs: -28_800 }
        );
        assert_eq!("+09".parse::<Calendar>().unwrap(), Calendar::Fixed { offset_secs: 32_400 });
        assert_eq!(
            "+05:30:15".parse::<Calendar>().unwrap(),
            Calendar::Fixed { offset_secs: 19_815 }
        );
        assert!("+25:00".parse::<Calendar>().is_err());
        assert!("+05:30:60".parse::<Calendar>().is_err());
        assert!("+05:30:15:01".parse::<Calendar>().is_err());
        assert!("mars".parse::<Calendar>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for cal in [
            Calendar::Local,
            Calendar::Utc,
            Calendar::Fixed { offset_secs: 19_800 },
            Calendar::Fixed { offset_secs: -12_600 },
            Calendar::Fixed { offset_secs: 19_815 },
            Calendar::Fixed { offset_secs: -45 },
        ] {
            assert_eq!(cal.to_string().parse::<Calendar>().unwrap(), cal);
        }
    }

    /// A zone with a single offset change at `switch_utc`.
    #[derive(Clone, Debug)]
    struct ShiftZone {
        switch_utc: i64,
        before: FixedOffset,
        after: FixedOffset,
    }

    impl ShiftZone {
        fn new(switch_utc: i64, before_secs: i32, after_secs: i32) -> Self {
            Self {
                switch_utc,
                before: FixedOffset::east_opt(before_secs).unwrap(),
                after: FixedOffset::east_opt(after_secs).unwrap(),
            }
        }
    }

    impl TimeZone for ShiftZone {
        type Offset = FixedOffset;

        fn from_offset(offset: &FixedOffset) -> Self {
            Self {
                switch_utc: i64::MAX,
                before: *offset,
                after: *offset,
            }
        }

        fn offset_from_local_date(&self, _local: &NaiveDate) -> LocalResult<FixedOffset> {
            LocalResult::Single(self.before)
        }

        fn offset_from_local_datetime(&self, local: &chrono::NaiveDateTime) -> LocalResult<FixedOffset> {
            let wall = local.and_utc().timestamp();
            let before_ok = wall - i64::from(self.before.local_minus_utc()) < self.switch_utc;
            let after_ok = wall - i64::from(self.after.local_minus_utc()) >= self.switch_utc;
            match (before_ok, after_ok) {
                (true, true) => LocalResult::Ambiguous(self.before, self.after),
                (true, false) => LocalResult::Single(self.before),
                (false, true) => LocalResult::Single(self.after),
                (false, false) => LocalResult::None,
            }
        }

        fn offset_from_utc_date(&self, _utc: &NaiveDate) -> FixedOffset {
            self.before
        }

        fn offset_from_utc_datetime(&self, utc: &chrono::NaiveDateTime) -> FixedOffset {
            if utc.and_utc().timestamp() < self.switch_utc {
                self.before
            } else {
                self.after
            }
        }
    }

    // 2023-11-15 00:00 UTC and 04:00 UTC.
    const NOV_15: i64 = 1_700_006_400;
    const SWITCH: i64 = NOV_15 + 4 * 3600;

    #[test]
    fn test_midnight_in_dst_gap_starts_day_at_first_existing_time() {
        // Clocks jump from 00:00 -04:00 to 01:00 -03:00 on Nov 15.
        let tz = ShiftZone::new(SWITCH, -4 * 3600, -3 * 3600);
        let nov_15 = NaiveDate::from_ymd_opt(2023, 11, 15).unwrap();
        let nov_14 = NaiveDate::from_ymd_opt(2023, 11, 14).unwrap();

        // 01:00 local, the first existing time that day.
        assert_eq!(local_midnight(&tz, nov_15), Some(SWITCH));
        assert_eq!(local_midnight(&tz, nov_14), Some(NOV_15 - 86_400 + 4 * 3600));

        // 11:00 local on Nov 15 belongs to the shortened day.
        assert_eq!(day_start(&tz, SWITCH + 10 * 3600), Some(SWITCH));
        // One second before the jump is still Nov 14.
        assert_eq!(day_start(&tz, SWITCH - 1), Some(NOV_15 - 86_400 + 4 * 3600));

        let previous = days_back(&tz, SWITCH, 1).unwrap();
        assert_eq!(previous, NOV_15 - 86_400 + 4 * 3600);
        assert_eq!(SWITCH - previous, 24 * 3600);

        // Nov 15 itself is 23 hours long.
        let nov_16 = NaiveDate::from_ymd_opt(2023, 11, 16).unwrap();
        assert_eq!(local_midnight(&tz, nov_16).unwrap() - SWITCH, 23 * 3600);
    }

    #[test]
    fn test_repeated_midnight_takes_the_earlier_instant() {
        // Clocks fall back from 01:00 -03:00 to 00:00 -04:00 on Nov 15,
        // so local midnight happens twice.
        let tz = ShiftZone::new(SWITCH, -3 * 3600, -4 * 3600);
        let nov_15 = NaiveDate::from_ymd_opt(2023, 11, 15).unwrap();
        let first_midnight = NOV_15 + 3 * 3600;

        assert_eq!(local_midnight(&tz, nov_15), Some(first_midnight));

        // Both the second midnight and later that day map to the first one.
        assert_eq!(day_start(&tz, SWITCH), Some(first_midnight));
        assert_eq!(day_start(&tz, SWITCH + 10 * 3600), Some(first_midnight));

        let previous = days_back(&tz, first_midnight, 1).unwrap();
        assert_eq!(previous, NOV_15 - 86_400 + 3 * 3600);
        assert_eq!(first_midnight - previous, 24 * 3600);
    }

    #[test]
    fn test_zone_without_transition_behaves_like_fixed_offset() {
        let tz = ShiftZone::from_offset(&FixedOffset::east_opt(19_800).unwrap());
        let fixed = Calendar::Fixed { offset_secs: 19_800 };
        assert_eq!(
            day_start(&tz, T),
            Some(fixed.bucket_start(Granularity::Day, T).unwrap())
        );
    }
}

//! Duration and timestamp values.
//!
//! Both are stored as 100ns ticks. A timestamp packs its kind into the two most significant
//! bits of the 64-bit word:
//!
//! | Bits 63..62 | Kind          |
//! |-------------|---------------|
//! | `00`        | Unspecified   |
//! | `01`        | Utc           |
//! | `10`, `11`  | Local         |
//!
//! The remaining 62 bits count ticks since `0001-01-01 00:00:00`.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use strum::{Display, EnumIter};

/// Number of 100ns ticks in one second
pub const TICKS_PER_SECOND: i64 = 10_000_000;

const TICKS_PER_MINUTE: u64 = 60 * TICKS_PER_SECOND as u64;
const TICKS_PER_HOUR: u64 = 60 * TICKS_PER_MINUTE;
const TICKS_PER_DAY: u64 = 24 * TICKS_PER_HOUR;

const TICKS_MASK: u64 = 0x3FFF_FFFF_FFFF_FFFF;

/// Ticks of `9999-12-31 23:59:59.9999999`, the last representable instant
pub const MAX_TICKS: u64 = 3_155_378_975_999_999_999;
const KIND_MASK: u64 = 0xC000_0000_0000_0000;
const KIND_UNSPECIFIED: u64 = 0x0000_0000_0000_0000;
const KIND_UTC: u64 = 0x4000_0000_0000_0000;
const KIND_LOCAL: u64 = 0x8000_0000_0000_0000;

/// A signed duration in 100ns ticks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeSpan {
    ticks: i64,
}

impl TimeSpan {
    /// Create a duration from a tick count
    #[must_use]
    pub fn from_ticks(ticks: i64) -> Self {
        TimeSpan { ticks }
    }

    /// The tick count
    #[must_use]
    pub fn ticks(&self) -> i64 {
        self.ticks
    }

    /// Convert to a `chrono` duration
    #[must_use]
    pub fn to_duration(&self) -> TimeDelta {
        TimeDelta::microseconds(self.ticks / 10) + TimeDelta::nanoseconds((self.ticks % 10) * 100)
    }
}

impl fmt::Display for TimeSpan {
    /// Renders `[-][d.]hh:mm:ss[.fffffff]`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magnitude = self.ticks.unsigned_abs();
        if self.ticks < 0 {
            f.write_str("-")?;
        }

        let days = magnitude / TICKS_PER_DAY;
        let hours = magnitude % TICKS_PER_DAY / TICKS_PER_HOUR;
        let minutes = magnitude % TICKS_PER_HOUR / TICKS_PER_MINUTE;
        let seconds = magnitude % TICKS_PER_MINUTE / TICKS_PER_SECOND as u64;
        let fraction = magnitude % TICKS_PER_SECOND as u64;

        if days > 0 {
            write!(f, "{days}.")?;
        }
        write!(f, "{hours:02}:{minutes:02}:{seconds:02}")?;
        if fraction > 0 {
            write!(f, ".{fraction:07}")?;
        }
        Ok(())
    }
}

/// Interpretation of a timestamp's tick count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
pub enum DateTimeKind {
    /// No time zone attached
    #[default]
    Unspecified,
    /// Coordinated universal time
    Utc,
    /// Local time of the target machine
    Local,
}

/// A point in time as stored by the runtime: 62-bit tick count plus [`DateTimeKind`].
///
/// # Examples
///
/// ```rust
/// use heapscope::decoder::{DateTimeKind, Timestamp};
///
/// // 2000-01-01T00:00:00Z
/// let stamp = Timestamp::from_raw(630_822_816_000_000_000 | 0x4000_0000_0000_0000);
/// assert_eq!(stamp.kind(), DateTimeKind::Utc);
/// assert_eq!(stamp.to_string(), "2000-01-01 00:00:00 (Utc)");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    ticks: u64,
    kind: DateTimeKind,
}

impl Timestamp {
    /// Create a timestamp; ticks beyond 62 bits are masked off
    #[must_use]
    pub fn new(ticks: u64, kind: DateTimeKind) -> Self {
        Timestamp {
            ticks: ticks & TICKS_MASK,
            kind,
        }
    }

    /// Unpack the stored 64-bit representation
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        let kind = match raw & KIND_MASK {
            KIND_UNSPECIFIED => DateTimeKind::Unspecified,
            KIND_UTC => DateTimeKind::Utc,
            _ => DateTimeKind::Local,
        };

        Timestamp {
            ticks: raw & TICKS_MASK,
            kind,
        }
    }

    /// Pack into the stored 64-bit representation
    #[must_use]
    pub fn to_raw(&self) -> u64 {
        let kind = match self.kind {
            DateTimeKind::Unspecified => KIND_UNSPECIFIED,
            DateTimeKind::Utc => KIND_UTC,
            DateTimeKind::Local => KIND_LOCAL,
        };
        self.ticks | kind
    }

    /// Ticks since `0001-01-01 00:00:00`
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// The time zone interpretation
    #[must_use]
    pub fn kind(&self) -> DateTimeKind {
        self.kind
    }

    /// Calendar date and time, `None` if the tick count is outside the supported range
    #[must_use]
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        let seconds = i64::try_from(self.ticks / TICKS_PER_SECOND as u64).ok()?;
        let nanos = (self.ticks % TICKS_PER_SECOND as u64) * 100;

        epoch()?
            .checked_add_signed(TimeDelta::try_seconds(seconds)?)?
            .checked_add_signed(TimeDelta::nanoseconds(i64::try_from(nanos).ok()?))
    }

    /// Build a timestamp from a calendar date and time.
    ///
    /// Returns `None` for dates before `0001-01-01` or after `9999-12-31 23:59:59.9999999`.
    #[must_use]
    pub fn from_naive(value: NaiveDateTime, kind: DateTimeKind) -> Option<Self> {
        let delta = value.signed_duration_since(epoch()?);
        let seconds = u64::try_from(delta.num_seconds()).ok()?;
        let sub_ticks = u64::from(delta.subsec_nanos().unsigned_abs()) / 100;

        let ticks = seconds
            .checked_mul(TICKS_PER_SECOND as u64)?
            .checked_add(sub_ticks)
            .filter(|ticks| *ticks <= MAX_TICKS)?;
        Some(Timestamp::new(ticks, kind))
    }
}

fn epoch() -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(1, 1, 1)?.and_hms_opt(0, 0, 0)
}

impl fmt::Display for Timestamp {
    /// Renders `yyyy-MM-dd HH:mm:ss[.fffffff] (Kind)` with trailing fraction zeros removed
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(value) = self.to_naive() else {
            return write!(f, "{} ticks ({})", self.ticks, self.kind);
        };

        write!(f, "{}", value.format("%Y-%m-%d %H:%M:%S"))?;

        let fraction = self.ticks % TICKS_PER_SECOND as u64;
        if fraction > 0 {
            let digits = format!("{fraction:07}");
            write!(f, ".{}", digits.trim_end_matches('0'))?;
        }

        write!(f, " ({})", self.kind)
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    const Y2K: u64 = 630_822_816_000_000_000;

    #[test]
    fn kind_tags() {
        assert_eq!(Timestamp::from_raw(Y2K).kind(), DateTimeKind::Unspecified);
        assert_eq!(Timestamp::from_raw(Y2K | KIND_UTC).kind(), DateTimeKind::Utc);
        assert_eq!(Timestamp::from_raw(Y2K | KIND_LOCAL).kind(), DateTimeKind::Local);
        assert_eq!(Timestamp::from_raw(Y2K | KIND_MASK).kind(), DateTimeKind::Local);
        assert_eq!(Timestamp::from_raw(Y2K | KIND_MASK).ticks(), Y2K);
    }

    #[test]
    fn raw_roundtrip_all_kinds() {
        for kind in DateTimeKind::iter() {
            for ticks in [0, 1, Y2K, TICKS_MASK] {
                let stamp = Timestamp::new(ticks, kind);
                let decoded = Timestamp::from_raw(stamp.to_raw());
                assert_eq!(decoded.ticks(), ticks);
                assert_eq!(decoded.kind(), kind);
            }
        }
    }

    #[test]
    fn render() {
        assert_eq!(
            Timestamp::from_raw(Y2K | KIND_UTC).to_string(),
            "2000-01-01 00:00:00 (Utc)"
        );
        assert_eq!(
            Timestamp::new(Y2K + 1_230_000, DateTimeKind::Local).to_string(),
            "2000-01-01 00:00:00.123 (Local)"
        );
        assert_eq!(
            Timestamp::new(Y2K + 1, DateTimeKind::Unspecified).to_string(),
            "2000-01-01 00:00:00.0000001 (Unspecified)"
        );
    }

    #[test]
    fn naive_roundtrip() {
        let value = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_nano_opt(13, 14, 15, 123_456_700)
            .unwrap();
        let stamp = Timestamp::from_naive(value, DateTimeKind::Utc).unwrap();
        assert_eq!(stamp.to_naive(), Some(value));
        assert_eq!(stamp.to_string(), "2024-02-29 13:14:15.1234567 (Utc)");
    }

    #[test]
    fn naive_range_is_bounded() {
        let last = NaiveDate::from_ymd_opt(9999, 12, 31)
            .unwrap()
            .and_hms_nano_opt(23, 59, 59, 999_999_900)
            .unwrap();
        let stamp = Timestamp::from_naive(last, DateTimeKind::Unspecified).unwrap();
        assert_eq!(stamp.ticks(), MAX_TICKS);
        assert_eq!(stamp.to_naive(), Some(last));

        let next = NaiveDate::from_ymd_opt(10000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(Timestamp::from_naive(next, DateTimeKind::Utc), None);

        let far = NaiveDate::from_ymd_opt(200_000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(Timestamp::from_naive(far, DateTimeKind::Utc), None);

        let before = NaiveDate::from_ymd_opt(0, 12, 31)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();
        assert_eq!(Timestamp::from_naive(before, DateTimeKind::Local), None);
    }

    #[test]
    fn timespan_render() {
        assert_eq!(TimeSpan::from_ticks(0).to_string(), "00:00:00");
        assert_eq!(
            TimeSpan::from_ticks(90 * TICKS_PER_SECOND).to_string(),
            "00:01:30"
        );
        let long = (26 * 3600 + 5) * TICKS_PER_SECOND + 5;
        assert_eq!(TimeSpan::from_ticks(long).to_string(), "1.02:00:05.0000005");
        assert_eq!(
            TimeSpan::from_ticks(-TICKS_PER_SECOND / 2).to_string(),
            "-00:00:00.5000000"
        );
        assert_eq!(TimeSpan::from_ticks(i64::MIN).ticks(), i64::MIN);
    }

    #[test]
    fn timespan_duration() {
        let span = TimeSpan::from_ticks(15);
        assert_eq!(span.to_duration(), TimeDelta::nanoseconds(1500));
    }
}

use anyhow::{anyhow, Result};
use chrono::{Datelike, LocalResult, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;

pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Local calendar used to bucket pings per day.
///
/// Every day boundary the engine uses (day keys, "today", whole days elapsed)
/// is computed in one IANA zone so results do not depend on the host clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalCalendar {
    tz: Tz,
}

impl Default for LocalCalendar {
    fn default() -> Self {
        Self { tz: Tz::UTC }
    }
}

impl LocalCalendar {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        let tz: Tz = name
            .trim()
            .parse()
            .map_err(|e| anyhow!("unknown timezone '{}': {}", name, e))?;
        Ok(Self { tz })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn local_date(&self, epoch_ms: i64) -> Option<NaiveDate> {
        match self.tz.timestamp_millis_opt(epoch_ms) {
            LocalResult::Single(dt) => Some(dt.date_naive()),
            _ => None,
        }
    }

    /// `YYYY-MM-DD` in local time.
    pub fn day_key(&self, epoch_ms: i64) -> Option<String> {
        self.local_date(epoch_ms)
            .map(|d| format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day()))
    }

    /// Half-open `[start, end)` bounds in epoch ms of the local day containing
    /// `epoch_ms`.
    pub fn day_bounds(&self, epoch_ms: i64) -> Option<(i64, i64)> {
        let date = self.local_date(epoch_ms)?;
        let start = self.local_midnight_ms(date)?;
        let end = self.local_midnight_ms(date.succ_opt()?)?;
        Some((start, end))
    }

    /// Whole local calendar days from `from_ms` to `to_ms`, clamped at zero.
    pub fn whole_days_between(&self, from_ms: i64, to_ms: i64) -> Option<i64> {
        let from = self.local_date(from_ms)?;
        let to = self.local_date(to_ms)?;
        Some((to - from).num_days().max(0))
    }

    /// Interpret a wall-clock datetime in this zone. Ambiguous times (DST
    /// fold) resolve to the earlier instant; skipped times are absent.
    pub fn local_to_epoch_ms(&self, naive: &NaiveDateTime) -> Option<i64> {
        match self.tz.from_local_datetime(naive) {
            LocalResult::Single(dt) => Some(dt.timestamp_millis()),
            LocalResult::Ambiguous(earliest, _) => Some(earliest.timestamp_millis()),
            LocalResult::None => None,
        }
    }

    fn local_midnight_ms(&self, date: NaiveDate) -> Option<i64> {
        let midnight = date.and_hms_opt(0, 0, 0)?;
        self.local_to_epoch_ms(&midnight).or_else(|| {
            // Zones that skip midnight on DST change start the day at 01:00.
            self.local_to_epoch_ms(&date.and_hms_opt(1, 0, 0)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-03-09T12:00:00Z
    const NOON_UTC: i64 = 1_709_985_600_000;

    #[test]
    fn day_key_follows_zone() -> Result<()> {
        let utc = LocalCalendar::default();
        assert_eq!(utc.day_key(NOON_UTC).as_deref(), Some("2024-03-09"));

        let tokyo = LocalCalendar::from_name("Asia/Tokyo")?;
        // 21:00 local, same day
        assert_eq!(tokyo.day_key(NOON_UTC).as_deref(), Some("2024-03-09"));
        let la = LocalCalendar::from_name("America/Los_Angeles")?;
        // 04:00 local
        assert_eq!(la.day_key(NOON_UTC).as_deref(), Some("2024-03-09"));
        assert_eq!(
            la.day_key(NOON_UTC - 5 * 60 * 60 * 1000).as_deref(),
            Some("2024-03-08")
        );
        Ok(())
    }

    #[test]
    fn day_bounds_span_dst_change() -> Result<()> {
        let la = LocalCalendar::from_name("America/Los_Angeles")?;
        // 2024-03-10 is 23 hours long in Los Angeles.
        let (start, end) = la
            .day_bounds(NOON_UTC + 24 * 60 * 60 * 1000)
            .expect("bounds");
        assert_eq!(end - start, 23 * 60 * 60 * 1000);
        Ok(())
    }

    #[test]
    fn whole_days_never_negative() {
        let utc = LocalCalendar::default();
        let day = 24 * 60 * 60 * 1000;
        assert_eq!(utc.whole_days_between(NOON_UTC, NOON_UTC + 3 * day), Some(3));
        assert_eq!(utc.whole_days_between(NOON_UTC + 3 * day, NOON_UTC), Some(0));
        // 23:59 to 00:01 crosses a calendar day.
        let late = NOON_UTC + 12 * 60 * 60 * 1000 - 60 * 1000;
        assert_eq!(utc.whole_days_between(late, late + 2 * 60 * 1000), Some(1));
    }

    #[test]
    fn unknown_zone_is_an_error() {
        assert!(LocalCalendar::from_name("Mars/Olympus_Mons").is_err());
    }
}

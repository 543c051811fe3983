//! Winner serial resolution.
//!
//! Decides which of a vehicle's serials is authoritative "now". A reading
//! today is the strongest evidence of which device is currently installed;
//! otherwise the operator's configured serial is kept unless another serial
//! is fresher by more than the sticky window.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::calendar::LocalCalendar;
use crate::ingest::PingRecord;
use crate::policy::ReconcilePolicy;
use crate::serial::{normalize_serial, SerialExclusion};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialRecencyStats {
    pub serial: String,
    /// Latest calendar instant; `None` when the serial only has ordinal or
    /// unknown times.
    pub latest_ms: Option<i64>,
    pub has_reading_today: bool,
    pub has_recent_reading: bool,
    pub pings: usize,
}

/// Which rule picked the winner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinnerReason {
    /// No records; configured serial returned untouched.
    EmptyBatch,
    ConfiguredReadToday,
    /// Another serial read today and the configured one did not.
    OtherReadToday,
    /// Configured serial is recent and within the sticky window of the freshest.
    StickyConfigured,
    FreshestOverall,
    /// Every candidate was excluded; picked among excluded serials.
    LastResort,
    /// Records carried no serial at all.
    Unresolved,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerDecision {
    pub serial: String,
    pub reason: WinnerReason,
}

impl WinnerDecision {
    fn new(serial: &str, reason: WinnerReason) -> Self {
        Self {
            serial: serial.to_string(),
            reason,
        }
    }
}

/// Per-serial recency over the batch. Excluded and empty serials are skipped.
pub fn recency_stats(
    records: &[PingRecord],
    now_ms: i64,
    policy: &ReconcilePolicy,
    calendar: &LocalCalendar,
    exclusion: &dyn SerialExclusion,
) -> BTreeMap<String, SerialRecencyStats> {
    let today = calendar.day_bounds(now_ms);
    let recent_window_start = now_ms.saturating_sub(policy.recent_window_ms);

    let mut stats: BTreeMap<String, SerialRecencyStats> = BTreeMap::new();
    for record in records {
        if record.serial.is_empty() || exclusion.is_excluded(&record.serial) {
            continue;
        }
        let entry = stats
            .entry(record.serial.clone())
            .or_insert_with(|| SerialRecencyStats {
                serial: record.serial.clone(),
                latest_ms: None,
                has_reading_today: false,
                has_recent_reading: false,
                pings: 0,
            });
        entry.pings += 1;
        if let Some(ms) = record.time.instant_ms() {
            entry.latest_ms = Some(entry.latest_ms.map_or(ms, |latest| latest.max(ms)));
            if let Some((start, end)) = today {
                entry.has_reading_today |= ms >= start && ms < end;
            }
            entry.has_recent_reading |= ms >= recent_window_start;
        }
    }
    stats
}

/// Latest serial among `candidates`; ties go to the lexically smallest serial.
/// Serials without any instant rank below every serial that has one.
fn freshest<'a, I>(candidates: I) -> Option<&'a SerialRecencyStats>
where
    I: IntoIterator<Item = &'a SerialRecencyStats>,
{
    candidates.into_iter().fold(None, |best, s| match best {
        Some(b) if b.latest_ms >= s.latest_ms => Some(b),
        _ => Some(s),
    })
}

pub fn resolve_winner(
    configured_winner: &str,
    records: &[PingRecord],
    now_ms: i64,
    policy: &ReconcilePolicy,
    calendar: &LocalCalendar,
    exclusion: &dyn SerialExclusion,
) -> WinnerDecision {
    let configured = normalize_serial(configured_winner);
    if records.is_empty() {
        return WinnerDecision::new(configured_winner, WinnerReason::EmptyBatch);
    }

    let stats = recency_stats(records, now_ms, policy, calendar, exclusion);
    let freshest_today = freshest(stats.values().filter(|s| s.has_reading_today));
    let freshest_overall = freshest(stats.values());
    let configured_stats = stats.get(&configured);

    let decision = if configured_stats.is_some_and(|c| c.has_reading_today) {
        WinnerDecision::new(&configured, WinnerReason::ConfiguredReadToday)
    } else if let Some(today) = freshest_today {
        WinnerDecision::new(&today.serial, WinnerReason::OtherReadToday)
    } else if let Some(c) = configured_stats.filter(|c| {
        c.has_recent_reading && within_sticky_window(freshest_overall, c, policy)
    }) {
        WinnerDecision::new(&c.serial, WinnerReason::StickyConfigured)
    } else if let Some(overall) = freshest_overall {
        WinnerDecision::new(&overall.serial, WinnerReason::FreshestOverall)
    } else {
        last_resort(configured_winner, records)
    };

    log::debug!(
        "winner {} ({:?}) from {} candidate serials, configured {:?}",
        decision.serial,
        decision.reason,
        stats.len(),
        configured
    );
    decision
}

fn within_sticky_window(
    freshest: Option<&SerialRecencyStats>,
    configured: &SerialRecencyStats,
    policy: &ReconcilePolicy,
) -> bool {
    match (freshest.and_then(|f| f.latest_ms), configured.latest_ms) {
        (Some(freshest_ms), Some(configured_ms)) => {
            freshest_ms.saturating_sub(configured_ms) <= policy.sticky_window_ms
        }
        _ => true,
    }
}

/// All serials were excluded: take the freshest one anyway.
fn last_resort(configured_winner: &str, records: &[PingRecord]) -> WinnerDecision {
    let best = records
        .iter()
        .filter(|r| !r.serial.is_empty())
        .fold(None::<&PingRecord>, |best, r| match best {
            Some(b)
                if b.time.sort_key() > r.time.sort_key()
                    || (b.time.sort_key() == r.time.sort_key() && b.serial <= r.serial) =>
            {
                Some(b)
            }
            _ => Some(r),
        });
    match best {
        Some(record) => WinnerDecision::new(&record.serial, WinnerReason::LastResort),
        None => WinnerDecision::new(configured_winner, WinnerReason::Unresolved),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::PingTime;
    use crate::policy::{MS_PER_DAY, MS_PER_HOUR, MS_PER_MINUTE};
    use crate::serial::{Blacklist, NoExclusion};

    // 2024-03-09T12:00:00Z
    const NOW: i64 = 1_709_985_600_000;
    // 2024-03-09T00:05:00Z, just after midnight
    const JUST_AFTER_MIDNIGHT: i64 = NOW - 12 * MS_PER_HOUR + 5 * MS_PER_MINUTE;

    fn ping(index: usize, serial: &str, ms: i64) -> PingRecord {
        PingRecord {
            index,
            record_id: None,
            serial: serial.to_string(),
            time: PingTime::Instant(ms),
            lat: Some(0.0),
            lng: Some(0.0),
        }
    }

    fn resolve(configured: &str, records: &[PingRecord], now: i64) -> WinnerDecision {
        resolve_winner(
            configured,
            records,
            now,
            &ReconcilePolicy::default(),
            &LocalCalendar::default(),
            &NoExclusion,
        )
    }

    #[test]
    fn empty_batch_keeps_configured() {
        let decision = resolve("s1", &[], NOW);
        assert_eq!(decision.serial, "s1");
        assert_eq!(decision.reason, WinnerReason::EmptyBatch);
    }

    #[test]
    fn configured_with_reading_today_is_kept() {
        let records = vec![ping(0, "S1", NOW - MS_PER_HOUR), ping(1, "S2", NOW - 60_000)];
        let decision = resolve("s1", &records, NOW);
        assert_eq!(decision.serial, "S1");
        assert_eq!(decision.reason, WinnerReason::ConfiguredReadToday);
    }

    #[test]
    fn today_reading_dominates_history() {
        let records = vec![
            ping(0, "S1", NOW - 13 * MS_PER_HOUR),
            ping(1, "S1", NOW - 2 * MS_PER_DAY),
            ping(2, "S2", NOW - 11 * MS_PER_HOUR),
        ];
        let decision = resolve("S1", &records, NOW);
        assert_eq!(decision.serial, "S2");
        assert_eq!(decision.reason, WinnerReason::OtherReadToday);
    }

    #[test]
    fn sticky_window_prevents_flapping() {
        let records = vec![
            ping(0, "S1", JUST_AFTER_MIDNIGHT - 30 * MS_PER_MINUTE),
            ping(1, "S2", JUST_AFTER_MIDNIGHT - 10 * MS_PER_MINUTE),
        ];
        let decision = resolve("S1", &records, JUST_AFTER_MIDNIGHT);
        assert_eq!(decision.serial, "S1");
        assert_eq!(decision.reason, WinnerReason::StickyConfigured);
    }

    #[test]
    fn fresher_beyond_sticky_window_switches() {
        let records = vec![
            ping(0, "S1", NOW - 3 * MS_PER_DAY),
            ping(1, "S2", NOW - 3 * MS_PER_DAY + 2 * MS_PER_HOUR + 1),
        ];
        let decision = resolve("S1", &records, NOW);
        assert_eq!(decision.serial, "S2");
        assert_eq!(decision.reason, WinnerReason::FreshestOverall);

        let records = vec![
            ping(0, "S1", NOW - 3 * MS_PER_DAY),
            ping(1, "S2", NOW - 3 * MS_PER_DAY + 2 * MS_PER_HOUR),
        ];
        assert_eq!(resolve("S1", &records, NOW).serial, "S1");
    }

    #[test]
    fn stale_configured_loses_to_freshest() {
        let records = vec![
            ping(0, "S1", NOW - 20 * MS_PER_DAY),
            ping(1, "S2", NOW - 20 * MS_PER_DAY + 60_000),
        ];
        let decision = resolve("S1", &records, NOW);
        assert_eq!(decision.serial, "S2");
        assert_eq!(decision.reason, WinnerReason::FreshestOverall);
    }

    #[test]
    fn unset_configured_takes_freshest() {
        let records = vec![ping(0, "S1", NOW - 5 * MS_PER_DAY), ping(1, "S2", NOW - 4 * MS_PER_DAY)];
        assert_eq!(resolve("", &records, NOW).serial, "S2");
    }

    #[test]
    fn excluded_serials_are_skipped_until_last_resort() {
        let records = vec![ping(0, "S1", NOW - MS_PER_HOUR), ping(1, "S2", NOW - 5 * MS_PER_DAY)];
        let blacklist = Blacklist::new(["s1"]);
        let decision = resolve_winner(
            "S1",
            &records,
            NOW,
            &ReconcilePolicy::default(),
            &LocalCalendar::default(),
            &blacklist,
        );
        assert_eq!(decision.serial, "S2");

        let everyone = Blacklist::new(["S1", "S2"]);
        let decision = resolve_winner(
            "",
            &records,
            NOW,
            &ReconcilePolicy::default(),
            &LocalCalendar::default(),
            &everyone,
        );
        assert_eq!(decision.serial, "S1");
        assert_eq!(decision.reason, WinnerReason::LastResort);
    }

    #[test]
    fn serialless_batch_is_unresolved() {
        let records = vec![ping(0, "", NOW)];
        let decision = resolve("", &records, NOW);
        assert_eq!(decision.serial, "");
        assert_eq!(decision.reason, WinnerReason::Unresolved);
    }

    #[test]
    fn ties_break_on_serial() {
        let records = vec![ping(0, "S2", NOW - MS_PER_HOUR), ping(1, "S1", NOW - MS_PER_HOUR)];
        assert_eq!(resolve("", &records, NOW).serial, "S1");
    }

    #[test]
    fn stats_track_today_and_recent_windows() {
        let records = vec![
            ping(0, "S1", NOW - 13 * MS_PER_HOUR),
            ping(1, "S2", NOW - 15 * MS_PER_DAY),
            ping(2, "S1", NOW - MS_PER_HOUR),
        ];
        let stats = recency_stats(
            &records,
            NOW,
            &ReconcilePolicy::default(),
            &LocalCalendar::default(),
            &NoExclusion,
        );
        let s1 = &stats["S1"];
        assert!(s1.has_reading_today);
        assert!(s1.has_recent_reading);
        assert_eq!(s1.latest_ms, Some(NOW - MS_PER_HOUR));
        assert_eq!(s1.pings, 2);
        let s2 = &stats["S2"];
        assert!(!s2.has_reading_today);
        assert!(!s2.has_recent_reading);
    }

    #[test]
    fn record_ids_never_outrank_timestamps() {
        // A serial whose rows only carry an id that happens to exceed every
        // epoch value in the batch.
        let mut id_only = ping(1, "S2", 0);
        id_only.time = PingTime::Ordinal(1_800_000_000_000);
        let records = vec![ping(0, "S1", NOW - 3 * MS_PER_DAY), id_only];

        let decision = resolve("", &records, NOW);
        assert_eq!(decision.serial, "S1");
        assert_eq!(decision.reason, WinnerReason::FreshestOverall);

        let stats = recency_stats(
            &records,
            NOW,
            &ReconcilePolicy::default(),
            &LocalCalendar::default(),
            &NoExclusion,
        );
        assert_eq!(stats["S2"].latest_ms, None);
        assert!(!stats["S2"].has_recent_reading);

        // Configured on the id-only serial: it has no recent reading, so the
        // timestamped serial still wins.
        assert_eq!(resolve("S2", &records, NOW).serial, "S1");
    }

    #[test]
    fn id_only_serials_still_resolve_among_themselves() {
        let mut a = ping(0, "S1", 0);
        a.time = PingTime::Ordinal(10);
        let mut b = ping(1, "S2", 0);
        b.time = PingTime::Ordinal(20);
        let decision = resolve("", &[a, b], NOW);
        assert_eq!(decision.serial, "S1");
        assert_eq!(decision.reason, WinnerReason::FreshestOverall);
    }
}

//! Movement classification.
//!
//! Two views of the same pings:
//! - a per-record overlay (`Moving`/`Parked` plus days spent in the current
//!   stationary cluster) built by a single pass over one serial's pings
//! - a coarse per-(serial, day) verdict used by tamper correlation

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::calendar::LocalCalendar;
use crate::geo::ping_distance;
use crate::ingest::PingRecord;
use crate::policy::ReconcilePolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovedTag {
    Moving,
    Parked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayVerdict {
    Moving,
    Stopped,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MovementOverlay {
    /// Input batch position of the record this overlay decorates.
    pub index: usize,
    pub moved: MovedTag,
    /// Whole local days since the current cluster began; `None` when either
    /// end has no calendar instant.
    pub days_stationary: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DayMovement {
    pub verdict: DayVerdict,
    pub fixes: usize,
    pub max_segment_m: f64,
    pub path_m: f64,
    pub net_m: f64,
}

/// Records sharing a serial and a local calendar day.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SerialDayKey {
    pub serial: String,
    pub day: String,
}

/// Bucket records by `(serial, local day)`. Records without a serial or a
/// calendar instant belong to no day.
pub fn group_serial_days<'a>(
    records: &'a [PingRecord],
    calendar: &LocalCalendar,
) -> BTreeMap<SerialDayKey, Vec<&'a PingRecord>> {
    let mut groups: BTreeMap<SerialDayKey, Vec<&PingRecord>> = BTreeMap::new();
    for record in records {
        if record.serial.is_empty() {
            continue;
        }
        let Some(day) = record.time.instant_ms().and_then(|ms| calendar.day_key(ms)) else {
            continue;
        };
        groups
            .entry(SerialDayKey {
                serial: record.serial.clone(),
                day,
            })
            .or_default()
            .push(record);
    }
    for points in groups.values_mut() {
        points.sort_by(|a, b| PingRecord::chronological(a, b));
    }
    groups
}

/// Single-pass stationary-cluster detection over one serial's pings.
///
/// Each ping is compared with the most recent earlier ping that has a fix.
/// A hop strictly longer than the cluster radius starts a new cluster; pings
/// without a fix never do. Output is in chronological order.
pub fn cluster_overlays(
    points: &[&PingRecord],
    policy: &ReconcilePolicy,
    calendar: &LocalCalendar,
) -> Vec<MovementOverlay> {
    let mut ordered: Vec<&PingRecord> = points.to_vec();
    ordered.sort_by(|a, b| PingRecord::chronological(a, b));

    let mut overlays = Vec::with_capacity(ordered.len());
    let mut anchor: Option<&PingRecord> = None;
    let mut cluster_start_ms: Option<i64> = None;

    for (i, point) in ordered.iter().copied().enumerate() {
        let point_ms = point.time.instant_ms();
        let left_cluster = i > 0
            && anchor
                .map(|prev| ping_distance(prev, point))
                .map(|d| d.is_finite() && d > policy.cluster_radius_m)
                .unwrap_or(false);

        let moved = if left_cluster {
            cluster_start_ms = point_ms;
            MovedTag::Moving
        } else {
            if cluster_start_ms.is_none() {
                cluster_start_ms = point_ms;
            }
            MovedTag::Parked
        };

        let days_stationary = match (cluster_start_ms, point_ms) {
            (Some(start), Some(now)) => calendar.whole_days_between(start, now),
            _ => None,
        };

        overlays.push(MovementOverlay {
            index: point.index,
            moved,
            days_stationary,
        });

        if point.has_coords() {
            anchor = Some(point);
        }
    }
    overlays
}

/// Overlays for every record of the batch, one per record, in input order.
/// Each serial (the empty serial included) is clustered on its own.
pub fn batch_overlays(
    records: &[PingRecord],
    policy: &ReconcilePolicy,
    calendar: &LocalCalendar,
) -> Vec<MovementOverlay> {
    let mut by_serial: BTreeMap<&str, Vec<&PingRecord>> = BTreeMap::new();
    for record in records {
        by_serial.entry(record.serial.as_str()).or_default().push(record);
    }
    let mut overlays: Vec<MovementOverlay> = by_serial
        .values()
        .flat_map(|points| cluster_overlays(points, policy, calendar))
        .collect();
    overlays.sort_by_key(|overlay| overlay.index);
    overlays
}

/// Coarse verdict for one serial's pings on one day.
pub fn day_movement(points: &[&PingRecord], policy: &ReconcilePolicy) -> DayMovement {
    let mut fixed: Vec<&PingRecord> = points.iter().copied().filter(|p| p.has_coords()).collect();
    fixed.sort_by(|a, b| PingRecord::chronological(a, b));

    if fixed.len() < 2 {
        return unknown_day(fixed.len());
    }

    let mut max_segment_m: f64 = 0.0;
    let mut path_m = 0.0;
    for pair in fixed.windows(2) {
        let d = ping_distance(pair[0], pair[1]);
        max_segment_m = max_segment_m.max(d);
        path_m += d;
    }
    let net_m = ping_distance(fixed[0], fixed[fixed.len() - 1]);

    let radius = policy.cluster_radius_m;
    let verdict = if max_segment_m > radius
        || net_m > radius
        || path_m > policy.cumulative_threshold_m()
    {
        DayVerdict::Moving
    } else {
        DayVerdict::Stopped
    };

    DayMovement {
        verdict,
        fixes: fixed.len(),
        max_segment_m,
        path_m,
        net_m,
    }
}

fn unknown_day(fixes: usize) -> DayMovement {
    DayMovement {
        verdict: DayVerdict::Unknown,
        fixes,
        max_segment_m: 0.0,
        path_m: 0.0,
        net_m: 0.0,
    }
}

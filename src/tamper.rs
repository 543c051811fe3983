//! Cross-device tamper correlation.
//!
//! A hard-wired tracker that reports motion on a given day means the vehicle
//! physically moved. A battery tracker on the same vehicle that reports no
//! motion that day has likely been removed, disabled, or is masking its
//! state, and is flagged.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::calendar::LocalCalendar;
use crate::ingest::PingRecord;
use crate::movement::{day_movement, group_serial_days, DayMovement, DayVerdict};
use crate::policy::ReconcilePolicy;
use crate::serial::{SerialClass, SerialExclusion};

/// Movement verdict for one serial on one local day.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerialDayVerdict {
    pub serial: String,
    pub day: String,
    pub class: Option<SerialClass>,
    #[serde(flatten)]
    pub movement: DayMovement,
}

/// Day verdicts for every `(serial, day)` in the batch, ordered by serial
/// then day.
pub fn day_verdicts(
    records: &[PingRecord],
    policy: &ReconcilePolicy,
    calendar: &LocalCalendar,
) -> Vec<SerialDayVerdict> {
    group_serial_days(records, calendar)
        .into_iter()
        .map(|(key, points)| SerialDayVerdict {
            class: policy.serials.classify(&key.serial),
            movement: day_movement(&points, policy),
            serial: key.serial,
            day: key.day,
        })
        .collect()
}

/// Wireless serials that were stopped on a day some wired serial moved.
pub fn alarmed_serials(
    verdicts: &[SerialDayVerdict],
    exclusion: &dyn SerialExclusion,
) -> BTreeSet<String> {
    let mut by_day: BTreeMap<&str, Vec<&SerialDayVerdict>> = BTreeMap::new();
    for verdict in verdicts {
        by_day.entry(verdict.day.as_str()).or_default().push(verdict);
    }

    let mut alarmed = BTreeSet::new();
    for (day, serials) in by_day {
        let wired_moving = serials.iter().any(|v| {
            v.class == Some(SerialClass::Wired) && v.movement.verdict == DayVerdict::Moving
        });
        if !wired_moving {
            continue;
        }
        for v in serials {
            if v.class == Some(SerialClass::Wireless)
                && v.movement.verdict == DayVerdict::Stopped
                && !exclusion.is_excluded(&v.serial)
                && alarmed.insert(v.serial.clone())
            {
                log::info!("serial {} stopped on {} while a wired serial moved", v.serial, day);
            }
        }
    }
    alarmed
}

pub fn detect_tamper(
    records: &[PingRecord],
    policy: &ReconcilePolicy,
    calendar: &LocalCalendar,
    exclusion: &dyn SerialExclusion,
) -> BTreeSet<String> {
    alarmed_serials(&day_verdicts(records, policy, calendar), exclusion)
}

//! The reconciliation pipeline: normalize a vehicle's raw pings, then resolve
//! the winner serial, overlay movement, and correlate tamper candidates.
//!
//! `Reconciler` holds only immutable settings. Each call rebuilds every
//! derived structure from its input, so calls for different vehicles can run
//! concurrently and identical inputs produce identical reports.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::calendar::LocalCalendar;
use crate::config::ReconcileConfig;
use crate::ingest::{normalize_records, PingRecord, RawRecord};
use crate::movement::{batch_overlays, MovedTag};
use crate::policy::ReconcilePolicy;
use crate::serial::{Blacklist, SerialClass, SerialExclusion};
use crate::tamper::{alarmed_serials, day_verdicts, SerialDayVerdict};
use crate::vehicle::Vehicle;
use crate::winner::{resolve_winner, WinnerReason};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    /// Presentation shows the winner serial; per-record overlays are built.
    #[default]
    Winner,
    /// Presentation shows every record; no overlays.
    AllRecords,
}

impl std::str::FromStr for ViewMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "winner" => Ok(ViewMode::Winner),
            "all" | "all_records" | "all-records" => Ok(ViewMode::AllRecords),
            other => Err(anyhow::anyhow!("unknown view mode '{}' (winner|all)", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordOverlay {
    pub record_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub serial: String,
    pub derived_moved: MovedTag,
    pub derived_days_stationary: Option<i64>,
}

/// Per-serial summary used by presentation layers to group records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSection {
    pub serial: String,
    pub class: Option<SerialClass>,
    pub pings: usize,
    /// Latest calendar instant; `None` when the serial only has ordinal or
    /// unknown times.
    pub latest_ms: Option<i64>,
    pub is_winner: bool,
    pub is_alarmed: bool,
    pub is_excluded: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub vin: String,
    pub now_ms: i64,
    pub view: ViewMode,
    pub winner_serial: String,
    pub winner_reason: WinnerReason,
    pub record_overlays: Vec<RecordOverlay>,
    pub alarmed_serials: BTreeSet<String>,
    pub serial_sections: Vec<SerialSection>,
    pub day_verdicts: Vec<SerialDayVerdict>,
    /// Hex SHA-256 over the canonical JSON of every other field.
    pub digest: String,
}

impl ReconcileReport {
    fn seal(mut self) -> Result<Self> {
        self.digest = String::new();
        let canonical = serde_json::to_vec(&self)?;
        self.digest = hex::encode(Sha256::digest(&canonical));
        Ok(self)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Reconciler {
    policy: ReconcilePolicy,
    calendar: LocalCalendar,
    blacklist: Blacklist,
}

impl Reconciler {
    pub fn new(policy: ReconcilePolicy, calendar: LocalCalendar) -> Self {
        Self {
            policy,
            calendar,
            blacklist: Blacklist::default(),
        }
    }

    pub fn with_blacklist(mut self, blacklist: Blacklist) -> Self {
        self.blacklist = blacklist;
        self
    }

    pub fn from_config(cfg: &ReconcileConfig) -> Self {
        Self::new(cfg.policy.clone(), cfg.calendar).with_blacklist(cfg.blacklist.clone())
    }

    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    pub fn calendar(&self) -> &LocalCalendar {
        &self.calendar
    }

    pub fn normalize(&self, rows: &[RawRecord]) -> Vec<PingRecord> {
        normalize_records(rows, &self.calendar)
    }

    /// Reconcile raw rows using the configured blacklist.
    pub fn reconcile(
        &self,
        vehicle: &Vehicle,
        rows: &[RawRecord],
        now_ms: i64,
        view: ViewMode,
    ) -> Result<ReconcileReport> {
        let records = self.normalize(rows);
        self.reconcile_records(vehicle, &records, now_ms, view, &self.blacklist)
    }

    /// Reconcile already-normalized records against an arbitrary exclusion
    /// predicate.
    pub fn reconcile_records(
        &self,
        vehicle: &Vehicle,
        records: &[PingRecord],
        now_ms: i64,
        view: ViewMode,
        exclusion: &dyn SerialExclusion,
    ) -> Result<ReconcileReport> {
        let winner = resolve_winner(
            &vehicle.configured_winner_serial,
            records,
            now_ms,
            &self.policy,
            &self.calendar,
            exclusion,
        );
        let verdicts = day_verdicts(records, &self.policy, &self.calendar);
        let alarmed = alarmed_serials(&verdicts, exclusion);

        let record_overlays = match view {
            ViewMode::Winner => {
                let by_index: BTreeMap<usize, &PingRecord> =
                    records.iter().map(|r| (r.index, r)).collect();
                batch_overlays(records, &self.policy, &self.calendar)
                    .into_iter()
                    .filter_map(|overlay| {
                        let record = by_index.get(&overlay.index)?;
                        Some(RecordOverlay {
                            record_index: overlay.index,
                            record_id: record.record_id.clone(),
                            serial: record.serial.clone(),
                            derived_moved: overlay.moved,
                            derived_days_stationary: overlay.days_stationary,
                        })
                    })
                    .collect()
            }
            ViewMode::AllRecords => Vec::new(),
        };

        let serial_sections =
            self.serial_sections(records, &winner.serial, &alarmed, exclusion);

        log::debug!(
            "vehicle {}: {} records, winner {} ({:?}), {} alarmed",
            vehicle.vin,
            records.len(),
            winner.serial,
            winner.reason,
            alarmed.len()
        );

        ReconcileReport {
            vin: vehicle.vin.clone(),
            now_ms,
            view,
            winner_serial: winner.serial,
            winner_reason: winner.reason,
            record_overlays,
            alarmed_serials: alarmed,
            serial_sections,
            day_verdicts: verdicts,
            digest: String::new(),
        }
        .seal()
    }

    fn serial_sections(
        &self,
        records: &[PingRecord],
        winner: &str,
        alarmed: &BTreeSet<String>,
        exclusion: &dyn SerialExclusion,
    ) -> Vec<SerialSection> {
        let mut sections: BTreeMap<&str, SerialSection> = BTreeMap::new();
        for record in records.iter().filter(|r| !r.serial.is_empty()) {
            let section = sections
                .entry(record.serial.as_str())
                .or_insert_with(|| SerialSection {
                    serial: record.serial.clone(),
                    class: self.policy.serials.classify(&record.serial),
                    pings: 0,
                    latest_ms: None,
                    is_winner: record.serial == winner,
                    is_alarmed: alarmed.contains(&record.serial),
                    is_excluded: exclusion.is_excluded(&record.serial),
                });
            section.pings += 1;
            if let Some(ms) = record.time.instant_ms() {
                section.latest_ms = Some(section.latest_ms.map_or(ms, |latest| latest.max(ms)));
            }
        }
        let mut sections: Vec<SerialSection> = sections.into_values().collect();
        sections.sort_by(|a, b| {
            b.is_winner
                .cmp(&a.is_winner)
                .then(b.latest_ms.cmp(&a.latest_ms))
                .then(a.serial.cmp(&b.serial))
        });
        sections
    }
}

//! Fleet GPS telemetry reconciliation.
//!
//! Vehicles may carry more than one GPS tracker ("serial") over their
//! lifetime, and several may report at once. Given one vehicle's batch of raw
//! pings and a reference "now", this crate decides:
//!
//! 1. **Winner serial**: which serial is authoritative for the vehicle now.
//! 2. **Movement overlay**: per-record `Moving`/`Parked` tag and days spent in
//!    the current stationary cluster.
//! 3. **Tamper alarms**: wireless serials that sat still on a day a wired
//!    serial on the same vehicle moved.
//!
//! The engine is a pure function of its inputs. It performs no I/O and keeps
//! no state between calls; the telemetry store and configuration live at the
//! edges.
//!
//! # Module Structure
//!
//! - `ingest`: raw row normalization (`PingRecord`)
//! - `geo`, `calendar`: distance and local-day arithmetic
//! - `movement`, `winner`, `tamper`: the three algorithms
//! - `engine`, `fleet`: the per-vehicle pipeline and fleet runs
//! - `storage`, `config`: telemetry store and runtime settings

pub mod calendar;
pub mod config;
pub mod engine;
pub mod fleet;
pub mod geo;
pub mod ingest;
pub mod movement;
pub mod policy;
pub mod serial;
pub mod storage;
pub mod tamper;
pub mod vehicle;
pub mod winner;

pub use calendar::LocalCalendar;
pub use config::ReconcileConfig;
pub use engine::{ReconcileReport, Reconciler, RecordOverlay, SerialSection, ViewMode};
pub use fleet::{reconcile_fleet, reconcile_fleet_with, reconcile_vehicle, FleetOutcome};
pub use geo::{haversine_distance, ping_distance};
pub use ingest::{normalize_records, PingRecord, PingTime, RawRecord};
pub use movement::{DayMovement, DayVerdict, MovedTag, MovementOverlay};
pub use policy::ReconcilePolicy;
pub use serial::{Blacklist, NoExclusion, SerialClass, SerialClassifier, SerialExclusion};
pub use storage::{InMemoryPingStore, PingPage, PingStore, SqlitePingStore};
pub use tamper::{detect_tamper, SerialDayVerdict};
pub use vehicle::{validate_vin, Vehicle};
pub use winner::{resolve_winner, SerialRecencyStats, WinnerDecision, WinnerReason};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> anyhow::Result<i64> {
    let elapsed = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH)?;
    Ok(i64::try_from(elapsed.as_millis())?)
}

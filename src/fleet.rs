use anyhow::Result;

use crate::engine::{ReconcileReport, Reconciler, ViewMode};
use crate::storage::PingStore;
use crate::vehicle::{normalize_vin, Vehicle};

/// Outcome for one vehicle of a fleet run.
#[derive(Debug)]
pub enum FleetOutcome {
    Reconciled(Box<ReconcileReport>),
    /// Fetching or reconciling failed; the rest of the fleet still runs.
    Failed { vin: String, error: anyhow::Error },
}

impl FleetOutcome {
    pub fn vin(&self) -> &str {
        match self {
            FleetOutcome::Reconciled(report) => &report.vin,
            FleetOutcome::Failed { vin, .. } => vin,
        }
    }
}

/// Fetch and reconcile one vehicle. Vehicles the store only knows from pings
/// get an empty configured winner.
pub fn reconcile_vehicle(
    store: &mut dyn PingStore,
    reconciler: &Reconciler,
    vin: &str,
    page_size: usize,
    now_ms: i64,
    view: ViewMode,
) -> Result<ReconcileReport> {
    let vin = normalize_vin(vin)?;
    let vehicle = match store.vehicle(&vin)? {
        Some(vehicle) => vehicle,
        None => Vehicle::new(&vin, "")?,
    };
    let rows = store.fetch_all(&vin, page_size)?;
    reconciler.reconcile(&vehicle, &rows, now_ms, view)
}

/// Reconcile each vehicle independently, in the order given.
pub fn reconcile_fleet(
    store: &mut dyn PingStore,
    reconciler: &Reconciler,
    vins: &[String],
    page_size: usize,
    now_ms: i64,
    view: ViewMode,
) -> Vec<FleetOutcome> {
    reconcile_fleet_with(store, reconciler, vins, page_size, now_ms, view, &mut |_| {})
}

/// Like `reconcile_fleet`, calling `on_vehicle` after each vehicle finishes.
pub fn reconcile_fleet_with(
    store: &mut dyn PingStore,
    reconciler: &Reconciler,
    vins: &[String],
    page_size: usize,
    now_ms: i64,
    view: ViewMode,
    on_vehicle: &mut dyn FnMut(&FleetOutcome),
) -> Vec<FleetOutcome> {
    let mut outcomes = Vec::with_capacity(vins.len());
    for vin in vins {
        let outcome =
            match reconcile_vehicle(&mut *store, reconciler, vin, page_size, now_ms, view) {
                Ok(report) => FleetOutcome::Reconciled(Box::new(report)),
                Err(error) => {
                    log::warn!("vehicle {} skipped: {}", vin, error);
                    FleetOutcome::Failed {
                        vin: vin.clone(),
                        error,
                    }
                }
            };
        on_vehicle(&outcome);
        outcomes.push(outcome);
    }

    let alarmed = outcomes
        .iter()
        .filter(|o| matches!(o, FleetOutcome::Reconciled(r) if !r.alarmed_serials.is_empty()))
        .count();
    log::info!(
        "reconciled {} vehicles, {} with tamper alarms",
        outcomes.len(),
        alarmed
    );
    outcomes
}

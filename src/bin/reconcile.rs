//! reconcile - winner serial, movement overlay and tamper alarms per vehicle

use anyhow::{anyhow, Result};
use clap::Parser;
use fleet_reconcile::{
    now_ms, reconcile_fleet_with, reconcile_vehicle, Blacklist, FleetOutcome, PingStore,
    RawRecord, ReconcileConfig, Reconciler, SqlitePingStore, Vehicle, ViewMode,
};
use serde::Serialize;
use std::io::IsTerminal;

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the ping database (overrides FLEET_DB_PATH and the config file).
    #[arg(long)]
    db_path: Option<String>,
    /// Vehicle to reconcile.
    #[arg(long, conflicts_with = "all")]
    vin: Option<String>,
    /// Reconcile every vehicle in the store.
    #[arg(long)]
    all: bool,
    /// Reconcile a JSON array of raw rows instead of reading the store.
    #[arg(long, requires = "vin")]
    input: Option<String>,
    /// Configured winner serial for --input runs.
    #[arg(long, default_value = "")]
    configured_winner: String,
    /// Reference time in epoch milliseconds (defaults to the current time).
    #[arg(long)]
    now_ms: Option<i64>,
    /// Which records the overlay covers (winner|all).
    #[arg(long, default_value = "winner")]
    view: String,
    /// Extra comma-separated serials excluded from winner and alarm results.
    #[arg(long)]
    blacklist: Option<String>,
    /// Write the report JSON here instead of stdout.
    #[arg(long)]
    output: Option<String>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

#[derive(Serialize)]
struct FailedVehicle {
    vin: String,
    error: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::from_args(
        &args.ui,
        std::io::stderr().is_terminal(),
        std::io::stdout().is_terminal(),
    );

    let (cfg, reconciler) = {
        let _stage = ui.stage("Load configuration");
        let mut cfg = ReconcileConfig::load()?;
        if let Some(path) = &args.db_path {
            cfg.db_path = path.clone();
        }
        let mut reconciler = Reconciler::from_config(&cfg);
        if let Some(extra) = &args.blacklist {
            let extra = Blacklist::from_csv(extra);
            let merged: Vec<String> = cfg
                .blacklist
                .iter()
                .chain(extra.iter())
                .map(str::to_string)
                .collect();
            reconciler = reconciler.with_blacklist(Blacklist::new(merged));
        }
        (cfg, reconciler)
    };
    let view: ViewMode = args.view.parse()?;
    let now = match args.now_ms {
        Some(now) => now,
        None => now_ms()?,
    };

    let json = if let Some(input) = &args.input {
        let vin = args.vin.as_deref().unwrap_or_default();
        let rows = {
            let mut stage = ui.stage("Read input rows");
            let rows = read_rows(input)?;
            stage.detail(format!("{} rows", rows.len()));
            rows
        };
        let vehicle = Vehicle::new(vin, &args.configured_winner)?;
        let report = {
            let _stage = ui.stage("Reconcile");
            reconciler.reconcile(&vehicle, &rows, now, view)?
        };
        serde_json::to_string_pretty(&report)?
    } else {
        let mut store = {
            let _stage = ui.stage("Open ping store");
            SqlitePingStore::open(&cfg.db_path)?
        };
        if args.all {
            let vins = store.list_vins()?;
            let progress = ui.vehicles(vins.len());
            let outcomes = reconcile_fleet_with(
                &mut store,
                &reconciler,
                &vins,
                cfg.page_size,
                now,
                view,
                &mut |outcome| progress.advance(outcome.vin()),
            );
            let mut reports = Vec::new();
            let mut failed = Vec::new();
            for outcome in outcomes {
                match outcome {
                    FleetOutcome::Reconciled(report) => reports.push(*report),
                    FleetOutcome::Failed { vin, error } => failed.push(FailedVehicle {
                        vin,
                        error: format!("{:#}", error),
                    }),
                }
            }
            progress.finish(&format!(
                "{} reconciled, {} failed",
                reports.len(),
                failed.len()
            ));
            serde_json::to_string_pretty(&serde_json::json!({
                "reports": reports,
                "failed": failed,
            }))?
        } else {
            let vin = args
                .vin
                .as_deref()
                .ok_or_else(|| anyhow!("pass --vin or --all"))?;
            let report = {
                let _stage = ui.stage("Reconcile");
                reconcile_vehicle(&mut store, &reconciler, vin, cfg.page_size, now, view)?
            };
            serde_json::to_string_pretty(&report)?
        }
    };

    match &args.output {
        Some(path) => {
            let _stage = ui.stage("Write report");
            std::fs::write(path, json)
                .map_err(|e| anyhow!("failed to write report {}: {}", path, e))?;
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn read_rows(path: &str) -> Result<Vec<RawRecord>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read input file {}: {}", path, e))?;
    serde_json::from_str(&raw).map_err(|e| anyhow!("input {} is not a JSON array: {}", path, e))
}

//! import_pings - load raw ping rows and vehicle settings into the ping store

use anyhow::{anyhow, Result};
use clap::Parser;
use fleet_reconcile::{PingStore, RawRecord, ReconcileConfig, SqlitePingStore, Vehicle};
use std::io::IsTerminal;

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the ping database (overrides FLEET_DB_PATH and the config file).
    #[arg(long)]
    db_path: Option<String>,
    /// Vehicle the rows belong to.
    #[arg(long)]
    vin: String,
    /// JSON array of raw rows. Omit to only update the vehicle.
    #[arg(long)]
    input: Option<String>,
    /// Set the vehicle's configured winner serial.
    #[arg(long)]
    configured_winner: Option<String>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::from_args(
        &args.ui,
        std::io::stderr().is_terminal(),
        std::io::stdout().is_terminal(),
    );
    if args.input.is_none() && args.configured_winner.is_none() {
        return Err(anyhow!("nothing to import: pass --input and/or --configured-winner"));
    }

    let db_path = match args.db_path {
        Some(path) => path,
        None => ReconcileConfig::load()?.db_path,
    };
    let mut store = {
        let _stage = ui.stage("Open ping store");
        SqlitePingStore::open(&db_path)?
    };

    if let Some(serial) = &args.configured_winner {
        let _stage = ui.stage("Update vehicle");
        store.upsert_vehicle(&Vehicle::new(&args.vin, serial)?)?;
    }
    if let Some(input) = &args.input {
        let rows: Vec<RawRecord> = {
            let _stage = ui.stage("Read input rows");
            let raw = std::fs::read_to_string(input)
                .map_err(|e| anyhow!("failed to read input file {}: {}", input, e))?;
            serde_json::from_str(&raw)
                .map_err(|e| anyhow!("input {} is not a JSON array: {}", input, e))?
        };
        let mut stage = ui.stage("Insert pings");
        let inserted = store.insert_pings(&args.vin, &rows)?;
        stage.detail(format!("{} rows", inserted));
        log::info!("imported {} pings for {}", inserted, args.vin);
    }
    Ok(())
}

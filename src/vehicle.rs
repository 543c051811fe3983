use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::serial::normalize_serial;

/// A fleet vehicle as the store knows it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub vin: String,
    /// Operator-assigned default serial; empty when unset.
    #[serde(default)]
    pub configured_winner_serial: String,
}

impl Vehicle {
    pub fn new(vin: &str, configured_winner_serial: &str) -> Result<Self> {
        let vin = normalize_vin(vin)?;
        Ok(Self {
            vin,
            configured_winner_serial: normalize_serial(configured_winner_serial),
        })
    }
}

/// Vehicle identifiers are upper-cased and restricted to `[A-Z0-9_-]{1,32}`.
///
/// Covers 17-character VINs as well as the shorter internal unit numbers some
/// fleets key their telemetry by.
pub fn validate_vin(vin: &str) -> Result<()> {
    static VIN_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = VIN_RE.get_or_init(|| regex::Regex::new(r"^[A-Z0-9_-]{1,32}$").unwrap());
    if !re.is_match(vin) {
        return Err(anyhow!(
            "vehicle id '{}' must match ^[A-Z0-9_-]{{1,32}}$",
            vin
        ));
    }
    Ok(())
}

pub fn normalize_vin(vin: &str) -> Result<String> {
    let vin = vin.trim().to_uppercase();
    validate_vin(&vin)?;
    Ok(vin)
}

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::serial::SerialClassifier;

pub const MS_PER_MINUTE: i64 = 60 * 1000;
pub const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
pub const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Consecutive pings further apart than this leave the stationary cluster.
pub const DEFAULT_CLUSTER_RADIUS_M: f64 = 220.0;
/// A day whose cumulative path exceeds `radius * factor` counts as moving.
pub const DEFAULT_CUMULATIVE_PATH_FACTOR: f64 = 1.2;
/// Lookback for "this serial still reports" when no serial read today.
pub const DEFAULT_RECENT_WINDOW_MS: i64 = 14 * MS_PER_DAY;
/// Recency gap tolerated before the configured winner loses to a fresher serial.
pub const DEFAULT_STICKY_WINDOW_MS: i64 = 2 * MS_PER_HOUR;

/// Tunable thresholds for the reconciliation engine.
///
/// The defaults are hand-tuned field values; they are exposed here so fleets
/// can override them through configuration without touching the algorithms.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    pub cluster_radius_m: f64,
    pub cumulative_path_factor: f64,
    pub recent_window_ms: i64,
    pub sticky_window_ms: i64,
    pub serials: SerialClassifier,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            cluster_radius_m: DEFAULT_CLUSTER_RADIUS_M,
            cumulative_path_factor: DEFAULT_CUMULATIVE_PATH_FACTOR,
            recent_window_ms: DEFAULT_RECENT_WINDOW_MS,
            sticky_window_ms: DEFAULT_STICKY_WINDOW_MS,
            serials: SerialClassifier::default(),
        }
    }
}

impl ReconcilePolicy {
    /// Cumulative path length above which a day is "moving" regardless of
    /// its largest single hop.
    pub fn cumulative_threshold_m(&self) -> f64 {
        self.cluster_radius_m * self.cumulative_path_factor
    }

    pub fn validate(&self) -> Result<()> {
        if !self.cluster_radius_m.is_finite() || self.cluster_radius_m <= 0.0 {
            return Err(anyhow!("cluster radius must be a positive number of meters"));
        }
        if !self.cumulative_path_factor.is_finite() || self.cumulative_path_factor < 1.0 {
            return Err(anyhow!("cumulative path factor must be >= 1.0"));
        }
        if self.recent_window_ms <= 0 {
            return Err(anyhow!("recent window must be greater than zero"));
        }
        if self.sticky_window_ms <= 0 {
            return Err(anyhow!("sticky window must be greater than zero"));
        }
        self.serials.validate()
    }
}

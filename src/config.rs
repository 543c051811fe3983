use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::calendar::{LocalCalendar, DEFAULT_TIMEZONE};
use crate::policy::{ReconcilePolicy, MS_PER_DAY, MS_PER_MINUTE};
use crate::serial::{Blacklist, SerialClassifier};
use crate::storage::DEFAULT_PAGE_SIZE;

const DEFAULT_DB_PATH: &str = "fleet.db";

#[derive(Debug, Deserialize, Default)]
struct ReconcileConfigFile {
    db_path: Option<String>,
    timezone: Option<String>,
    page_size: Option<usize>,
    blacklist: Option<Vec<String>>,
    policy: Option<PolicyConfigFile>,
    serials: Option<SerialConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct PolicyConfigFile {
    cluster_radius_m: Option<f64>,
    cumulative_path_factor: Option<f64>,
    recent_window_days: Option<i64>,
    sticky_window_minutes: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
struct SerialConfigFile {
    wired_prefixes: Option<String>,
    wireless_prefixes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub db_path: String,
    pub timezone: String,
    pub calendar: LocalCalendar,
    pub page_size: usize,
    pub blacklist: Blacklist,
    pub policy: ReconcilePolicy,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            calendar: LocalCalendar::default(),
            page_size: DEFAULT_PAGE_SIZE,
            blacklist: Blacklist::default(),
            policy: ReconcilePolicy::default(),
        }
    }
}

impl ReconcileConfig {
    /// File named by `FLEET_RECONCILE_CONFIG` (optional), then `FLEET_*`
    /// environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FLEET_RECONCILE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ReconcileConfigFile) -> Self {
        let defaults = ReconcilePolicy::default();
        let policy_file = file.policy.unwrap_or_default();
        let serial_file = file.serials.unwrap_or_default();
        let serials = SerialClassifier {
            wired_prefixes: serial_file
                .wired_prefixes
                .unwrap_or(defaults.serials.wired_prefixes.clone()),
            wireless_prefixes: serial_file
                .wireless_prefixes
                .unwrap_or(defaults.serials.wireless_prefixes.clone()),
        };
        let policy = ReconcilePolicy {
            cluster_radius_m: policy_file
                .cluster_radius_m
                .unwrap_or(defaults.cluster_radius_m),
            cumulative_path_factor: policy_file
                .cumulative_path_factor
                .unwrap_or(defaults.cumulative_path_factor),
            recent_window_ms: policy_file
                .recent_window_days
                .map(|days| days.saturating_mul(MS_PER_DAY))
                .unwrap_or(defaults.recent_window_ms),
            sticky_window_ms: policy_file
                .sticky_window_minutes
                .map(|minutes| minutes.saturating_mul(MS_PER_MINUTE))
                .unwrap_or(defaults.sticky_window_ms),
            serials,
        };
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            timezone: file
                .timezone
                .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
            calendar: LocalCalendar::default(),
            page_size: file.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            blacklist: Blacklist::new(file.blacklist.unwrap_or_default()),
            policy,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("FLEET_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(tz) = std::env::var("FLEET_TIMEZONE") {
            if !tz.trim().is_empty() {
                self.timezone = tz.trim().to_string();
            }
        }
        // Present but empty clears the file's blacklist.
        if let Ok(blacklist) = std::env::var("FLEET_BLACKLIST") {
            self.blacklist = Blacklist::from_csv(&blacklist);
        }
        if let Some(size) = parse_env::<usize>("FLEET_PAGE_SIZE", "an integer page size")? {
            self.page_size = size;
        }
        if let Some(radius) = parse_env::<f64>("FLEET_CLUSTER_RADIUS_M", "a number of meters")? {
            self.policy.cluster_radius_m = radius;
        }
        if let Some(minutes) =
            parse_env::<i64>("FLEET_STICKY_WINDOW_MINUTES", "an integer number of minutes")?
        {
            self.policy.sticky_window_ms = minutes.saturating_mul(MS_PER_MINUTE);
        }
        if let Some(days) =
            parse_env::<i64>("FLEET_RECENT_WINDOW_DAYS", "an integer number of days")?
        {
            self.policy.recent_window_ms = days.saturating_mul(MS_PER_DAY);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.calendar = LocalCalendar::from_name(&self.timezone)?;
        let serials = self.policy.serials.clone();
        self.policy.serials =
            SerialClassifier::new(&serials.wired_prefixes, &serials.wireless_prefixes)?;
        self.policy.validate()?;
        if self.page_size == 0 {
            return Err(anyhow!("page size must be greater than zero"));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, expected: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be {}", key, expected)),
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<ReconcileConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

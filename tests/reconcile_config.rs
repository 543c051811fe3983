use std::io::Write;
use std::sync::Mutex;

use tempfile::Builder;

use fleet_reconcile::config::ReconcileConfig;
use fleet_reconcile::policy::{MS_PER_DAY, MS_PER_MINUTE};
use fleet_reconcile::SerialClass;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FLEET_RECONCILE_CONFIG",
        "FLEET_DB_PATH",
        "FLEET_TIMEZONE",
        "FLEET_PAGE_SIZE",
        "FLEET_BLACKLIST",
        "FLEET_CLUSTER_RADIUS_M",
        "FLEET_STICKY_WINDOW_MINUTES",
        "FLEET_RECENT_WINDOW_DAYS",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, body: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(body.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ReconcileConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "fleet.db");
    assert_eq!(cfg.timezone, "UTC");
    assert_eq!(cfg.page_size, 500);
    assert!(cfg.blacklist.is_empty());
    assert_eq!(cfg.policy.cluster_radius_m, 220.0);
    assert_eq!(cfg.policy.sticky_window_ms, 120 * MS_PER_MINUTE);
    assert_eq!(cfg.policy.recent_window_ms, 14 * MS_PER_DAY);
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "db_path": "fleet_prod.db",
            "timezone": "America/Los_Angeles",
            "page_size": 250,
            "blacklist": ["812345", " 899999 "],
            "policy": {
                "cluster_radius_m": 300.0,
                "recent_window_days": 7,
                "sticky_window_minutes": 90
            },
            "serials": { "wired_prefixes": "0123", "wireless_prefixes": "89" }
        }"#,
    );
    std::env::set_var("FLEET_RECONCILE_CONFIG", file.path());
    std::env::set_var("FLEET_PAGE_SIZE", "1000");
    std::env::set_var("FLEET_STICKY_WINDOW_MINUTES", "30");

    let cfg = ReconcileConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "fleet_prod.db");
    assert_eq!(cfg.timezone, "America/Los_Angeles");
    assert_eq!(cfg.calendar.timezone(), chrono_tz::America::Los_Angeles);
    assert_eq!(cfg.page_size, 1000);
    assert_eq!(cfg.blacklist.iter().collect::<Vec<_>>(), vec!["812345", "899999"]);
    assert_eq!(cfg.policy.cluster_radius_m, 300.0);
    assert_eq!(cfg.policy.recent_window_ms, 7 * MS_PER_DAY);
    assert_eq!(cfg.policy.sticky_window_ms, 30 * MS_PER_MINUTE);
    assert_eq!(cfg.policy.serials.classify("912345"), Some(SerialClass::Wireless));
    assert_eq!(cfg.policy.serials.classify("512345"), None);

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
db_path = "fleet_toml.db"
blacklist = ["812345"]

[policy]
cumulative_path_factor = 1.5
"#,
    );
    std::env::set_var("FLEET_RECONCILE_CONFIG", file.path());
    std::env::set_var("FLEET_BLACKLIST", "800001, 800002");

    let cfg = ReconcileConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "fleet_toml.db");
    assert_eq!(cfg.policy.cumulative_path_factor, 1.5);
    assert_eq!(cfg.policy.cumulative_threshold_m(), 330.0);
    assert_eq!(cfg.blacklist.len(), 2);

    clear_env();
}

#[test]
fn empty_blacklist_override_clears_file_entries() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(".json", r#"{ "blacklist": ["812345", "899999"] }"#);
    std::env::set_var("FLEET_RECONCILE_CONFIG", file.path());
    assert_eq!(ReconcileConfig::load().expect("load config").blacklist.len(), 2);

    std::env::set_var("FLEET_BLACKLIST", "");
    let cfg = ReconcileConfig::load().expect("load config");
    assert!(cfg.blacklist.is_empty());

    clear_env();
}

#[test]
fn rejects_bad_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FLEET_TIMEZONE", "Mars/Olympus_Mons");
    assert!(ReconcileConfig::load().is_err());
    clear_env();

    std::env::set_var("FLEET_PAGE_SIZE", "0");
    assert!(ReconcileConfig::load().is_err());
    clear_env();

    std::env::set_var("FLEET_CLUSTER_RADIUS_M", "wide");
    assert!(ReconcileConfig::load().is_err());
    clear_env();

    let overlapping = config_file(
        ".json",
        r#"{ "serials": { "wired_prefixes": "018", "wireless_prefixes": "8" } }"#,
    );
    std::env::set_var("FLEET_RECONCILE_CONFIG", overlapping.path());
    assert!(ReconcileConfig::load().is_err());
    clear_env();

    let broken = config_file(".json", "{ not json");
    std::env::set_var("FLEET_RECONCILE_CONFIG", broken.path());
    assert!(ReconcileConfig::load().is_err());
    clear_env();
}

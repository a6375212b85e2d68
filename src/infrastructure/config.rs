use crate::domain::models::PlannerPolicy;
use crate::infrastructure::error::InfraError;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const PLANNER_JSON: &str = "planner.json";
const SYNC_JSON: &str = "sync.json";

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub planner: serde_json::Value,
    pub sync: serde_json::Value,
}

/// Sync-scheduler and backoff tuning read from `sync.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub interval_minutes: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_minutes: 10,
            backoff_base_ms: 30_000,
            backoff_cap_ms: 600_000,
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "StudyGrid",
                "timezone": "UTC",
                "remoteSyncBaseUrl": null
            }),
        ),
        (
            PLANNER_JSON,
            serde_json::json!({
                "schema": 1,
                "planningWindow": {
                    "start": "08:00",
                    "end": "20:00"
                },
                "slotStepMinutes": 15,
                "focusBlockMinutes": 90,
                "focusBlockTitle": "Focus block"
            }),
        ),
        (
            SYNC_JSON,
            serde_json::json!({
                "schema": 1,
                "intervalMinutes": 10,
                "backoffBaseMs": 30000,
                "backoffCapMs": 600000
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
        planner: read_config(&config_dir.join(PLANNER_JSON))?,
        sync: read_config(&config_dir.join(SYNC_JSON))?,
    })
}

/// Loads the planning-window policy, falling back to defaults on any
/// missing or unparseable field.
pub fn load_planner_policy(config_dir: &Path) -> PlannerPolicy {
    let mut policy = PlannerPolicy::default();
    let Ok(parsed) = read_config(&config_dir.join(PLANNER_JSON)) else {
        return policy;
    };

    if let Some(window) = parsed.get("planningWindow") {
        if let Some(start) = window.get("start").and_then(serde_json::Value::as_str) {
            if let Ok(parsed_start) = NaiveTime::parse_from_str(start.trim(), "%H:%M") {
                policy.window_start = parsed_start;
            }
        }
        if let Some(end) = window.get("end").and_then(serde_json::Value::as_str) {
            if let Ok(parsed_end) = NaiveTime::parse_from_str(end.trim(), "%H:%M") {
                policy.window_end = parsed_end;
            }
        }
    }
    if let Some(value) = parsed
        .get("slotStepMinutes")
        .and_then(serde_json::Value::as_u64)
    {
        policy.slot_step_minutes = (value.max(1)) as u32;
    }
    if let Some(value) = parsed
        .get("focusBlockMinutes")
        .and_then(serde_json::Value::as_u64)
    {
        policy.focus_block_minutes = (value.max(1)) as u32;
    }
    if let Some(value) = parsed
        .get("focusBlockTitle")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        policy.focus_block_title = value.to_string();
    }

    policy
}

pub fn load_sync_settings(config_dir: &Path) -> SyncSettings {
    let mut settings = SyncSettings::default();
    let Ok(parsed) = read_config(&config_dir.join(SYNC_JSON)) else {
        return settings;
    };

    if let Some(value) = parsed
        .get("intervalMinutes")
        .and_then(serde_json::Value::as_u64)
    {
        settings.interval_minutes = (value.max(1)) as u32;
    }
    if let Some(value) = parsed
        .get("backoffBaseMs")
        .and_then(serde_json::Value::as_u64)
    {
        settings.backoff_base_ms = value.max(1);
    }
    if let Some(value) = parsed
        .get("backoffCapMs")
        .and_then(serde_json::Value::as_u64)
    {
        settings.backoff_cap_ms = value.max(settings.backoff_base_ms);
    }

    settings
}

pub fn read_timezone(config_dir: &Path) -> Result<Option<String>, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    Ok(app
        .get("timezone")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned))
}

pub fn read_remote_sync_base_url(config_dir: &Path) -> Result<Option<String>, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    Ok(app
        .get("remoteSyncBaseUrl")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_CONFIG: AtomicUsize = AtomicUsize::new(0);

    struct TempConfigDir {
        path: std::path::PathBuf,
    }

    impl TempConfigDir {
        fn new() -> Self {
            let sequence = NEXT_TEMP_CONFIG.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "studygrid-config-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp config dir");
            Self { path }
        }
    }

    impl Drop for TempConfigDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn ensure_default_configs_creates_all_files() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        let bundle = load_configs(&dir.path).expect("load configs");
        assert_eq!(bundle.app.get("appName").and_then(|v| v.as_str()), Some("StudyGrid"));
    }

    #[test]
    fn planner_policy_falls_back_to_defaults() {
        let dir = TempConfigDir::new();
        let policy = load_planner_policy(&dir.path);
        assert_eq!(policy, PlannerPolicy::default());
    }

    #[test]
    fn planner_policy_reads_custom_window() {
        let dir = TempConfigDir::new();
        let custom = serde_json::json!({
            "schema": 1,
            "planningWindow": { "start": "07:30", "end": "21:00" },
            "slotStepMinutes": 30,
            "focusBlockMinutes": 60,
            "focusBlockTitle": "Deep work"
        });
        fs::write(
            dir.path.join(PLANNER_JSON),
            serde_json::to_string_pretty(&custom).expect("serialize"),
        )
        .expect("write planner config");

        let policy = load_planner_policy(&dir.path);
        assert_eq!(policy.window_start, NaiveTime::from_hms_opt(7, 30, 0).expect("time"));
        assert_eq!(policy.window_end, NaiveTime::from_hms_opt(21, 0, 0).expect("time"));
        assert_eq!(policy.slot_step_minutes, 30);
        assert_eq!(policy.focus_block_minutes, 60);
        assert_eq!(policy.focus_block_title, "Deep work");
    }

    #[test]
    fn load_configs_rejects_unknown_schema() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        fs::write(dir.path.join(SYNC_JSON), r#"{"schema": 9}"#).expect("overwrite sync config");
        assert!(load_configs(&dir.path).is_err());
    }

    #[test]
    fn sync_settings_cap_never_below_base() {
        let dir = TempConfigDir::new();
        let custom = serde_json::json!({
            "schema": 1,
            "intervalMinutes": 5,
            "backoffBaseMs": 60000,
            "backoffCapMs": 1000
        });
        fs::write(
            dir.path.join(SYNC_JSON),
            serde_json::to_string_pretty(&custom).expect("serialize"),
        )
        .expect("write sync config");

        let settings = load_sync_settings(&dir.path);
        assert_eq!(settings.interval_minutes, 5);
        assert_eq!(settings.backoff_base_ms, 60_000);
        assert_eq!(settings.backoff_cap_ms, 60_000);
    }
}
